use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigValidationError;

use super::BackoffConfig;

/// Configuration for managing connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Timeout for idle connections
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Timeout after which a connection with pending errors is dropped
    #[serde(with = "humantime_serde", default = "default_error_timeout")]
    pub error_timeout: Duration,
    /// Timeout for establishing a connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Per-socket idle timer: a handler with no read/write activity for this
    /// long has its connection closed (distinct from `idle_timeout`, which
    /// governs when a client's aggregate stats entry is swept).
    #[serde(with = "humantime_serde", default = "default_tcp_idle_timeout")]
    pub tcp_idle_timeout: Duration,
    /// Limits for specific IP addresses
    pub per_ip_limits: Option<usize>,
    /// Parameters for backoff strategy
    pub backoff: BackoffConfig,
}

fn default_error_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_tcp_idle_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connections: 100,
            idle_timeout: Duration::from_secs(60),
            error_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(5),
            tcp_idle_timeout: Duration::from_secs(10),
            per_ip_limits: Some(10),
            backoff: BackoffConfig {
                initial_interval: Duration::from_millis(100),
                max_interval: Duration::from_secs(30),
                multiplier: 2.0,
                max_retries: 5,
            },
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_connections == 0 {
            return Err(ConfigValidationError::connection(
                "max_connections cannot be 0".to_string(),
            ));
        }

        if let Some(limit) = self.per_ip_limits {
            if limit == 0 {
                return Err(ConfigValidationError::connection(
                    "per_ip_limits cannot be 0".to_string(),
                ));
            }
            if limit > self.max_connections {
                return Err(ConfigValidationError::connection(format!(
                    "per_ip_limits ({}) cannot be greater than max_connections ({})",
                    limit, self.max_connections
                )));
            }
        }

        if self.idle_timeout.as_secs() == 0 {
            return Err(ConfigValidationError::connection(
                "idle_timeout cannot be 0".to_string(),
            ));
        }

        if self.connect_timeout.as_secs() == 0 {
            return Err(ConfigValidationError::connection(
                "connect_timeout cannot be 0".to_string(),
            ));
        }

        if self.tcp_idle_timeout.as_secs() == 0 {
            return Err(ConfigValidationError::connection(
                "tcp_idle_timeout cannot be 0".to_string(),
            ));
        }

        if self.backoff.initial_interval.is_zero() {
            return Err(ConfigValidationError::connection(
                "backoff.initial_interval cannot be 0".to_string(),
            ));
        }

        if self.backoff.max_interval.is_zero() {
            return Err(ConfigValidationError::connection(
                "backoff.max_interval cannot be 0".to_string(),
            ));
        }

        if self.backoff.multiplier <= 0.0 {
            return Err(ConfigValidationError::connection(
                "backoff.multiplier must be positive".to_string(),
            ));
        }

        if self.backoff.max_retries == 0 {
            return Err(ConfigValidationError::connection(
                "backoff.max_retries cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}
