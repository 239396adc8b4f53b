use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the single-consumer serial dispatcher (spec §4.5, §9 — the
/// source disagreed on 1s vs 5s per-job timeout; this picks 1s).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub queue_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub job_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            job_timeout: Duration::from_secs(1),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("queue_capacity cannot be 0".into());
        }
        if self.job_timeout.is_zero() {
            return Err("job_timeout cannot be 0".into());
        }
        Ok(())
    }
}
