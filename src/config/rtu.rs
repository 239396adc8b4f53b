use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::types::{DataBits, Parity, StopBits};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,

    /// Whether to flush the serial port after writing
    pub flush_after_write: bool,

    /// Per-read timeout on the underlying serial handle (spec §6: 500ms-5s)
    #[serde(with = "humantime_serde")]
    pub serial_timeout: Duration,

    /// Quiet interval after which the idle port is closed (spec §4.3: 60s)
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Largest RTU frame this transport will ever assemble
    pub max_frame_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: "/dev/ttyS0".to_string(),
            baud_rate: 19_200,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            flush_after_write: true,
            serial_timeout: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(60),
            max_frame_size: crate::modbus::RTU_MAX_SIZE,
        }
    }
}

impl Config {
    pub fn serial_port_info(&self) -> String {
        format!(
            "{} ({} baud, {} data bits, {} parity, {} stop bits)",
            self.device, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.baud_rate == 0 {
            return Err("baud_rate cannot be 0".into());
        }
        if self.serial_timeout.is_zero() {
            return Err("serial_timeout cannot be 0".into());
        }
        if self.idle_timeout.is_zero() {
            return Err("idle_timeout cannot be 0".into());
        }
        if self.max_frame_size < crate::modbus::RTU_MIN_SIZE {
            return Err(format!(
                "max_frame_size must be at least {}",
                crate::modbus::RTU_MIN_SIZE
            ));
        }
        Ok(())
    }
}
