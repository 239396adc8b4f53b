use serde::{Deserialize, Serialize};

/// Which slave ids get which built-in translator hook (spec §4.4). Both
/// lists are slave ids, disjoint in any sane configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Slave ids served by the relay-board shim (default: 5, matching the
    /// source's "simple Chinese" relay board).
    pub relay_shim_slaves: Vec<u8>,
    /// Slave ids served by the full register/coil emulator (default: 100).
    pub emulator_slaves: Vec<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_shim_slaves: vec![5],
            emulator_slaves: vec![100],
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        for &id in self.relay_shim_slaves.iter().chain(&self.emulator_slaves) {
            if id == 0 || id > 247 {
                return Err(format!("slave id {id} is outside the valid 1..=247 range"));
            }
        }
        let mut all: Vec<u8> = self
            .relay_shim_slaves
            .iter()
            .chain(&self.emulator_slaves)
            .copied()
            .collect();
        all.sort_unstable();
        if all.windows(2).any(|w| w[0] == w[1]) {
            return Err("a slave id is assigned to more than one translator".into());
        }
        Ok(())
    }
}
