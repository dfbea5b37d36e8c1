//! Registry configuration

use lever_protocol::defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serial link and worker pacing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Baud rate used for every lever port (default: 9600)
    pub baud_rate: u32,
    /// Bound on any single serial read or write (milliseconds)
    pub io_timeout_ms: u64,
    /// Worker sleep between passes over all levers (milliseconds)
    pub worker_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            baud_rate: defaults::BAUD_RATE,
            io_timeout_ms: defaults::READ_WRITE_TIMEOUT_MS,
            worker_interval_ms: 10,
        }
    }
}

impl RegistryConfig {
    /// Serial read/write timeout
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Worker pacing interval
    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.worker_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_firmware() {
        let config = RegistryConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.io_timeout(), Duration::from_secs(1));
        assert_eq!(config.worker_interval(), Duration::from_millis(10));
    }
}
