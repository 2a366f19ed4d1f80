//! Poll and scan configuration

use obd_protocol::ModuleHeader;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Live data rotation; `0101` keeps emissions readiness current
pub const LIVE_ROTATION: [&str; 13] = [
    "010C", "010D", "0105", "0104", "0110", "0142", "0101", "010F", "0111", "012F", "0133",
    "0143", "015C",
];

/// Configuration for the live poller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Tick interval in milliseconds (default: 350)
    pub interval_ms: u64,
    /// Response timeout of each poll in milliseconds (default: 800)
    pub timeout_ms: u64,
    /// PIDs polled in rotation
    pub pids: Vec<String>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 350,
            timeout_ms: 800,
            pids: LIVE_ROTATION.iter().map(|pid| pid.to_string()).collect(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration for the bus scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// First header of the sweep (default: 700)
    pub first_header: ModuleHeader,
    /// Last header of the sweep, inclusive (default: 7FF)
    pub last_header: ModuleHeader,
    /// Timeout of each `ATSH` in milliseconds
    pub header_timeout_ms: u64,
    /// Timeout of the `0100` presence probe in milliseconds
    pub probe_timeout_ms: u64,
    /// Timeout of Mode 03 / Mode 07 requests in milliseconds
    pub dtc_timeout_ms: u64,
    /// Timeout of the Mode 06 request in milliseconds
    pub test_results_timeout_ms: u64,
    /// Module the finalization requests go to (default: 7E0)
    pub primary_header: ModuleHeader,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            first_header: ModuleHeader::FIRST,
            last_header: ModuleHeader::LAST,
            header_timeout_ms: 150,
            probe_timeout_ms: 400,
            dtc_timeout_ms: 800,
            test_results_timeout_ms: 3000,
            primary_header: ModuleHeader::ENGINE,
        }
    }
}

impl ScanConfig {
    /// Headers visited by one sweep, in order
    pub fn headers(&self) -> Vec<ModuleHeader> {
        ModuleHeader::sweep(self.first_header, self.last_header).collect()
    }

    pub fn header_timeout(&self) -> Duration {
        Duration::from_millis(self.header_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn dtc_timeout(&self) -> Duration {
        Duration::from_millis(self.dtc_timeout_ms)
    }

    pub fn test_results_timeout(&self) -> Duration {
        Duration::from_millis(self.test_results_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sweep_by_default() {
        let headers = ScanConfig::default().headers();
        assert_eq!(headers.len(), 256);
        assert_eq!(headers[0].to_string(), "700");
        assert_eq!(headers[255].to_string(), "7FF");
    }

    #[test]
    fn test_default_rotation() {
        let config = PollConfig::default();
        assert_eq!(config.pids.len(), 13);
        assert_eq!(config.pids[0], "010C");
        assert_eq!(config.pids[6], "0101");
        assert_eq!(config.interval(), Duration::from_millis(350));
    }
}
