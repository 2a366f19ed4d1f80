//! Transport configuration

use obd_protocol::{at, ObdProtocol};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and initialization settings of the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Pause after every dispatched command (ms)
    pub inter_command_delay_ms: u64,
    /// Wait after a command that expects no response (ms)
    pub settle_delay_ms: u64,
    /// Response timeout for commands without their own (ms)
    pub response_timeout_ms: u64,
    /// Response timeout of each initialization command (ms)
    pub init_command_timeout_ms: u64,
    /// Pause between initialization commands (ms)
    pub init_command_delay_ms: u64,
    /// Protocol selected during initialization
    pub protocol: ObdProtocol,
    /// Duration of a BLE device scan (ms)
    pub device_scan_ms: u64,
    /// Buffer notifications until the adapter prompt before parsing
    pub reassemble_frames: bool,
    /// Capacity of the session event channel
    pub event_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            inter_command_delay_ms: 150,
            settle_delay_ms: 150,
            response_timeout_ms: 3000,
            init_command_timeout_ms: 1500,
            init_command_delay_ms: 300,
            protocol: ObdProtocol::Auto,
            device_scan_ms: 5000,
            reassemble_frames: true,
            event_capacity: 1024,
        }
    }
}

impl TransportConfig {
    pub fn inter_command_delay(&self) -> Duration {
        Duration::from_millis(self.inter_command_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn init_command_timeout(&self) -> Duration {
        Duration::from_millis(self.init_command_timeout_ms)
    }

    pub fn init_command_delay(&self) -> Duration {
        Duration::from_millis(self.init_command_delay_ms)
    }

    pub fn device_scan(&self) -> Duration {
        Duration::from_millis(self.device_scan_ms)
    }

    /// AT commands sent after connecting: reset, echo off, linefeeds off,
    /// spaces off, protocol selection
    pub fn init_sequence(&self) -> Vec<&'static str> {
        vec![
            at::RESET,
            at::ECHO_OFF,
            at::LINEFEEDS_OFF,
            at::SPACES_OFF,
            self.protocol.to_elm_command(),
        ]
    }
}
