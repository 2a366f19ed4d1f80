//! Diagnostic State
//!
//! Everything a front end shows: live values, readiness monitors, trouble
//! codes per module, found modules, scan progress and the activity log.
//! Updated from session events and by the bus scanner.

use crate::modules::ModuleInfo;
use obd_protocol::frame::hex_to_bytes;
use obd_protocol::test_result::parse_test_result;
use obd_protocol::vin::parse_vin;
use obd_protocol::{
    decode_pid, decode_readiness, mode, DecodedPid, EmissionsReadiness, ModuleHeader, TestResult,
};
use obd_transport::{DisconnectReason, LinkState, SessionEvent};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Lines kept in the activity log
pub const ACTIVITY_LOG_CAPACITY: usize = 100;

/// Mode 06 results kept
pub const TEST_RESULT_CAPACITY: usize = 50;

/// Positive response of Mode 01
const MODE01_RESPONSE: &str = "41";
/// Positive response of Mode 06
const MODE06_RESPONSE: &str = "46";
/// Positive response of Mode 09 PID 02
const VIN_RESPONSE: &str = "4902";

/// A decoded live value
pub type LiveDataPoint = DecodedPid;

/// State shared between the monitor, poller, scanner and front end
pub type SharedState = Arc<RwLock<DiagnosticState>>;

/// Bus scan stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ScanStage {
    #[default]
    Idle,
    /// Sweeping every diagnostic header
    BruteForce,
    /// Finalization requests to the primary ECU
    MonitorsAndVin,
}

impl ScanStage {
    pub fn label(&self) -> &'static str {
        match self {
            ScanStage::Idle => "Idle",
            ScanStage::BruteForce => "Brute Force Scanning...",
            ScanStage::MonitorsAndVin => "Monitors & VIN",
        }
    }
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Bus scan progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScanStatus {
    /// Headers visited so far
    pub current: usize,
    /// Headers in the sweep
    pub total: usize,
    pub stage: ScanStage,
}

impl ScanStatus {
    pub fn is_idle(&self) -> bool {
        self.stage == ScanStage::Idle
    }
}

/// Kind of trouble code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DtcKind {
    /// Confirmed code (Mode 03)
    Stored,
    /// Pending code (Mode 07)
    Pending,
}

impl DtcKind {
    fn mode(&self) -> u8 {
        match self {
            DtcKind::Stored => mode::READ_DTC,
            DtcKind::Pending => mode::PENDING_DTC,
        }
    }

    /// Request reading codes of this kind
    pub fn request(&self) -> String {
        mode::request(self.mode(), None)
    }

    /// Positive response byte of the request
    pub fn response_mode(&self) -> String {
        mode::positive_response(self.mode())
    }
}

impl fmt::Display for DtcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DtcKind::Stored => f.write_str("Stored"),
            DtcKind::Pending => f.write_str("Pending"),
        }
    }
}

/// Trouble codes reported by one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DtcRecord {
    /// Header the codes were read from
    pub header: ModuleHeader,
    /// Module display name
    pub module: String,
    /// Stored or pending
    pub kind: DtcKind,
    /// Decoded codes such as `P0420`, in reply order
    pub codes: Vec<String>,
}

/// Application-facing diagnostic state
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticState {
    /// Connection manager state
    pub link: LinkState,
    /// Connected adapter, if any
    pub device_id: Option<String>,
    /// Latest value per PID key
    pub live_data: BTreeMap<&'static str, LiveDataPoint>,
    /// Readiness monitors from the last `0101` reply
    pub emissions: EmissionsReadiness,
    /// Trouble codes found by the last bus scan
    pub dtcs: Vec<DtcRecord>,
    /// Modules that answered during the last bus scan
    pub modules: Vec<ModuleInfo>,
    /// Latest Mode 06 results, oldest first
    pub test_results: VecDeque<TestResult>,
    /// Vehicle identification number, once read
    pub vin: Option<String>,
    /// Bus scan progress
    pub scan: ScanStatus,
    /// Raw text of the last notification
    pub last_raw: String,
    /// Activity log, oldest first, at most [`ACTIVITY_LOG_CAPACITY`] lines
    pub log: VecDeque<String>,
}

impl DiagnosticState {
    /// Create shared, empty state
    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Append a line to the activity log
    pub fn log(&mut self, line: impl Into<String>) {
        if self.log.len() == ACTIVITY_LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(line.into());
    }

    /// Apply one session event
    pub fn apply_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Transmitted { command } => self.log(format!("TX -> {}", command)),
            SessionEvent::Received { raw, frame } => {
                self.last_raw = raw.clone();
                self.log(format!("RX <- {}", frame));
                self.apply_frame(frame);
            }
            SessionEvent::NoResponse { .. } => self.log("RX <- (No Data / Timeout)"),
            SessionEvent::WriteFailed { command, error } => {
                self.log(format!("Write failed for {}: {}", command, error))
            }
            SessionEvent::StateChanged { state } => self.link = *state,
            SessionEvent::Connected { device_id } => {
                self.device_id = Some(device_id.clone());
                self.log(format!("Connected to {}", device_id));
            }
            SessionEvent::Disconnected { reason, .. } => {
                self.device_id = None;
                self.link = LinkState::Disconnected;
                self.live_data.clear();
                match reason {
                    DisconnectReason::Requested => {
                        self.log("Successfully disconnected and cleaned up.")
                    }
                    DisconnectReason::Lost(why) => self.log(format!("Connection lost: {}", why)),
                }
            }
            SessionEvent::ConnectFailed { error, .. } => {
                self.log(format!("Connect Error: {}", error))
            }
        }
    }

    /// Decode a normalized frame into live data, readiness, test results
    /// or the VIN. Frames of other modes are ignored.
    pub fn apply_frame(&mut self, frame: &str) {
        if frame.starts_with(MODE06_RESPONSE) {
            if let Some(result) = parse_test_result(frame) {
                if self.test_results.len() == TEST_RESULT_CAPACITY {
                    self.test_results.pop_front();
                }
                self.test_results.push_back(result);
            }
            return;
        }

        if frame.starts_with(MODE01_RESPONSE) {
            self.apply_mode01(frame);
            return;
        }

        if frame.contains(VIN_RESPONSE) {
            if let Some(vin) = parse_vin(frame) {
                self.vin = Some(vin);
            }
            return;
        }

        if let Some(data) = strip_can_header(frame) {
            self.apply_mode01(data);
        }
    }

    fn apply_mode01(&mut self, data: &str) {
        let (Some(pid), Some(rest)) = (data.get(2..4), data.get(4..)) else {
            return;
        };
        let bytes = hex_to_bytes(rest);
        let key = format!("01{}", pid);

        if let Some(decoded) = decode_pid(&key, &bytes) {
            self.live_data.insert(decoded.key, decoded);
        } else if pid == "01" {
            self.emissions = decode_readiness(&bytes);
        }
    }

    /// Reset scan results and enter the sweep stage
    pub fn begin_scan(&mut self, total: usize) {
        self.dtcs.clear();
        self.modules.clear();
        self.test_results.clear();
        self.scan = ScanStatus {
            current: 0,
            total,
            stage: ScanStage::BruteForce,
        };
    }

    /// Mark the scan complete
    pub fn finish_scan(&mut self) {
        self.scan = ScanStatus {
            current: self.scan.total,
            total: self.scan.total,
            stage: ScanStage::Idle,
        };
    }
}

/// Mode 01 reply behind a leading 11-bit CAN header and its length byte,
/// as sent when the adapter has headers turned on (`7E8 03 41 0D 32`)
fn strip_can_header(frame: &str) -> Option<&str> {
    let prefix = frame.get(..5)?;
    let has_header =
        prefix.starts_with('7') && prefix[1..].chars().all(|c| c.is_ascii_hexdigit());
    let data = frame.get(5..)?;
    (has_header && data.starts_with(MODE01_RESPONSE)).then_some(data)
}
