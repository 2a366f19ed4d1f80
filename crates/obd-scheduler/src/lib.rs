//! OBD-II Diagnostic Scheduling
//!
//! Everything that runs on top of a connected session:
//! - Live data poll rotation
//! - Full 11-bit CAN header sweep for modules and trouble codes
//! - Application-facing diagnostic state fed from session events

mod config;
mod error;
mod modules;
mod monitor;
mod poller;
mod scanner;
mod state;

pub use config::{PollConfig, ScanConfig, LIVE_ROTATION};
pub use error::ScanError;
pub use modules::{module_name, ModuleInfo, MODULE_NAMES};
pub use monitor::spawn_monitor;
pub use poller::LivePoller;
pub use scanner::{BusScanner, ScanSummary};
pub use state::{
    DiagnosticState, DtcKind, DtcRecord, LiveDataPoint, ScanStage, ScanStatus, SharedState,
    ACTIVITY_LOG_CAPACITY, TEST_RESULT_CAPACITY,
};
