//! Scan Error Types

use obd_transport::TransportError;
use thiserror::Error;

/// Errors that abort a bus scan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("OBD adapter not connected")]
    NotConnected,

    #[error("A bus scan is already running")]
    AlreadyRunning,

    /// The session failed mid-scan, normally a lost connection
    #[error(transparent)]
    Transport(#[from] TransportError),
}
