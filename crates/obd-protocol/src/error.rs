//! OBD-II Error Types

use thiserror::Error;

/// Errors raised while building OBD-II requests
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObdError {
    /// Command text is empty or not printable ASCII
    #[error("Invalid command: {0:?}")]
    InvalidCommand(String),

    /// CAN header outside the 11-bit diagnostic range
    #[error("Invalid CAN header: {0:?} (expected 700..7FF)")]
    InvalidHeader(String),
}
