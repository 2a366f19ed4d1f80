//! Session Events

use serde::Serialize;

use crate::connection::LinkState;

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    /// `disconnect()` was called
    Requested,
    /// The link dropped (adapter powered off, out of range)
    Lost(String),
}

/// Events broadcast by a session and its connection manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A command was written to the adapter
    Transmitted { command: String },
    /// A notification frame passed the codec
    Received { raw: String, frame: String },
    /// A command got no matching response in time
    NoResponse { command: String },
    /// Both write modes failed; the command was treated as sent
    WriteFailed { command: String, error: String },
    /// The connection manager changed state
    StateChanged { state: LinkState },
    /// Initialization finished; the session accepts commands
    Connected { device_id: String },
    /// The session was torn down
    Disconnected { device_id: String, reason: DisconnectReason },
    /// A connection attempt failed and the device was released
    ConnectFailed { device_id: String, error: String },
}
