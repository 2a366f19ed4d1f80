//! Transport Error Types

use obd_protocol::ObdError;
use thiserror::Error;

/// Errors that can occur between the command queue and the BLE adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No active connection, or the connection went away mid-command
    #[error("OBD adapter not connected")]
    Disconnected,

    /// Another connection attempt is still running
    #[error("A connection attempt is already in progress")]
    ConnectInProgress,

    /// A device is already connected
    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    /// Host Bluetooth adapter missing or powered off
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// Device scan could not be started or stopped
    #[error("Device scan failed: {0}")]
    Scan(String),

    /// GATT connection failed
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// Service or characteristic discovery failed
    #[error("Service discovery failed: {0}")]
    Discovery(String),

    /// Device exposes no notify + write characteristic pair
    #[error("No suitable OBD service/characteristic found")]
    NoUsableCharacteristic,

    /// Enabling notifications failed
    #[error("Subscribing to notifications failed: {0}")]
    Subscribe(String),

    /// Characteristic write failed
    #[error("Write failed: {0}")]
    Write(String),

    /// Invalid request
    #[error(transparent)]
    Protocol(#[from] ObdError),
}
