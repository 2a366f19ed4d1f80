//! BLE boundary
//!
//! The only seam between the transport and a platform Bluetooth stack. An
//! adapter scans and opens connections; a link is one GATT connection to an
//! OBD dongle.

use crate::error::TransportError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Characteristic write mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WriteMode {
    /// Unacknowledged write (preferred by ELM327 clones)
    WithoutResponse,
    /// Acknowledged write
    WithResponse,
}

impl WriteMode {
    /// The other mode, tried once when a write fails
    pub fn fallback(self) -> Self {
        match self {
            WriteMode::WithoutResponse => WriteMode::WithResponse,
            WriteMode::WithResponse => WriteMode::WithoutResponse,
        }
    }
}

/// Capabilities of a GATT characteristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

/// A discovered characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// A discovered service and its characteristics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// Address of one characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// A device seen during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Platform identifier used to connect
    pub id: String,
    /// Advertised name
    pub name: Option<String>,
    /// Signal strength (dBm)
    pub rssi: Option<i16>,
}

/// Event delivered by a link after subscribing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Value of one notification
    Notification(Vec<u8>),
    /// The peer went away (powered off, out of range)
    Disconnected(String),
}

/// Host Bluetooth adapter
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Start scanning, forgetting devices from earlier scans
    async fn start_scan(&self) -> Result<(), TransportError>;

    /// Stop scanning; a no-op when not scanning
    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Devices seen since the last `start_scan`
    fn discovered(&self) -> Vec<DeviceInfo>;

    /// Open a GATT connection
    async fn connect(&self, device_id: &str) -> Result<Arc<dyn GattLink>, TransportError>;

    /// Release a connection, whatever state it is in
    async fn cancel_connection(&self, device_id: &str) -> Result<(), TransportError>;
}

/// One GATT connection
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Identifier of the connected device
    fn device_id(&self) -> &str;

    /// Discover all services and their characteristics
    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, TransportError>;

    /// Write raw bytes to a characteristic
    async fn write(
        &self,
        target: &CharacteristicRef,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError>;

    /// Enable notifications; the receiver also reports loss of the link
    async fn subscribe(
        &self,
        target: &CharacteristicRef,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, TransportError>;
}
