//! ELM327 BLE Transport
//!
//! Serialized command/response transport over a BLE GATT notify/write pair:
//! - Command queue with single-flight dispatch and write-mode fallback
//! - Content-based response correlation with timeouts
//! - Connection lifecycle, characteristic discovery and ELM327 handshake
//! - Scripted mock adapter, and a native backend behind the `bluest` feature

pub mod config;
pub mod correlator;
pub mod discovery;
mod error;
pub mod event;
pub mod link;
pub mod mock;
pub mod queue;
mod connection;
mod session;

#[cfg(feature = "bluest")]
mod native;

pub use config::TransportConfig;
pub use connection::{ConnectionManager, LinkState};
pub use correlator::Correlator;
pub use discovery::{select_channel, GattChannel};
pub use error::TransportError;
pub use event::{DisconnectReason, SessionEvent};
pub use link::{BleAdapter, DeviceInfo, GattLink, LinkEvent, WriteMode};
pub use queue::{CommandQueue, QueuePhase};
pub use session::Session;

#[cfg(feature = "bluest")]
pub use native::{BluestAdapter, BluestLink};
