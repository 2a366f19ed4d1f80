//! Connection Manager
//!
//! Drives one adapter through connect, characteristic discovery and the
//! ELM327 handshake, pumps notifications into the [`Session`], and tears
//! the session down when the link goes away. It never reconnects on its
//! own.

use crate::discovery::select_channel;
use crate::error::TransportError;
use crate::event::{DisconnectReason, SessionEvent};
use crate::link::{BleAdapter, DeviceInfo, LinkEvent};
use crate::session::Session;
use obd_protocol::Command;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Supported-PIDs probe sent after the AT handshake
const PRIME_COMMAND: &str = "0100";

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    /// Looking for the RX/TX characteristic pair
    Discovering,
    /// Running the ELM327 handshake
    Initializing,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Discovering => "discovering",
            LinkState::Initializing => "initializing",
            LinkState::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Clears the in-flight flag when a connection attempt ends
struct AttemptGuard<'a>(&'a AtomicBool);

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Connection manager for one session
pub struct ConnectionManager {
    adapter: Arc<dyn BleAdapter>,
    session: Arc<Session>,
    state: watch::Sender<LinkState>,
    connecting: AtomicBool,
    device: Mutex<Option<String>>,
}

impl ConnectionManager {
    /// Create a disconnected manager driving `session` over `adapter`
    pub fn new(adapter: Arc<dyn BleAdapter>, session: Arc<Session>) -> Arc<Self> {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Arc::new(Self {
            adapter,
            session,
            state,
            connecting: AtomicBool::new(false),
            device: Mutex::new(None),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Receiver following every state change
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Device of the current or last attempted connection
    pub fn device_id(&self) -> Option<String> {
        self.device.lock().clone()
    }

    fn set_state(&self, state: LinkState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!("Link state -> {}", state);
            self.session.emit(SessionEvent::StateChanged { state });
        }
    }

    /// Scan for adapters for the configured duration
    pub async fn scan_devices(&self) -> Result<Vec<DeviceInfo>, TransportError> {
        let duration = self.session.config().device_scan();
        info!("Scanning for BLE devices for {:?}", duration);

        self.adapter.start_scan().await?;
        tokio::time::sleep(duration).await;
        self.adapter.stop_scan().await?;

        let devices = self.adapter.discovered();
        info!("Found {} devices", devices.len());
        Ok(devices)
    }

    /// Connect to an adapter and run the ELM327 handshake.
    ///
    /// On failure the session is torn down and the device released before
    /// the error is returned.
    pub async fn connect(self: &Arc<Self>, device_id: &str) -> Result<(), TransportError> {
        if self.connecting.swap(true, Ordering::SeqCst) {
            return Err(TransportError::ConnectInProgress);
        }
        let _guard = AttemptGuard(&self.connecting);
        if let Some(current) = self.session.device_id() {
            return Err(TransportError::AlreadyConnected(current));
        }

        info!("Connecting to {}", device_id);
        match self.establish(device_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Connect Error: {}", e);
                self.session.teardown();
                if let Err(cancel) = self.adapter.cancel_connection(device_id).await {
                    warn!("Releasing {} failed: {}", device_id, cancel);
                }
                self.set_state(LinkState::Disconnected);
                self.session.emit(SessionEvent::ConnectFailed {
                    device_id: device_id.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn establish(self: &Arc<Self>, device_id: &str) -> Result<(), TransportError> {
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Stopping device scan failed: {}", e);
        }
        *self.device.lock() = Some(device_id.to_string());

        self.set_state(LinkState::Connecting);
        let link = self.adapter.connect(device_id).await?;

        self.set_state(LinkState::Discovering);
        let services = link.discover_services().await?;
        let channel = select_channel(&services).ok_or(TransportError::NoUsableCharacteristic)?;

        let events = link.subscribe(&channel.rx).await?;
        let generation = self.session.attach(link, channel);
        self.spawn_pump(generation, events);

        self.set_state(LinkState::Initializing);
        self.initialize().await?;

        // The link may have dropped while the handshake ran
        if !self.session.is_current(generation) {
            return Err(TransportError::Disconnected);
        }

        self.set_state(LinkState::Connected);
        info!("Connected to {}", device_id);
        self.session.emit(SessionEvent::Connected {
            device_id: device_id.to_string(),
        });
        Ok(())
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        let config = self.session.config();
        for text in config.init_sequence() {
            let command = Command::new(text).with_timeout(config.init_command_timeout());
            let response = self.session.send(command).await?;
            if response.is_timeout() {
                debug!("No reply to {} during init", text);
            }
            tokio::time::sleep(config.init_command_delay()).await;
        }

        let response = self.session.send(Command::new(PRIME_COMMAND)).await?;
        debug!("Prime probe: {:?}", response);
        Ok(())
    }

    fn spawn_pump(self: &Arc<Self>, generation: u64, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let reason = loop {
                let Some(event) = events.recv().await else {
                    break "notification stream closed".to_string();
                };
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                if !manager.session.is_current(generation) {
                    return;
                }
                match event {
                    LinkEvent::Notification(bytes) => manager.session.handle_notification(&bytes),
                    LinkEvent::Disconnected(reason) => break reason,
                }
            };

            if let Some(manager) = manager.upgrade() {
                manager.handle_link_lost(generation, &reason);
            }
        });
    }

    /// Tear down after the adapter went away. Events of an older generation
    /// are ignored.
    fn handle_link_lost(&self, generation: u64, reason: &str) {
        if !self.session.is_current(generation) {
            return;
        }
        let device_id = self
            .session
            .teardown()
            .map(|link| link.device_id().to_string())
            .unwrap_or_default();

        warn!("Connection to {} lost: {}", device_id, reason);
        self.set_state(LinkState::Disconnected);
        self.session.emit(SessionEvent::Disconnected {
            device_id,
            reason: DisconnectReason::Lost(reason.to_string()),
        });
    }

    /// Close the connection and release the device
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(link) = self.session.teardown() else {
            self.set_state(LinkState::Disconnected);
            return Ok(());
        };
        let device_id = link.device_id().to_string();
        drop(link);

        self.set_state(LinkState::Disconnected);
        let released = self.adapter.cancel_connection(&device_id).await;
        info!("Successfully disconnected and cleaned up");
        self.session.emit(SessionEvent::Disconnected {
            device_id,
            reason: DisconnectReason::Requested,
        });
        released
    }
}
