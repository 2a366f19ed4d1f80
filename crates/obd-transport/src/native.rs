//! Native BLE backend on `bluest`

use crate::error::TransportError;
use crate::link::{
    BleAdapter, CharacteristicInfo, CharacteristicProperties, CharacteristicRef, DeviceInfo,
    GattLink, LinkEvent, ServiceInfo, WriteMode,
};
use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device};
use futures::future::{AbortHandle, Abortable};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Host adapter backed by the platform Bluetooth stack
pub struct BluestAdapter {
    adapter: Adapter,
    scan_abort: Mutex<Option<AbortHandle>>,
    discovered: Arc<Mutex<Vec<DeviceInfo>>>,
    devices: Arc<Mutex<HashMap<String, Device>>>,
}

impl BluestAdapter {
    /// Open the default adapter and wait until it is powered on
    pub async fn new() -> Result<Self, TransportError> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| TransportError::AdapterUnavailable("no Bluetooth adapter".into()))?;
        adapter
            .wait_available()
            .await
            .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;

        Ok(Self {
            adapter,
            scan_abort: Mutex::new(None),
            discovered: Arc::new(Mutex::new(Vec::new())),
            devices: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn device(&self, device_id: &str) -> Result<Device, TransportError> {
        self.devices
            .lock()
            .get(device_id)
            .cloned()
            .ok_or_else(|| TransportError::ConnectFailed(format!("unknown device {}", device_id)))
    }
}

#[async_trait]
impl BleAdapter for BluestAdapter {
    async fn start_scan(&self) -> Result<(), TransportError> {
        self.stop_scan().await?;
        self.discovered.lock().clear();
        self.devices.lock().clear();

        let adapter = self.adapter.clone();
        let discovered = Arc::clone(&self.discovered);
        let devices = Arc::clone(&self.devices);
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        *self.scan_abort.lock() = Some(abort_handle);
        let (started_tx, started_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut stream = match adapter.scan(&[]).await {
                Ok(stream) => {
                    let _ = started_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    warn!("BLE scan failed to start: {}", e);
                    let _ = started_tx.send(Err(TransportError::Scan(e.to_string())));
                    return;
                }
            };
            let collect = async move {
                while let Some(found) = stream.next().await {
                    let id = found.device.id().to_string();
                    let info = DeviceInfo {
                        id: id.clone(),
                        name: found.device.name().ok(),
                        rssi: found.rssi,
                    };

                    let mut seen = discovered.lock();
                    match seen.iter_mut().find(|d| d.id == id) {
                        Some(known) => *known = info,
                        None => {
                            debug!("Discovered {} ({:?})", id, info.name);
                            seen.push(info);
                        }
                    }
                    devices.lock().insert(id, found.device);
                }
            };
            let _ = Abortable::new(collect, abort_registration).await;
        });

        started_rx
            .await
            .unwrap_or_else(|_| Err(TransportError::Scan("scan task ended".into())))
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        if let Some(handle) = self.scan_abort.lock().take() {
            handle.abort();
        }
        Ok(())
    }

    fn discovered(&self) -> Vec<DeviceInfo> {
        self.discovered.lock().clone()
    }

    async fn connect(&self, device_id: &str) -> Result<Arc<dyn GattLink>, TransportError> {
        let device = self.device(device_id)?;
        self.adapter
            .connect_device(&device)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        info!("GATT connection to {} established", device_id);

        Ok(Arc::new(BluestLink {
            adapter: self.adapter.clone(),
            device,
            device_id: device_id.to_string(),
            characteristics: Mutex::new(HashMap::new()),
        }))
    }

    async fn cancel_connection(&self, device_id: &str) -> Result<(), TransportError> {
        let device = self.device(device_id)?;
        self.adapter
            .disconnect_device(&device)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))
    }
}

/// GATT connection through `bluest`
pub struct BluestLink {
    adapter: Adapter,
    device: Device,
    device_id: String,
    characteristics: Mutex<HashMap<CharacteristicRef, Characteristic>>,
}

impl BluestLink {
    fn characteristic(&self, target: &CharacteristicRef) -> Result<Characteristic, TransportError> {
        self.characteristics
            .lock()
            .get(target)
            .cloned()
            .ok_or_else(|| TransportError::Discovery(format!("unknown characteristic {}", target.characteristic)))
    }
}

#[async_trait]
impl GattLink for BluestLink {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, TransportError> {
        let discovery = |e: bluest::Error| TransportError::Discovery(e.to_string());
        let services = self.device.discover_services().await.map_err(discovery)?;

        let mut topology = Vec::with_capacity(services.len());
        let mut handles = HashMap::new();
        for service in services {
            let mut characteristics = Vec::new();
            for characteristic in service.discover_characteristics().await.map_err(discovery)? {
                let props = characteristic.properties().await.map_err(discovery)?;
                let info = CharacteristicInfo {
                    uuid: characteristic.uuid(),
                    properties: CharacteristicProperties {
                        read: props.read,
                        write: props.write,
                        write_without_response: props.write_without_response,
                        notify: props.notify,
                        indicate: props.indicate,
                    },
                };
                handles.insert(
                    CharacteristicRef {
                        service: service.uuid(),
                        characteristic: info.uuid,
                    },
                    characteristic,
                );
                characteristics.push(info);
            }
            topology.push(ServiceInfo {
                uuid: service.uuid(),
                characteristics,
            });
        }

        debug!("{} exposes {} services", self.device_id, topology.len());
        *self.characteristics.lock() = handles;
        Ok(topology)
    }

    async fn write(
        &self,
        target: &CharacteristicRef,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic(target)?;
        let result = match mode {
            WriteMode::WithoutResponse => characteristic.write_without_response(data).await,
            WriteMode::WithResponse => characteristic.write(data).await,
        };
        result.map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn subscribe(
        &self,
        target: &CharacteristicRef,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, TransportError> {
        let characteristic = self.characteristic(target)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let notifications = tx.clone();
        tokio::spawn(async move {
            let mut stream = match characteristic.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = notifications.send(LinkEvent::Disconnected(e.to_string()));
                    return;
                }
            };
            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(bytes) => LinkEvent::Notification(bytes),
                    Err(e) => LinkEvent::Disconnected(e.to_string()),
                };
                if notifications.send(event).is_err() {
                    break;
                }
            }
        });

        let adapter = self.adapter.clone();
        let device = self.device.clone();
        tokio::spawn(async move {
            let mut events = match adapter.device_connection_events(&device).await {
                Ok(events) => events,
                Err(e) => {
                    debug!("Connection events unavailable: {}", e);
                    return;
                }
            };
            while let Some(event) = events.next().await {
                if matches!(event, bluest::ConnectionEvent::Disconnected) {
                    let _ = tx.send(LinkEvent::Disconnected("device disconnected".into()));
                    break;
                }
            }
        });

        Ok(rx)
    }
}
