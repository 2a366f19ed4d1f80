//! Mock BLE Adapter
//!
//! Scripted ELM327 behind the [`BleAdapter`] / [`GattLink`] traits, for
//! tests and for running the tools without hardware. Modules are keyed by
//! CAN header; a header with no module stays silent unless an absent reply
//! is configured.

use crate::error::TransportError;
use crate::link::{
    BleAdapter, CharacteristicInfo, CharacteristicProperties, CharacteristicRef, DeviceInfo,
    GattLink, LinkEvent, ServiceInfo, WriteMode,
};
use async_trait::async_trait;
use obd_protocol::{at, ModuleHeader};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Reset banner of the emulated adapter
pub const BANNER: &str = "ELM327 v1.5";

/// Device id of the default mock dongle
pub const MOCK_DEVICE_ID: &str = "mock-elm327";

const END_OF_REPLY: &str = "\r\r>";

/// Replies of one emulated module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcuScript {
    /// Reply to the `0100` probe
    pub supported: String,
    /// Reply to Mode 03
    pub stored: String,
    /// Reply to Mode 07
    pub pending: String,
}

impl Default for EcuScript {
    fn default() -> Self {
        Self {
            supported: "4100BE3EB811".into(),
            stored: "4300".into(),
            pending: "4700".into(),
        }
    }
}

impl EcuScript {
    pub fn with_stored(mut self, reply: &str) -> Self {
        self.stored = reply.into();
        self
    }

    pub fn with_pending(mut self, reply: &str) -> Self {
        self.pending = reply.into();
        self
    }
}

/// Behavior of the emulated adapter and vehicle
#[derive(Debug, Clone)]
pub struct Elm327Script {
    /// Modules present on the bus
    pub ecus: BTreeMap<u16, EcuScript>,
    /// Replies of the primary engine ECU to other commands
    pub replies: HashMap<String, String>,
    /// Reply sent for commands addressed to an absent module
    pub absent_reply: Option<String>,
    /// Commands that never get a reply
    pub silent: HashSet<String>,
}

impl Default for Elm327Script {
    fn default() -> Self {
        let replies = [
            ("0101", "410100076500"),
            ("0104", "41047F"),
            ("0105", "41057B"),
            ("010C", "410C1AF8"),
            ("010D", "410D32"),
            ("010F", "410F44"),
            ("0110", "41100190"),
            ("0111", "41114C"),
            ("012F", "412F80"),
            ("0133", "413365"),
            ("0142", "414230D4"),
            ("0143", "41430100"),
            ("015C", "415C78"),
            ("05", "NO DATA"),
            ("0601", "460111006400320096"),
            ("08", "NO DATA"),
            (
                "0902",
                "014\r0:490201314731\r1:4A433534343452\r2:37323532333637",
            ),
        ]
        .into_iter()
        .map(|(cmd, reply)| (cmd.to_string(), reply.to_string()))
        .collect();

        Self {
            ecus: BTreeMap::from([(ModuleHeader::ENGINE.value(), EcuScript::default())]),
            replies,
            absent_reply: None,
            silent: HashSet::new(),
        }
    }
}

impl Elm327Script {
    /// Add or replace a module
    pub fn with_ecu(mut self, header: u16, ecu: EcuScript) -> Self {
        self.ecus.insert(header, ecu);
        self
    }

    /// Set the primary ECU's reply to a command
    pub fn with_reply(mut self, command: &str, reply: &str) -> Self {
        self.replies.insert(command.into(), reply.into());
        self
    }

    /// Make absent modules answer instead of staying silent
    pub fn with_absent_reply(mut self, reply: &str) -> Self {
        self.absent_reply = Some(reply.into());
        self
    }

    /// Never answer `command`
    pub fn with_silent(mut self, command: &str) -> Self {
        self.silent.insert(command.into());
        self
    }
}

/// Adapter state driven by the received commands
#[derive(Debug)]
struct Elm327 {
    script: Elm327Script,
    /// `None` until `ATSH`; functional requests are answered by the engine ECU
    header: Option<u16>,
}

impl Elm327 {
    fn new(script: Elm327Script) -> Self {
        Self { script, header: None }
    }

    fn respond(&mut self, command: &str) -> Option<String> {
        if self.script.silent.contains(command) {
            return None;
        }

        if command == at::RESET {
            self.header = None;
            return Some(format!("{}{}", BANNER, END_OF_REPLY));
        }
        if let Some(header) = command.strip_prefix(at::SET_HEADER) {
            self.header = u16::from_str_radix(header.trim(), 16).ok();
            return Some(format!("OK{}", END_OF_REPLY));
        }
        if command.starts_with("AT") {
            return Some(format!("OK{}", END_OF_REPLY));
        }

        let header = self.header.unwrap_or(ModuleHeader::ENGINE.value());
        let Some(ecu) = self.script.ecus.get(&header) else {
            return self
                .script
                .absent_reply
                .as_ref()
                .map(|reply| format!("{}{}", reply, END_OF_REPLY));
        };

        let payload = match command {
            "0100" => ecu.supported.clone(),
            "03" => ecu.stored.clone(),
            "07" => ecu.pending.clone(),
            other if header == ModuleHeader::ENGINE.value() => {
                self.script.replies.get(other)?.clone()
            }
            _ => "NO DATA".to_string(),
        };
        Some(format!("{}{}", payload, END_OF_REPLY))
    }
}

/// Transport quirks of a mock link
#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    /// Delay between a write and its reply
    pub response_delay: Duration,
    /// Split replies into notifications of at most this many bytes
    pub fragment_size: Option<usize>,
    /// Write modes that fail
    pub failing_modes: HashSet<WriteMode>,
}

/// Default GATT layout of an ELM327 BLE clone: a vendor `FFF0` service with
/// `FFF1` notify and `FFF2` write, next to the generic access service
pub fn elm327_topology() -> Vec<ServiceInfo> {
    vec![
        ServiceInfo {
            uuid: sig_uuid(0x1800),
            characteristics: vec![CharacteristicInfo {
                uuid: sig_uuid(0x2A00),
                properties: CharacteristicProperties {
                    read: true,
                    ..Default::default()
                },
            }],
        },
        ServiceInfo {
            uuid: sig_uuid(0xFFF0),
            characteristics: vec![
                CharacteristicInfo {
                    uuid: sig_uuid(0xFFF1),
                    properties: CharacteristicProperties {
                        notify: true,
                        ..Default::default()
                    },
                },
                CharacteristicInfo {
                    uuid: sig_uuid(0xFFF2),
                    properties: CharacteristicProperties {
                        write: true,
                        write_without_response: true,
                        ..Default::default()
                    },
                },
            ],
        },
    ]
}

/// 16-bit UUID on the Bluetooth base UUID
fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128((u128::from(short) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

/// One mock GATT connection
pub struct MockLink {
    device_id: String,
    topology: Vec<ServiceInfo>,
    elm: Mutex<Elm327>,
    options: Mutex<LinkOptions>,
    subscriber: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    connected: AtomicBool,
    writes: Mutex<Vec<String>>,
    attempts: Mutex<Vec<(String, WriteMode)>>,
}

impl MockLink {
    pub fn new(device_id: &str, script: Elm327Script, options: LinkOptions) -> Self {
        Self {
            device_id: device_id.to_string(),
            topology: elm327_topology(),
            elm: Mutex::new(Elm327::new(script)),
            options: Mutex::new(options),
            subscriber: Mutex::new(None),
            connected: AtomicBool::new(true),
            writes: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Replace the advertised GATT layout
    pub fn with_topology(mut self, topology: Vec<ServiceInfo>) -> Self {
        self.topology = topology;
        self
    }

    /// Commands written successfully, in order
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    /// Every write attempt with its mode, including failed ones
    pub fn write_attempts(&self) -> Vec<(String, WriteMode)> {
        self.attempts.lock().clone()
    }

    /// Change the write modes that fail
    pub fn set_failing_modes(&self, modes: HashSet<WriteMode>) {
        self.options.lock().failing_modes = modes;
    }

    /// Deliver raw text as if the adapter had sent it
    pub fn inject(&self, text: &str) {
        self.deliver(LinkEvent::Notification(text.as_bytes().to_vec()));
    }

    /// Drop the link as if the adapter went out of range
    pub fn simulate_drop(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.deliver(LinkEvent::Disconnected(reason.to_string()));
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.subscriber.lock().take();
    }

    fn deliver(&self, event: LinkEvent) {
        if let Some(tx) = self.subscriber.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn schedule_reply(&self, reply: String) {
        let Some(tx) = self.subscriber.lock().clone() else {
            return;
        };
        let (delay, fragment_size) = {
            let options = self.options.lock();
            (options.response_delay, options.fragment_size)
        };

        let fragments: Vec<Vec<u8>> = match fragment_size {
            Some(size) if size > 0 => reply.as_bytes().chunks(size).map(<[u8]>::to_vec).collect(),
            _ => vec![reply.into_bytes()],
        };

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            for fragment in fragments {
                if tx.send(LinkEvent::Notification(fragment)).is_err() {
                    break;
                }
            }
        });
    }
}

#[async_trait]
impl GattLink for MockLink {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Discovery("not connected".into()));
        }
        Ok(self.topology.clone())
    }

    async fn write(
        &self,
        _target: &CharacteristicRef,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let text = String::from_utf8_lossy(data)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.attempts.lock().push((text.clone(), mode));

        if !self.is_connected() {
            return Err(TransportError::Write("not connected".into()));
        }
        if self.options.lock().failing_modes.contains(&mode) {
            return Err(TransportError::Write(format!("{:?} rejected", mode)));
        }

        self.writes.lock().push(text.clone());
        let reply = self.elm.lock().respond(&text);
        debug!("Mock adapter: {} -> {:?}", text, reply);
        if let Some(reply) = reply {
            self.schedule_reply(reply);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        _target: &CharacteristicRef,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Subscribe("not connected".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.subscriber.lock() = Some(tx);
        Ok(rx)
    }
}

/// Mock host adapter advertising scripted dongles
pub struct MockAdapter {
    devices: Vec<DeviceInfo>,
    script: Elm327Script,
    options: LinkOptions,
    topology: Vec<ServiceInfo>,
    scanning: AtomicBool,
    discovered: Mutex<Vec<DeviceInfo>>,
    links: Mutex<HashMap<String, Arc<MockLink>>>,
    connect_error: Mutex<Option<TransportError>>,
    scan_error: Option<String>,
    cancelled: Mutex<Vec<String>>,
}

impl MockAdapter {
    /// Adapter advertising one dongle driven by `script`
    pub fn new(script: Elm327Script) -> Self {
        Self {
            devices: vec![DeviceInfo {
                id: MOCK_DEVICE_ID.to_string(),
                name: Some("OBDII".to_string()),
                rssi: Some(-58),
            }],
            script,
            options: LinkOptions::default(),
            topology: elm327_topology(),
            scanning: AtomicBool::new(false),
            discovered: Mutex::new(Vec::new()),
            links: Mutex::new(HashMap::new()),
            connect_error: Mutex::new(None),
            scan_error: None,
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Transport quirks applied to every link this adapter opens
    pub fn with_options(mut self, options: LinkOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_topology(mut self, topology: Vec<ServiceInfo>) -> Self {
        self.topology = topology;
        self
    }

    /// Refuse to scan, as a powered-off radio would
    pub fn fail_scan(mut self, reason: &str) -> Self {
        self.scan_error = Some(reason.to_string());
        self
    }

    /// Fail the next connection attempts with `error`
    pub fn fail_connect(&self, error: Option<TransportError>) {
        *self.connect_error.lock() = error;
    }

    /// Link opened for `device_id`
    pub fn link(&self, device_id: &str) -> Option<Arc<MockLink>> {
        self.links.lock().get(device_id).cloned()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Devices whose connection was cancelled, in order
    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    async fn start_scan(&self) -> Result<(), TransportError> {
        if let Some(reason) = &self.scan_error {
            return Err(TransportError::Scan(reason.clone()));
        }
        self.scanning.store(true, Ordering::SeqCst);
        *self.discovered.lock() = self.devices.clone();
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn discovered(&self) -> Vec<DeviceInfo> {
        self.discovered.lock().clone()
    }

    async fn connect(&self, device_id: &str) -> Result<Arc<dyn GattLink>, TransportError> {
        if let Some(error) = self.connect_error.lock().clone() {
            return Err(error);
        }
        if !self.devices.iter().any(|d| d.id == device_id) {
            return Err(TransportError::ConnectFailed(format!("unknown device {}", device_id)));
        }

        let link = Arc::new(
            MockLink::new(device_id, self.script.clone(), self.options.clone())
                .with_topology(self.topology.clone()),
        );
        self.links
            .lock()
            .insert(device_id.to_string(), Arc::clone(&link));
        Ok(link)
    }

    async fn cancel_connection(&self, device_id: &str) -> Result<(), TransportError> {
        if let Some(link) = self.links.lock().get(device_id) {
            link.close();
        }
        self.cancelled.lock().push(device_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::normalize;

    #[test]
    fn test_emulator_header_routing() {
        let script = Elm327Script::default().with_ecu(0x7E2, EcuScript::default().with_stored("43010101"));
        let mut elm = Elm327::new(script);

        assert_eq!(elm.respond("ATZ").as_deref(), Some("ELM327 v1.5\r\r>"));
        assert_eq!(elm.respond("03").as_deref(), Some("4300\r\r>"));
        assert_eq!(elm.respond("ATSH7E2").as_deref(), Some("OK\r\r>"));
        assert_eq!(elm.respond("03").as_deref(), Some("43010101\r\r>"));
        assert_eq!(elm.respond("ATSH7E5").as_deref(), Some("OK\r\r>"));
        assert_eq!(elm.respond("0100"), None);
    }

    #[test]
    fn test_emulator_absent_reply() {
        let mut elm = Elm327::new(Elm327Script::default().with_absent_reply("NO DATA"));
        elm.respond("ATSH700");
        assert_eq!(elm.respond("0100").as_deref(), Some("NO DATA\r\r>"));
    }

    #[test]
    fn test_emulator_vin_reply() {
        let mut elm = Elm327::new(Elm327Script::default());
        let reply = elm.respond("0902").unwrap();
        assert_eq!(
            normalize(&reply),
            "0144902013147314A43353434345237323532333637"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_delivers_reply() {
        let link = MockLink::new(MOCK_DEVICE_ID, Elm327Script::default(), LinkOptions::default());
        let topology = link.discover_services().await.unwrap();
        let target = CharacteristicRef {
            service: topology[1].uuid,
            characteristic: topology[1].characteristics[0].uuid,
        };
        let mut rx = link.subscribe(&target).await.unwrap();

        link.write(&target, b"010D\r", WriteMode::WithoutResponse).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(LinkEvent::Notification(b"410D32\r\r>".to_vec()))
        );

        link.simulate_drop("out of range");
        assert_eq!(rx.recv().await, Some(LinkEvent::Disconnected("out of range".into())));
        assert!(link.write(&target, b"010D\r", WriteMode::WithoutResponse).await.is_err());
    }
}
