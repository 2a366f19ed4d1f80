//! Subcommand implementations

use crate::config::AppConfig;
use anyhow::{bail, Context, Result};
use obd_protocol::Response;
use obd_scheduler::{spawn_monitor, BusScanner, DiagnosticState, LivePoller, ScanSummary, SharedState};
use obd_transport::{BleAdapter, ConnectionManager, DeviceInfo, Session};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Advertised names of common ELM327 dongles
const ADAPTER_NAMES: [&str; 4] = ["OBD", "ELM", "VLINK", "V-LINK"];

/// Session, poller and scanner wired together over one adapter
pub struct Diagnostics {
    pub manager: Arc<ConnectionManager>,
    pub state: SharedState,
    pub poller: Arc<LivePoller>,
    pub scanner: BusScanner,
    monitor: JoinHandle<()>,
}

impl Diagnostics {
    pub fn new(adapter: Arc<dyn BleAdapter>, config: &AppConfig) -> Self {
        let session = Session::new(config.transport.clone());
        let manager = ConnectionManager::new(adapter, session.clone());
        let state = DiagnosticState::shared();
        let poller = LivePoller::new(session.clone(), state.clone(), config.poll.clone());
        let scanner = BusScanner::new(
            session.clone(),
            state.clone(),
            poller.clone(),
            config.scan.clone(),
        );
        let monitor = spawn_monitor(&session, state.clone(), poller.clone());

        Self {
            manager,
            state,
            poller,
            scanner,
            monitor,
        }
    }

    /// Scan and connect to `requested`, or to the first likely adapter
    pub async fn connect(&self, requested: Option<&str>) -> Result<String> {
        let devices = self.manager.scan_devices().await?;
        let device = pick_device(&devices, requested)?;
        info!("Connecting to {}", device);
        self.manager
            .connect(&device)
            .await
            .with_context(|| format!("connecting to {}", device))?;
        Ok(device)
    }

    pub async fn shutdown(self) -> Result<()> {
        self.poller.stop().await;
        self.manager.disconnect().await?;
        self.monitor.abort();
        Ok(())
    }
}

fn pick_device(devices: &[DeviceInfo], requested: Option<&str>) -> Result<String> {
    if let Some(id) = requested {
        if devices.iter().any(|d| d.id == id) {
            return Ok(id.to_string());
        }
        bail!("device {} not found during scan", id);
    }

    let likely = devices.iter().find(|d| {
        d.name.as_deref().is_some_and(|name| {
            let upper = name.to_ascii_uppercase();
            ADAPTER_NAMES.iter().any(|n| upper.contains(n))
        })
    });
    match likely.or_else(|| devices.first()) {
        Some(device) => Ok(device.id.clone()),
        None => bail!("no BLE devices found"),
    }
}

/// Snapshot printed by `live`
#[derive(Debug, Serialize)]
pub struct LiveReport {
    pub device_id: String,
    pub state: DiagnosticState,
}

/// Snapshot printed by `diagnose`
#[derive(Debug, Serialize)]
pub struct DiagnosisReport {
    pub device_id: String,
    pub summary: ScanSummary,
    pub state: DiagnosticState,
}

/// Reply printed by `send`
#[derive(Debug, Serialize)]
pub struct SendReport {
    pub device_id: String,
    pub command: String,
    pub response: Response,
}

pub async fn scan_devices(adapter: Arc<dyn BleAdapter>, config: &AppConfig) -> Result<Vec<DeviceInfo>> {
    let diagnostics = Diagnostics::new(adapter, config);
    let devices = diagnostics.manager.scan_devices().await?;
    diagnostics.monitor.abort();
    Ok(devices)
}

/// Connect and poll live data for `duration`, or until Ctrl-C
pub async fn live(
    adapter: Arc<dyn BleAdapter>,
    config: &AppConfig,
    device: Option<&str>,
    duration: Duration,
) -> Result<LiveReport> {
    let diagnostics = Diagnostics::new(adapter, config);
    let device_id = diagnostics.connect(device).await?;

    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    let state = diagnostics.state.read().clone();
    diagnostics.shutdown().await?;
    Ok(LiveReport { device_id, state })
}

/// Connect and run a full bus scan
pub async fn diagnose(
    adapter: Arc<dyn BleAdapter>,
    config: &AppConfig,
    device: Option<&str>,
) -> Result<DiagnosisReport> {
    let diagnostics = Diagnostics::new(adapter, config);
    let device_id = diagnostics.connect(device).await?;

    let summary = diagnostics.scanner.run().await.context("bus scan failed")?;
    // Let the monitor apply the last replies
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = diagnostics.state.read().clone();
    diagnostics.shutdown().await?;
    Ok(DiagnosisReport {
        device_id,
        summary,
        state,
    })
}

/// Connect and send one raw command with live polling stopped
pub async fn send(
    adapter: Arc<dyn BleAdapter>,
    config: &AppConfig,
    device: Option<&str>,
    text: &str,
) -> Result<SendReport> {
    let diagnostics = Diagnostics::new(adapter, config);
    let device_id = diagnostics.connect(device).await?;
    diagnostics.poller.stop().await;

    let outcome = diagnostics.manager.session().send_text(text).await;
    diagnostics.shutdown().await?;
    let response = outcome.with_context(|| format!("sending {:?}", text))?;

    Ok(SendReport {
        device_id,
        command: text.trim().to_ascii_uppercase(),
        response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::{ModuleHeader, MonitorStatus};
    use obd_scheduler::ScanConfig;
    use obd_transport::mock::{EcuScript, Elm327Script, MockAdapter, MOCK_DEVICE_ID};
    use obd_transport::{LinkState, TransportError};

    fn config() -> AppConfig {
        AppConfig {
            scan: ScanConfig {
                first_header: ModuleHeader::ENGINE,
                last_header: "7E2".parse().unwrap(),
                ..ScanConfig::default()
            },
            ..AppConfig::default()
        }
    }

    fn device(id: &str, name: Option<&str>) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: name.map(String::from),
            rssi: None,
        }
    }

    #[test]
    fn test_pick_device() {
        let devices = vec![device("a", Some("Headphones")), device("b", Some("vLink BLE"))];
        assert_eq!(pick_device(&devices, None).unwrap(), "b");
        assert_eq!(pick_device(&devices, Some("a")).unwrap(), "a");
        assert!(pick_device(&devices, Some("c")).is_err());
        assert_eq!(pick_device(&devices[..1], None).unwrap(), "a");
        assert!(pick_device(&[], None).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_collects_data() {
        let adapter = Arc::new(MockAdapter::new(Elm327Script::default()));
        let report = live(adapter.clone(), &config(), None, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(report.device_id, MOCK_DEVICE_ID);
        assert_eq!(report.state.link, LinkState::Connected);
        assert_eq!(report.state.live_data["010C"].value, 1726.0);
        assert_eq!(report.state.emissions.misfire, MonitorStatus::Ok);
        assert_eq!(adapter.cancelled(), vec![MOCK_DEVICE_ID.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_diagnose_reports_faults() {
        let script = Elm327Script::default()
            .with_ecu(0x7E2, EcuScript::default().with_stored("430420"));
        let adapter = Arc::new(MockAdapter::new(script));
        let report = diagnose(adapter, &config(), Some(MOCK_DEVICE_ID)).await.unwrap();

        assert_eq!(report.summary.modules.len(), 2);
        assert_eq!(report.summary.dtcs[0].codes, vec!["P0420"]);
        assert_eq!(report.state.vin.as_deref(), Some("1G1JC5444R7252367"));
        assert_eq!(report.state.test_results.len(), 1);
        assert!(report.state.scan.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_raw_command() {
        let script = Elm327Script::default().with_reply("0120", "412080000000");
        let adapter = Arc::new(MockAdapter::new(script));

        let report = send(adapter.clone(), &config(), None, "0120").await.unwrap();
        assert_eq!(report.command, "0120");
        assert_eq!(report.response, Response::Payload("412080000000".into()));
        assert_eq!(adapter.cancelled(), vec![MOCK_DEVICE_ID.to_string()]);

        let adapter = Arc::new(MockAdapter::new(Elm327Script::default()));
        assert!(send(adapter, &config(), None, "").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_failure_propagates() {
        let adapter = Arc::new(MockAdapter::new(Elm327Script::default()).fail_scan("powered off"));
        let error = scan_devices(adapter, &config()).await.unwrap_err();
        assert_eq!(
            error.downcast_ref::<TransportError>(),
            Some(&TransportError::Scan("powered off".into()))
        );
    }
}
