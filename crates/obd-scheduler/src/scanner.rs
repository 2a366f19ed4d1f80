//! Bus Scanner
//!
//! Sweeps the 11-bit CAN diagnostic header range looking for modules that
//! answer a `0100` probe, reads stored and pending trouble codes from each
//! module found, then requests readiness test results and the VIN from the
//! primary module. Live polling is suspended for the whole run.

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::modules::ModuleInfo;
use crate::poller::LivePoller;
use crate::state::{DtcKind, DtcRecord, ScanStage, SharedState};
use obd_protocol::dtc::{has_response_mode, is_no_codes, parse_dtc};
use obd_protocol::vin::parse_vin;
use obd_protocol::{mode, Command, ModuleHeader, Response};
use obd_transport::Session;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Supported-PIDs request sent after each header change to detect a module
const PRESENCE_PID: u8 = 0x00;

/// Outcome of a completed scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    /// Modules that answered, in header order
    pub modules: Vec<ModuleInfo>,
    /// Non-empty trouble-code replies, one record per module and kind
    pub dtcs: Vec<DtcRecord>,
    /// Headers visited by the sweep
    pub headers_probed: usize,
    /// VIN read from the primary module
    pub vin: Option<String>,
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Full bus scan over a connected session
pub struct BusScanner {
    session: Arc<Session>,
    state: SharedState,
    poller: Arc<LivePoller>,
    config: ScanConfig,
    running: AtomicBool,
}

impl BusScanner {
    /// Create an idle scanner; `poller` is paused while a scan runs
    pub fn new(
        session: Arc<Session>,
        state: SharedState,
        poller: Arc<LivePoller>,
        config: ScanConfig,
    ) -> Self {
        Self {
            session,
            state,
            poller,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one full scan.
    ///
    /// Live polling is resumed when the scan completes. A scan aborted by a
    /// lost connection leaves polling stopped and the stage back at idle.
    pub async fn run(&self) -> Result<ScanSummary, ScanError> {
        if !self.session.is_connected() {
            return Err(ScanError::NotConnected);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ScanError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        let protocol = self.session.config().protocol;
        if !protocol.supports_header_sweep() {
            warn!("Protocol {:?} may not honour 11-bit headers, sweep results may be empty", protocol);
        }

        let headers = self.config.headers();
        {
            let mut state = self.state.write();
            state.begin_scan(headers.len());
            state.log(format!("Starting bus scan of {} headers", headers.len()));
        }
        // Stage is set first so a tick racing with stop() sends nothing
        self.poller.stop().await;
        info!("Bus scan started ({} headers)", headers.len());

        match self.scan(&headers).await {
            Ok(summary) => {
                {
                    let mut state = self.state.write();
                    state.finish_scan();
                    state.log(format!(
                        "Scan complete: {} modules, {} fault records",
                        summary.modules.len(),
                        summary.dtcs.len()
                    ));
                }
                info!(
                    "Bus scan complete: {} modules, {} fault records",
                    summary.modules.len(),
                    summary.dtcs.len()
                );
                self.poller.start().await;
                Ok(summary)
            }
            Err(e) => {
                {
                    let mut state = self.state.write();
                    state.scan.stage = ScanStage::Idle;
                    state.log(format!("Scan aborted: {}", e));
                }
                warn!("Bus scan aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn scan(&self, headers: &[ModuleHeader]) -> Result<ScanSummary, ScanError> {
        let mut summary = ScanSummary {
            headers_probed: headers.len(),
            ..ScanSummary::default()
        };

        for (idx, header) in headers.iter().enumerate() {
            self.state.write().scan.current = idx + 1;

            self.request(Command::set_header(*header), self.config.header_timeout())
                .await?;
            let presence = Command::new(mode::request(mode::CURRENT_DATA, Some(PRESENCE_PID)));
            let reply = self.request(presence, self.config.probe_timeout()).await?;
            let found = reply.payload().is_some_and(module_responded);
            if !found {
                continue;
            }

            let module = ModuleInfo::new(*header);
            debug!("Module {} answered at {}", module.name, header);
            {
                let mut state = self.state.write();
                state.log(format!("FOUND: {}", module.name));
                state.modules.push(module.clone());
            }

            for kind in [DtcKind::Stored, DtcKind::Pending] {
                let reply = self.request(Command::new(kind.request()), self.config.dtc_timeout()).await?;
                if let Some(record) = reply.payload().and_then(|p| dtc_record(&module, kind, p)) {
                    {
                        let mut state = self.state.write();
                        state.log(format!(
                            "FAULT: {} {}: {}",
                            record.module,
                            record.kind,
                            record.codes.join(", ")
                        ));
                        state.dtcs.push(record.clone());
                    }
                    summary.dtcs.push(record);
                }
            }
            summary.modules.push(module);
        }

        self.state.write().scan.stage = ScanStage::MonitorsAndVin;
        summary.vin = self.finalize().await?;
        Ok(summary)
    }

    /// Readiness, test results and VIN from the primary module
    async fn finalize(&self) -> Result<Option<String>, ScanError> {
        let default_timeout = self.session.config().response_timeout();

        self.request(Command::set_header(self.config.primary_header), default_timeout)
            .await?;
        self.request(Command::new(mode::request(mode::O2_MONITORING, None)), default_timeout)
            .await?;
        self.request(
            Command::new(mode::request(mode::TEST_RESULTS, Some(0x01))),
            self.config.test_results_timeout(),
        )
        .await?;
        self.request(Command::new(mode::request(mode::CONTROL, None)), default_timeout)
            .await?;
        let vin_reply = self
            .request(
                Command::new(mode::request(mode::VEHICLE_INFO, Some(0x02))),
                default_timeout,
            )
            .await?;

        let vin = vin_reply.payload().and_then(parse_vin);
        if let Some(vin) = &vin {
            self.state.write().vin = Some(vin.clone());
        }
        Ok(vin)
    }

    async fn request(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<Response, ScanError> {
        Ok(self.session.send(command.with_timeout(timeout)).await?)
    }
}

/// Presence heuristic: any Mode 01 positive byte or a reply longer than
/// two bytes counts as a module
fn module_responded(payload: &str) -> bool {
    payload.contains("41") || payload.len() > 4
}

fn dtc_record(module: &ModuleInfo, kind: DtcKind, payload: &str) -> Option<DtcRecord> {
    if !has_response_mode(payload, &kind.response_mode()) || is_no_codes(payload) {
        return None;
    }
    let codes = parse_dtc(payload);
    if codes.is_empty() {
        return None;
    }
    Some(DtcRecord {
        header: module.header,
        module: module.name.clone(),
        kind,
        codes,
    })
}
