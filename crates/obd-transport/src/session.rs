//! OBD Session
//!
//! Owns everything one adapter connection needs: the command queue, the
//! response correlator, the selected characteristics and the event channel.
//! The queue is the only writer to the TX characteristic; commands are
//! dispatched one at a time in submission order.

use crate::config::TransportConfig;
use crate::correlator::{Correlator, PendingId};
use crate::discovery::GattChannel;
use crate::error::TransportError;
use crate::event::SessionEvent;
use crate::link::GattLink;
use crate::queue::{CommandQueue, QueuePhase};
use obd_protocol::frame::{self, FrameAssembler};
use obd_protocol::{Command, Response};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// Marker of the adapter's "UNABLE TO CONNECT" reply, after normalization
const UNABLE_MARKER: &str = "UNABLE";

/// A submitted command and the channel its outcome goes to
struct QueuedCommand {
    command: Command,
    reply: oneshot::Sender<Result<Response, TransportError>>,
}

/// Link and characteristics of the current connection
#[derive(Clone)]
struct ActiveLink {
    link: Arc<dyn GattLink>,
    channel: GattChannel,
    generation: u64,
}

/// Session with one ELM327 adapter
pub struct Session {
    config: TransportConfig,
    queue: CommandQueue<QueuedCommand>,
    correlator: Mutex<Correlator>,
    active: RwLock<Option<ActiveLink>>,
    /// Bumped on every attach and teardown; stale link events carry an
    /// older value and are ignored
    generation: AtomicU64,
    assembler: Mutex<FrameAssembler>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Create a disconnected session
    pub fn new(config: TransportConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Arc::new(Self {
            config,
            queue: CommandQueue::new(),
            correlator: Mutex::new(Correlator::new()),
            active: RwLock::new(None),
            generation: AtomicU64::new(0),
            assembler: Mutex::new(FrameAssembler::new()),
            events,
        })
    }

    /// Settings the session was created with
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Whether a link is attached
    pub fn is_connected(&self) -> bool {
        self.active.read().is_some()
    }

    /// Identifier of the attached device
    pub fn device_id(&self) -> Option<String> {
        self.active
            .read()
            .as_ref()
            .map(|active| active.link.device_id().to_string())
    }

    /// Attach a subscribed link, returning the new generation
    pub fn attach(&self, link: Arc<dyn GattLink>, channel: GattChannel) -> u64 {
        let mut active = self.active.write();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.assembler.lock().clear();
        info!(
            "Session attached to {} (TX {} {:?})",
            link.device_id(),
            channel.tx.characteristic,
            channel.write_mode
        );
        *active = Some(ActiveLink {
            link,
            channel,
            generation,
        });
        generation
    }

    /// Whether `generation` still names the attached link
    pub fn is_current(&self, generation: u64) -> bool {
        self.active.read().is_some() && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Tear the session down synchronously.
    ///
    /// Detaches the link, rejects every queued command with
    /// [`TransportError::Disconnected`] and drops every pending response,
    /// which settles the in-flight command with the same error. Returns the
    /// detached link, if there was one.
    pub fn teardown(&self) -> Option<Arc<dyn GattLink>> {
        // Correlator cleared under the link lock, pairs with `register`
        let mut active = self.active.write();
        let detached = active.take();
        self.generation.fetch_add(1, Ordering::SeqCst);
        let dropped = self.correlator.lock().clear();
        drop(active);

        let queued = self.queue.drain_all();
        let rejected = queued.len();
        for item in queued {
            let _ = item.reply.send(Err(TransportError::Disconnected));
        }
        self.assembler.lock().clear();

        if detached.is_some() || rejected > 0 || dropped > 0 {
            info!(
                "Session torn down: {} queued commands rejected, {} pending responses dropped",
                rejected, dropped
            );
        }
        detached.map(|active| active.link)
    }

    /// Queue a command and wait for its outcome.
    ///
    /// Resolves with [`Response::Timeout`] when no matching notification
    /// arrives in time; fails with [`TransportError::Disconnected`] when the
    /// session has no link or loses it before the command settles.
    pub async fn send(self: &Arc<Self>, command: Command) -> Result<Response, TransportError> {
        let (reply, rx) = oneshot::channel();
        if self.queue.push(QueuedCommand { command, reply }) {
            let session = Arc::clone(self);
            tokio::spawn(async move { session.drain().await });
        }
        rx.await.unwrap_or(Err(TransportError::Disconnected))
    }

    /// Parse `text` as a raw adapter command and [`send`](Self::send) it
    pub async fn send_text(self: &Arc<Self>, text: &str) -> Result<Response, TransportError> {
        let command = Command::parse(text)?;
        self.send(command).await
    }

    async fn drain(self: Arc<Self>) {
        while let Some(QueuedCommand { command, reply }) = self.queue.pop() {
            let active = self.active.read().clone();
            let Some(active) = active else {
                debug!("Dropping {}: not connected", command);
                let _ = reply.send(Err(TransportError::Disconnected));
                continue;
            };

            let outcome = self.dispatch(&active, &command).await;
            let _ = reply.send(outcome);

            tokio::time::sleep(self.config.inter_command_delay()).await;
        }
    }

    async fn dispatch(
        &self,
        active: &ActiveLink,
        command: &Command,
    ) -> Result<Response, TransportError> {
        if !command.expects_response() {
            self.transmit(active, command).await;
            tokio::time::sleep(self.config.settle_delay()).await;
            return Ok(Response::Acknowledged);
        }

        // Registered before writing so a fast reply cannot slip past
        let Some((id, mut rx)) = self.register(active, command) else {
            debug!("Dropping {}: link detached before dispatch", command);
            return Err(TransportError::Disconnected);
        };
        self.transmit(active, command).await;

        let wait = command
            .timeout()
            .unwrap_or_else(|| self.config.response_timeout());
        match tokio::time::timeout(wait, &mut rx).await {
            Ok(Ok(payload)) => Ok(Response::Payload(payload)),
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => {
                if self.correlator.lock().cancel(id) {
                    debug!("RX <- (No Data / Timeout) for {}", command);
                    self.emit(SessionEvent::NoResponse {
                        command: command.text().to_string(),
                    });
                    return Ok(Response::Timeout);
                }
                // A notification resolved the entry as the timer fired
                match rx.try_recv() {
                    Ok(payload) => Ok(Response::Payload(payload)),
                    Err(_) => Err(TransportError::Disconnected),
                }
            }
        }
    }

    /// Register a pending response, provided `active` is still the
    /// attached link
    fn register(
        &self,
        active: &ActiveLink,
        command: &Command,
    ) -> Option<(PendingId, oneshot::Receiver<String>)> {
        let current = self.active.read();
        let attached = current
            .as_ref()
            .is_some_and(|now| now.generation == active.generation);
        if !attached {
            return None;
        }
        Some(
            self.correlator
                .lock()
                .register(command.text(), command.matcher().clone()),
        )
    }

    async fn transmit(&self, active: &ActiveLink, command: &Command) {
        let bytes = command.encode();
        let target = active.channel.tx;
        let mode = active.channel.write_mode;
        debug!("TX -> {}", command);

        if let Err(first) = active.link.write(&target, &bytes, mode).await {
            let fallback = mode.fallback();
            debug!("Write {:?} of {} failed ({}), retrying {:?}", mode, command, first, fallback);
            if let Err(second) = active.link.write(&target, &bytes, fallback).await {
                warn!("Write of {} failed in both modes, treating as sent: {}", command, second);
                self.emit(SessionEvent::WriteFailed {
                    command: command.text().to_string(),
                    error: second.to_string(),
                });
            }
        }

        self.emit(SessionEvent::Transmitted {
            command: command.text().to_string(),
        });
    }

    /// Feed the raw value of one RX notification
    pub fn handle_notification(&self, bytes: &[u8]) {
        let text = frame::decode_notification(bytes);
        self.handle_text(&text);
    }

    /// Feed one RX notification in the base64 form of mobile BLE bindings
    pub fn handle_base64_notification(&self, value: &str) {
        if let Some(text) = frame::decode_notification_base64(value) {
            self.handle_text(&text);
        }
    }

    fn handle_text(&self, text: &str) {
        if text.is_empty() {
            return;
        }

        if self.config.reassemble_frames {
            let frames = self.assembler.lock().push(text);
            for raw in frames {
                self.process_frame(&raw);
            }
        } else {
            self.process_frame(text);
        }
    }

    fn process_frame(&self, raw: &str) {
        let clean = frame::normalize(raw);
        if clean.is_empty() || clean.contains(UNABLE_MARKER) {
            debug!("Ignoring frame {:?}", raw);
            return;
        }

        let resolved = self.correlator.lock().notify(&clean);
        debug!("RX <- {} ({} resolved)", clean, resolved);
        self.emit(SessionEvent::Received {
            raw: raw.to_string(),
            frame: clean,
        });
    }

    /// Number of commands waiting for a response
    pub fn pending_count(&self) -> usize {
        self.correlator.lock().len()
    }

    /// Number of commands waiting to be dispatched
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Whether a drain loop is running
    pub fn queue_phase(&self) -> QueuePhase {
        self.queue.phase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::select_channel;
    use crate::link::{LinkEvent, WriteMode};
    use crate::mock::{Elm327Script, LinkOptions, MockLink};
    use obd_protocol::{ObdError, ResponseMatcher};
    use std::time::Duration;

    async fn attach_mock(session: &Arc<Session>, link: Arc<MockLink>) -> u64 {
        let services = link.discover_services().await.unwrap();
        let channel = select_channel(&services).unwrap();
        let mut events = link.subscribe(&channel.rx).await.unwrap();
        let generation = session.attach(link, channel);

        let pump = Arc::clone(session);
        tokio::spawn(async move {
            while let Some(LinkEvent::Notification(bytes)) = events.recv().await {
                pump.handle_notification(&bytes);
            }
        });
        generation
    }

    async fn connected(script: Elm327Script, options: LinkOptions) -> (Arc<Session>, Arc<MockLink>) {
        connected_with(TransportConfig::default(), script, options).await
    }

    async fn connected_with(
        config: TransportConfig,
        script: Elm327Script,
        options: LinkOptions,
    ) -> (Arc<Session>, Arc<MockLink>) {
        let session = Session::new(config);
        let link = Arc::new(MockLink::new("mock-elm327", script, options));
        attach_mock(&session, Arc::clone(&link)).await;
        (session, link)
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected() {
        let session = Session::new(TransportConfig::default());
        let result = session.send(Command::new("0100")).await;
        assert_eq!(result, Err(TransportError::Disconnected));
        assert_eq!(session.queue_phase(), QueuePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_transmitted_in_fifo_order() {
        let (session, link) = connected(Elm327Script::default(), LinkOptions::default()).await;

        let (a, b, c) = tokio::join!(
            session.send(Command::new("ATSH7E0")),
            session.send(Command::new("010C").with_matcher(ResponseMatcher::Prefix("410C".into()))),
            session.send(Command::new("010D").with_matcher(ResponseMatcher::Prefix("410D".into()))),
        );

        assert_eq!(a.unwrap(), Response::Payload("OK".into()));
        assert_eq!(b.unwrap(), Response::Payload("410C1AF8".into()));
        assert_eq!(c.unwrap(), Response::Payload("410D32".into()));
        assert_eq!(link.writes(), vec!["ATSH7E0", "010C", "010D"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_with_sentinel() {
        let script = Elm327Script::default().with_silent("0902");
        let (session, _link) = connected(script, LinkOptions::default()).await;
        let mut events = session.subscribe();

        let started = tokio::time::Instant::now();
        let response = session
            .send(Command::new("0902").with_timeout(Duration::from_millis(400)))
            .await
            .unwrap();

        assert!(response.is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(400));
        assert_eq!(session.pending_count(), 0);

        let mut saw_no_response = false;
        while let Ok(event) = events.try_recv() {
            if event == (SessionEvent::NoResponse { command: "0902".into() }) {
                saw_no_response = true;
            }
        }
        assert!(saw_no_response);
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_just_before_timeout() {
        let options = LinkOptions {
            response_delay: Duration::from_millis(399),
            ..Default::default()
        };
        let (session, _link) = connected(Elm327Script::default(), options).await;

        let response = session
            .send(Command::new("010D").with_timeout(Duration::from_millis(400)))
            .await
            .unwrap();
        assert_eq!(response, Response::Payload("410D32".into()));

        // The cancelled timer must not settle anything later
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_racing_timeout_settles_once() {
        let options = LinkOptions {
            response_delay: Duration::from_millis(400),
            ..Default::default()
        };
        let (session, _link) = connected(Elm327Script::default(), options).await;

        let response = session
            .send(Command::new("010D").with_timeout(Duration::from_millis(400)))
            .await
            .unwrap();
        assert!(matches!(response, Response::Payload(_) | Response::Timeout));

        // The queue keeps working and nothing is left pending
        let next = session.send(Command::new("010C")).await.unwrap();
        assert!(next.payload().is_some());
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_response_command_settles() {
        let (session, link) = connected(Elm327Script::default(), LinkOptions::default()).await;

        let started = tokio::time::Instant::now();
        let response = session
            .send(Command::new("ATE0").without_response())
            .await
            .unwrap();
        assert_eq!(response, Response::Acknowledged);
        assert!(started.elapsed() >= session.config().settle_delay());
        assert_eq!(link.writes(), vec!["ATE0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_are_paced() {
        let (session, link) = connected(Elm327Script::default(), LinkOptions::default()).await;

        let started = tokio::time::Instant::now();
        let (_, _) = tokio::join!(
            session.send(Command::new("ATE0").without_response()),
            session.send(Command::new("ATL0").without_response()),
        );
        // settle + pause + settle
        assert!(started.elapsed() >= Duration::from_millis(450));
        assert_eq!(link.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_falls_back_to_acknowledged() {
        let options = LinkOptions {
            failing_modes: [WriteMode::WithoutResponse].into_iter().collect(),
            ..Default::default()
        };
        let (session, link) = connected(Elm327Script::default(), options).await;

        let response = session.send(Command::new("0105")).await.unwrap();
        assert_eq!(response, Response::Payload("41057B".into()));
        assert_eq!(
            link.write_attempts(),
            vec![
                ("0105".to_string(), WriteMode::WithoutResponse),
                ("0105".to_string(), WriteMode::WithResponse),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_write_failure_treated_as_sent() {
        let options = LinkOptions {
            failing_modes: [WriteMode::WithoutResponse, WriteMode::WithResponse]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let (session, _link) = connected(Elm327Script::default(), options).await;
        let mut events = session.subscribe();

        let response = session
            .send(Command::new("ATZ").with_timeout(Duration::from_millis(500)))
            .await
            .unwrap();
        assert!(response.is_timeout());

        let mut saw_write_failure = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::WriteFailed { ref command, .. } if command == "ATZ") {
                saw_write_failure = true;
            }
        }
        assert!(saw_write_failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_rejects_everything() {
        let script = Elm327Script::default()
            .with_silent("0100")
            .with_silent("03")
            .with_silent("07");
        let (session, _link) = connected(script, LinkOptions::default()).await;

        let mut calls = Vec::new();
        for text in ["0100", "03", "07"] {
            let session = Arc::clone(&session);
            calls.push(tokio::spawn(async move { session.send(Command::new(text)).await }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.pending_count(), 1);
        assert_eq!(session.queued_count(), 2);

        assert!(session.teardown().is_some());
        assert!(!session.is_connected());
        assert_eq!(session.pending_count(), 0);
        assert_eq!(session.queued_count(), 0);

        for call in calls {
            assert_eq!(call.await.unwrap(), Err(TransportError::Disconnected));
        }

        // Past every timeout: nothing left to fire, the drain loop has ended
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(session.pending_count(), 0);
        assert_eq!(session.queue_phase(), QueuePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation() {
        let session = Session::new(TransportConfig::default());
        let link = Arc::new(MockLink::new("mock-elm327", Elm327Script::default(), LinkOptions::default()));
        let generation = attach_mock(&session, link).await;

        assert!(session.is_current(generation));
        session.teardown();
        assert!(!session.is_current(generation));
        assert!(session.teardown().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unable_to_connect_is_dropped() {
        let session = Session::new(TransportConfig::default());
        let mut events = session.subscribe();

        session.handle_notification(b"UNABLE TO CONNECT\r\r>");
        session.handle_notification(b"\r\r>");
        session.handle_notification(b"41 0C 1A F8\r\r>");

        let event = events.try_recv().unwrap();
        assert_eq!(
            event,
            SessionEvent::Received {
                raw: "41 0C 1A F8".into(),
                frame: "410C1AF8".into(),
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_base64_notification() {
        let session = Session::new(TransportConfig::default());
        let mut events = session.subscribe();

        // "410D32\r>"
        session.handle_base64_notification("NDEwRDMyDT4=");
        session.handle_base64_notification("not base64!");

        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::Received { ref frame, .. } if frame == "410D32"
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_on_detached_link_registers_nothing() {
        let (session, link) = connected(Elm327Script::default(), LinkOptions::default()).await;
        let stale = session.active.read().clone().unwrap();

        session.teardown();
        let outcome = session.dispatch(&stale, &Command::new("010C")).await;

        assert_eq!(outcome, Err(TransportError::Disconnected));
        assert_eq!(session.pending_count(), 0);
        assert!(!link.writes().contains(&"010C".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_reply_reassembled() {
        let options = LinkOptions {
            fragment_size: Some(3),
            ..Default::default()
        };
        let (session, _link) = connected(Elm327Script::default(), options).await;

        let response = session.send(Command::new("0100")).await.unwrap();
        assert_eq!(response, Response::Payload("4100BE3EB811".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unassembled_fragments_stay_separate() {
        let config = TransportConfig {
            reassemble_frames: false,
            ..Default::default()
        };
        let options = LinkOptions {
            fragment_size: Some(4),
            ..Default::default()
        };
        let (session, _link) = connected_with(config, Elm327Script::default(), options).await;

        let response = session.send(Command::new("010C")).await.unwrap();
        assert_eq!(response, Response::Payload("410C".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_text() {
        let script = Elm327Script::default().with_reply("22F190", "62F19031");
        let (session, link) = connected(script, LinkOptions::default()).await;

        let response = session.send_text(" 22f190 ").await.unwrap();
        assert_eq!(response, Response::Payload("62F19031".into()));
        assert_eq!(link.writes(), vec!["22F190"]);

        assert_eq!(
            session.send_text("01\t0C").await,
            Err(TransportError::Protocol(ObdError::InvalidCommand("01\t0C".into())))
        );
        assert_eq!(
            session.send_text("   ").await,
            Err(TransportError::Protocol(ObdError::InvalidCommand("   ".into())))
        );
        assert_eq!(link.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_recover_after_link_failures() {
        let (session, link) = connected(Elm327Script::default(), LinkOptions::default()).await;

        link.set_failing_modes([WriteMode::WithoutResponse, WriteMode::WithResponse].into());
        let failed = session
            .send(Command::new("010D").with_timeout(Duration::from_millis(300)))
            .await
            .unwrap();
        assert!(failed.is_timeout());

        link.set_failing_modes(Default::default());
        let response = session.send(Command::new("010D")).await.unwrap();
        assert_eq!(response, Response::Payload("410D32".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolicited_frame_reported() {
        let (session, link) = connected(Elm327Script::default(), LinkOptions::default()).await;
        let mut events = session.subscribe();

        link.inject("STOPPED\r\r>");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Received {
                raw: "STOPPED".into(),
                frame: "STOPPED".into(),
            }
        );
        assert_eq!(session.pending_count(), 0);
    }
}
