//! Live Data Poller

use crate::config::PollConfig;
use crate::state::SharedState;
use obd_protocol::{Command, Response};
use obd_transport::{Session, TransportError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

struct PollTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Polls the live PID rotation while connected and no scan is running
pub struct LivePoller {
    session: Arc<Session>,
    state: SharedState,
    config: PollConfig,
    task: Mutex<Option<PollTask>>,
}

impl LivePoller {
    /// Create a stopped poller; `start` begins the rotation
    pub fn new(session: Arc<Session>, state: SharedState, config: PollConfig) -> Arc<Self> {
        Arc::new(Self {
            session,
            state,
            config,
            task: Mutex::new(None),
        })
    }

    /// (Re)start polling from the head of the rotation
    pub async fn start(&self) {
        self.stop().await;
        if self.config.pids.is_empty() {
            warn!("Live poll rotation is empty, not polling");
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.session),
            Arc::clone(&self.state),
            self.config.clone(),
            stop_rx,
        ));
        let previous = self.task.lock().replace(PollTask { stop, handle });
        if let Some(previous) = previous {
            let _ = previous.stop.send(true);
        }
        info!("Live polling started ({} PIDs every {:?})", self.config.pids.len(), self.config.interval());
    }

    /// Stop polling; returns once the in-flight poll, if any, has settled
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.stop.send(true);
            if let Err(e) = task.handle.await {
                warn!("Poll loop ended abnormally: {}", e);
            }
            info!("Live polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }
}

async fn poll_loop(
    session: Arc<Session>,
    state: SharedState,
    config: PollConfig,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut index = 0usize;

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }
        if *stop.borrow() {
            break;
        }
        if !session.is_connected() || !state.read().scan.is_idle() {
            continue;
        }

        let pid = &config.pids[index % config.pids.len()];
        index = index.wrapping_add(1);

        let command = Command::new(pid.as_str()).with_timeout(config.timeout());
        match session.send(command).await {
            Ok(Response::Timeout) => debug!("No reply to poll {}", pid),
            Ok(_) => {}
            Err(TransportError::Disconnected) => debug!("Poll {} dropped: disconnected", pid),
            Err(e) => warn!("Poll {} failed: {}", pid, e),
        }
    }
}
