//! Session event monitor
//!
//! Feeds session events into the diagnostic state and starts or stops live
//! polling as the link comes and goes.

use crate::poller::LivePoller;
use crate::state::SharedState;
use obd_transport::{Session, SessionEvent};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawn the monitor task. It ends when the session is dropped.
pub fn spawn_monitor(
    session: &Arc<Session>,
    state: SharedState,
    poller: Arc<LivePoller>,
) -> JoinHandle<()> {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    warn!("Diagnostic monitor lagged, {} events dropped", missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            state.write().apply_event(&event);

            match event {
                SessionEvent::Connected { .. } => poller.start().await,
                SessionEvent::Disconnected { .. } => poller.stop().await,
                _ => {}
            }
        }
        debug!("Diagnostic monitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollConfig;
    use crate::state::DiagnosticState;
    use obd_protocol::MonitorStatus;
    use obd_transport::mock::{Elm327Script, MockAdapter, MOCK_DEVICE_ID};
    use obd_transport::{ConnectionManager, LinkState, TransportConfig};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_state_follows_session() {
        let adapter = Arc::new(MockAdapter::new(Elm327Script::default()));
        let session = Session::new(TransportConfig::default());
        let manager = ConnectionManager::new(adapter.clone(), session.clone());
        let state = DiagnosticState::shared();
        let poller = LivePoller::new(session.clone(), state.clone(), PollConfig::default());
        let _monitor = spawn_monitor(&session, state.clone(), poller.clone());

        manager.connect(MOCK_DEVICE_ID).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        {
            let state = state.read();
            assert_eq!(state.link, LinkState::Connected);
            assert_eq!(state.device_id.as_deref(), Some(MOCK_DEVICE_ID));
            assert_eq!(state.live_data["010C"].value, 1726.0);
            assert_eq!(state.live_data["010D"].value, 50.0);
            assert_eq!(state.emissions.misfire, MonitorStatus::Ok);
            assert!(state.log.iter().any(|l| l == "TX -> 010C"));
            assert!(state.log.iter().any(|l| l == "RX <- 410C1AF8"));
        }
        assert!(poller.is_running());

        manager.disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let state = state.read();
        assert_eq!(state.link, LinkState::Disconnected);
        assert!(state.device_id.is_none());
        assert!(state.live_data.is_empty());
        assert_eq!(
            state.log.back().map(String::as_str),
            Some("Successfully disconnected and cleaned up.")
        );
        assert!(!poller.is_running());
    }
}
