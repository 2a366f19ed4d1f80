//! Response Correlator
//!
//! Matches normalized notification payloads to the commands waiting for
//! them. Correlation is by content: every pending matcher is checked
//! against each frame and every match is resolved.

use obd_protocol::ResponseMatcher;
use tokio::sync::oneshot;
use tracing::debug;

/// Identifier of a registered pending response
pub type PendingId = u64;

/// A command waiting for a matching notification
#[derive(Debug)]
struct PendingResponse {
    id: PendingId,
    command: String,
    matcher: ResponseMatcher,
    reply: oneshot::Sender<String>,
}

/// Set of pending responses
#[derive(Debug, Default)]
pub struct Correlator {
    next_id: PendingId,
    pending: Vec<PendingResponse>,
}

impl Correlator {
    /// Create an empty correlator
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending response, returning its id and the receiver the
    /// matching payload is delivered on
    pub fn register(
        &mut self,
        command: &str,
        matcher: ResponseMatcher,
    ) -> (PendingId, oneshot::Receiver<String>) {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let (reply, rx) = oneshot::channel();
        self.pending.push(PendingResponse {
            id,
            command: command.to_string(),
            matcher,
            reply,
        });
        (id, rx)
    }

    /// Resolve every pending response whose matcher accepts `payload`.
    ///
    /// Returns the number of entries resolved.
    pub fn notify(&mut self, payload: &str) -> usize {
        let (matched, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.matcher.matches(payload));
        self.pending = rest;

        let resolved = matched.len();
        for pending in matched {
            debug!("{} answered by {}", pending.command, payload);
            // Receiver gone means the waiter already gave up
            let _ = pending.reply.send(payload.to_string());
        }
        resolved
    }

    /// Remove a pending response without resolving it.
    ///
    /// Returns false when the entry is gone, i.e. a notification already
    /// resolved it.
    pub fn cancel(&mut self, id: PendingId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.id != id);
        self.pending.len() != before
    }

    /// Drop every pending response; their waiters observe a closed channel
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Number of unsettled entries
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(p: &str) -> ResponseMatcher {
        ResponseMatcher::Prefix(p.to_string())
    }

    #[test]
    fn test_routes_by_matcher() {
        let mut correlator = Correlator::new();
        let (_, mut rpm) = correlator.register("010C", prefix("410C"));
        let (_, mut speed) = correlator.register("010D", prefix("410D"));

        assert_eq!(correlator.notify("410D32"), 1);
        assert_eq!(speed.try_recv().unwrap(), "410D32");
        assert!(rpm.try_recv().is_err());
        assert_eq!(correlator.len(), 1);

        assert_eq!(correlator.notify("410C1AF8"), 1);
        assert_eq!(rpm.try_recv().unwrap(), "410C1AF8");
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_resolves_all_matches() {
        let mut correlator = Correlator::new();
        let (_, mut a) = correlator.register("0100", ResponseMatcher::Any);
        let (_, mut b) = correlator.register("0101", ResponseMatcher::MinLength(4));

        assert_eq!(correlator.notify("4100BE3EB811"), 2);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_unmatched_payload_is_ignored() {
        let mut correlator = Correlator::new();
        let (_, mut rx) = correlator.register("010C", prefix("410C"));

        assert_eq!(correlator.notify("OK"), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn test_cancel_after_match() {
        let mut correlator = Correlator::new();
        let (id, _rx) = correlator.register("0100", ResponseMatcher::Any);
        correlator.notify("4100BE3EB811");
        assert!(!correlator.cancel(id));

        let (id, _rx) = correlator.register("0100", ResponseMatcher::Any);
        assert!(correlator.cancel(id));
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_clear_closes_waiters() {
        let mut correlator = Correlator::new();
        let (_, mut rx) = correlator.register("03", ResponseMatcher::Any);

        assert_eq!(correlator.clear(), 1);
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }
}
