//! Command Queue
//!
//! FIFO of submitted commands plus the drain-loop guard. The phase lives
//! under the same lock as the items, so "queue empty" and "loop finished"
//! are observed together and at most one drain loop exists at a time.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

/// Drain state of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum QueuePhase {
    /// No drain loop running
    #[default]
    Idle,
    /// A drain loop owns the queue
    Draining,
}

#[derive(Debug)]
struct QueueInner<T> {
    items: VecDeque<T>,
    phase: QueuePhase,
}

/// FIFO command queue with a single-drainer guard
#[derive(Debug)]
pub struct CommandQueue<T> {
    inner: Mutex<QueueInner<T>>,
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CommandQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                phase: QueuePhase::Idle,
            }),
        }
    }

    /// Append an item.
    ///
    /// Returns true when the queue was idle: the caller now owns the drain
    /// loop and must start it.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        inner.items.push_back(item);
        if inner.phase == QueuePhase::Idle {
            inner.phase = QueuePhase::Draining;
            true
        } else {
            false
        }
    }

    /// Take the head of the queue. `None` ends the drain loop and returns
    /// the queue to idle.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = inner.items.pop_front();
        if item.is_none() {
            inner.phase = QueuePhase::Idle;
        }
        item
    }

    /// Remove every queued item. A running drain loop keeps its phase and
    /// ends on its next `pop`.
    pub fn drain_all(&self) -> Vec<T> {
        self.inner.lock().items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn phase(&self) -> QueuePhase {
        self.inner.lock().phase
    }
}
