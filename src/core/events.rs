//! Session lifecycle events
//!
//! `port-opened`/`port-closed` notifications are delivered through an
//! explicit observer registry: subscribers register and unregister, delivery
//! follows subscription order, and late subscribers see no replay.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Lifecycle notifications emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A session was established on the named port.
    Opened {
        /// Bound port identifier
        port: String,
    },
    /// The session ended; the transport reported its close.
    Closed,
}

/// Handle identifying one subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered observer registry for [`PortEvent`]s.
#[derive(Default)]
pub struct EventRegistry {
    subscribers: RwLock<Vec<(SubscriptionId, mpsc::UnboundedSender<PortEvent>)>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Events emitted after this call are delivered in
    /// subscription order; nothing already emitted is replayed.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<PortEvent>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push((id, tx));
        (id, rx)
    }

    /// Remove an observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().retain(|(sub_id, _)| *sub_id != id);
    }

    /// Deliver an event to every live observer, dropping ones whose receiver
    /// is gone.
    pub fn emit(&self, event: &PortEvent) {
        self.subscribers
            .write()
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Number of live observers.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}
