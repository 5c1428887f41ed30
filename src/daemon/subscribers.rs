//! Subscriber registry for engine notifications.
//!
//! Each subscriber owns an unbounded channel. The registry lives inside the
//! engine's lock, so removing a subscriber and delivering an event can never
//! interleave: once `remove` returns, that subscriber receives nothing more.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc;

use crate::types::EngineEvent;

// ============================================================================
// SubscriberId
// ============================================================================

/// Handle identifying a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Receiving end of a subscription.
///
/// Dropping a subscription is enough to stop receiving events; the registry
/// prunes it on the next delivery.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::UnboundedReceiver<EngineEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the subscriber has been removed (or the engine
    /// dropped) and every queued event has been consumed.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.receiver.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.receiver.try_recv().ok()
    }
}

// ============================================================================
// SubscriberRegistry
// ============================================================================

/// Registry of live subscribers.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    senders: HashMap<SubscriberId, mpsc::UnboundedSender<EngineEvent>>,
    next_id: u64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber.
    pub fn add(&mut self) -> Subscription {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(id, tx);

        Subscription { id, receiver: rx }
    }

    /// Removes a subscriber. Returns false if it was not registered.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        self.senders.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Delivers `event` to every subscriber.
    ///
    /// Never blocks. Subscribers whose receiver is gone are dropped from the
    /// registry. Returns the number of subscribers that accepted the event.
    pub fn publish(&mut self, event: &EngineEvent) -> usize {
        let mut closed = Vec::new();

        for (id, tx) in &self.senders {
            if tx.send(event.clone()).is_err() {
                closed.push(*id);
            }
        }

        for id in &closed {
            self.senders.remove(id);
            tracing::debug!(subscriber = %id, "切断された購読者を削除しました");
        }

        self.senders.len()
    }

    /// Removes every subscriber, closing their channels.
    pub fn clear(&mut self) {
        self.senders.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
