//! Message bus for cross-process cycle signalling.
//!
//! Delivery is at-least-once, so subscribers drop repeats by envelope id
//! through a bounded [`Deduplicator`].

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Channel suffix for persisted cycle outcomes.
pub const CYCLE_CHANNEL: &str = "cycle";

/// Channel suffix for evolution events.
pub const EVOLUTION_CHANNEL: &str = "evolution";

/// Default number of ids a deduplicator remembers.
pub const DEFAULT_DEDUP_CAPACITY: usize = 1024;

/// Build a namespaced topic such as `genesis.cycle`.
pub fn topic(prefix: &str, channel: &str) -> String {
    format!("{}.{}", prefix, channel)
}

/// Errors from bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Payload could not be serialized
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Bus is shut down
    #[error("bus closed")]
    Closed,
}

/// A published message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Event id, the de-duplication key
    pub id: String,

    /// Namespaced topic
    pub topic: String,

    /// Serialized CycleOutcome or EvolutionEvent
    pub payload: serde_json::Value,

    /// Publish time
    pub published_at: genesis_core::Time,
}

impl Envelope {
    /// Wrap a serializable payload.
    pub fn new<T: Serialize>(
        topic: impl Into<String>,
        id: impl Into<String>,
        payload: &T,
    ) -> Result<Self, BusError> {
        Ok(Self {
            id: id.into(),
            topic: topic.into(),
            payload: serde_json::to_value(payload)?,
            published_at: chrono::Utc::now(),
        })
    }
}

/// Publish/subscribe on namespaced topics.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish an envelope. Publishing with no subscribers is not an error.
    async fn publish(&self, envelope: Envelope) -> Result<(), BusError>;

    /// Subscribe to every topic starting with `prefix`.
    fn subscribe(&self, prefix: &str) -> Subscription;
}

/// Bounded memory of seen envelope ids.
#[derive(Debug)]
pub struct Deduplicator {
    capacity: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl Deduplicator {
    /// Remember at most `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `id`; returns `false` if it was already seen.
    pub fn first_time(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    /// Number of ids currently remembered.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if nothing has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

/// A filtered, de-duplicated stream of envelopes.
pub struct Subscription {
    prefix: String,
    rx: broadcast::Receiver<Envelope>,
    dedup: Deduplicator,
}

impl Subscription {
    /// Wrap a broadcast receiver.
    pub fn new(prefix: impl Into<String>, rx: broadcast::Receiver<Envelope>) -> Self {
        Self {
            prefix: prefix.into(),
            rx,
            dedup: Deduplicator::default(),
        }
    }

    /// Next matching envelope not seen before; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if !envelope.topic.starts_with(&self.prefix) {
                        continue;
                    }
                    if !self.dedup.first_time(&envelope.id) {
                        debug!(id = %envelope.id, "dropping duplicate delivery");
                        continue;
                    }
                    return Some(envelope);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, prefix = %self.prefix, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-process bus on a tokio broadcast channel.
pub struct InMemoryBus {
    tx: broadcast::Sender<Envelope>,
}

impl InMemoryBus {
    /// Create a bus buffering up to `capacity` envelopes per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, envelope: Envelope) -> Result<(), BusError> {
        // No receivers is fine: the bus is optional.
        let _ = self.tx.send(envelope);
        Ok(())
    }

    fn subscribe(&self, prefix: &str) -> Subscription {
        Subscription::new(prefix, self.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduplicator_is_bounded() {
        let mut dedup = Deduplicator::new(2);
        assert!(dedup.first_time("a"));
        assert!(!dedup.first_time("a"));
        assert!(dedup.first_time("b"));
        assert!(dedup.first_time("c"));
        assert_eq!(dedup.len(), 2);
        // "a" was evicted, so it is accepted again.
        assert!(dedup.first_time("a"));
    }

    #[tokio::test]
    async fn test_subscriber_drops_redelivery_and_foreign_topics() {
        let bus = InMemoryBus::default();
        let mut sub = bus.subscribe("genesis.");

        let env = Envelope::new(topic("genesis", CYCLE_CHANNEL), "c1", &serde_json::json!({"ok": true})).unwrap();
        bus.publish(env.clone()).await.unwrap();
        bus.publish(env).await.unwrap();
        bus.publish(Envelope::new("other.cycle", "c2", &1).unwrap()).await.unwrap();
        bus.publish(Envelope::new(topic("genesis", EVOLUTION_CHANNEL), "e1", &2).unwrap()).await.unwrap();

        let first = sub.recv().await.unwrap();
        assert_eq!(first.id, "c1");
        let second = sub.recv().await.unwrap();
        assert_eq!(second.id, "e1");
        assert_eq!(second.topic, "genesis.evolution");
    }
}
