//! Message bus seam used by the publisher.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};

/// A message handed to the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    /// Partition key; the bus keeps per-key order.
    pub key: String,
    pub payload: Vec<u8>,
}

/// Errors reported by a message bus.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BusError {
    /// The broker could not be reached. Worth retrying.
    #[error("Message bus unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the message.
    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Publishes serialized events to topics.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, message: BusMessage) -> Result<(), BusError>;
}

#[derive(Debug)]
struct BusState {
    delivered: VecDeque<BusMessage>,
    log_capacity: usize,
    topics: HashMap<String, broadcast::Sender<BusMessage>>,
    scripted_failures: VecDeque<BusError>,
    failing_keys: HashSet<String>,
}

/// In-process bus with broadcast subscriptions per topic.
///
/// Keeps the most recent delivered messages for inspection and can be told
/// to fail.
#[derive(Debug, Clone)]
pub struct InMemoryMessageBus {
    state: Arc<Mutex<BusState>>,
}

const SUBSCRIPTION_CAPACITY: usize = 1024;

/// Delivered messages kept by [`InMemoryMessageBus::new`].
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus that keeps at most `capacity` delivered messages,
    /// dropping the oldest first. Zero keeps none.
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                delivered: VecDeque::new(),
                log_capacity: capacity,
                topics: HashMap::new(),
                scripted_failures: VecDeque::new(),
                failing_keys: HashSet::new(),
            })),
        }
    }

    /// Subscribes to a topic. Only messages published afterwards are received.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        let mut state = self.state.lock().await;
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIPTION_CAPACITY).0)
            .subscribe()
    }

    /// Queues an error to return from the next publish call.
    pub async fn fail_next(&self, error: BusError) {
        self.state.lock().await.scripted_failures.push_back(error);
    }

    /// Makes every publish with this key fail until cleared.
    pub async fn fail_key(&self, key: &str) {
        self.state.lock().await.failing_keys.insert(key.to_string());
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.scripted_failures.clear();
        state.failing_keys.clear();
    }

    /// Returns the retained delivered messages in delivery order.
    pub async fn delivered(&self) -> Vec<BusMessage> {
        self.state.lock().await.delivered.iter().cloned().collect()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        let mut state = self.state.lock().await;

        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }
        if state.failing_keys.contains(&message.key) {
            return Err(BusError::Unavailable(format!(
                "partition for key {} is offline",
                message.key
            )));
        }

        if let Some(sender) = state.topics.get(&message.topic) {
            // No live receivers is fine.
            let _ = sender.send(message.clone());
        }
        if state.log_capacity > 0 {
            if state.delivered.len() == state.log_capacity {
                state.delivered.pop_front();
            }
            state.delivered.push_back(message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(key: &str) -> BusMessage {
        BusMessage {
            topic: "wms.orders.events".to_string(),
            key: key.to_string(),
            payload: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_messages() {
        let bus = InMemoryMessageBus::new();
        let mut rx = bus.subscribe("wms.orders.events").await;

        bus.publish(message("ORD-001")).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.key, "ORD-001");
        assert_eq!(bus.delivered().await.len(), 1);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let bus = InMemoryMessageBus::new();
        bus.fail_next(BusError::Unavailable("broker down".to_string()))
            .await;

        assert!(bus.publish(message("ORD-001")).await.is_err());
        assert!(bus.publish(message("ORD-001")).await.is_ok());
    }

    #[tokio::test]
    async fn failing_key_only_affects_that_key() {
        let bus = InMemoryMessageBus::new();
        bus.fail_key("ORD-001").await;

        assert!(bus.publish(message("ORD-001")).await.is_err());
        assert!(bus.publish(message("ORD-002")).await.is_ok());

        bus.clear_failures().await;
        assert!(bus.publish(message("ORD-001")).await.is_ok());
    }

    #[tokio::test]
    async fn delivered_log_keeps_only_the_newest_messages() {
        let bus = InMemoryMessageBus::with_log_capacity(2);
        let mut rx = bus.subscribe("wms.orders.events").await;

        for key in ["ORD-001", "ORD-002", "ORD-003"] {
            bus.publish(message(key)).await.unwrap();
        }

        let keys: Vec<_> = bus.delivered().await.into_iter().map(|m| m.key).collect();
        assert_eq!(keys, ["ORD-002", "ORD-003"]);
        // Subscribers still see every message.
        assert_eq!(rx.recv().await.unwrap().key, "ORD-001");
    }

    #[tokio::test]
    async fn zero_capacity_keeps_no_log() {
        let bus = InMemoryMessageBus::with_log_capacity(0);
        bus.publish(message("ORD-001")).await.unwrap();
        assert!(bus.delivered().await.is_empty());
    }
}
