//! Background relay from the outbox store to the message bus.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bus::{BusMessage, MessageBus};
use crate::store::{ClaimRequest, OutboxStore};
use crate::{OutboxEvent, Result};

/// Publisher tuning.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Written into `claimed_by`; must differ between publisher instances.
    pub publisher_id: String,
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Rows that failed this many times are left for an operator.
    pub max_retries: i32,
    pub claim_lease: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            publisher_id: format!("publisher-{}", uuid::Uuid::new_v4()),
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
            max_retries: 10,
            claim_lease: Duration::from_secs(30),
        }
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
    /// Rows released untouched because an earlier row with the same key failed.
    pub deferred: usize,
}

/// Cumulative counters since the publisher was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub published: u64,
    pub failed: u64,
}

struct PublisherInner<S, B> {
    store: S,
    bus: B,
    config: PublisherConfig,
    published: AtomicU64,
    failed: AtomicU64,
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Polls the outbox store and relays unpublished rows to the bus.
///
/// All progress lives in the store: a crash loses nothing and at worst
/// republishes rows whose `mark_published` did not land.
pub struct OutboxPublisher<S, B> {
    inner: Arc<PublisherInner<S, B>>,
    running: Mutex<Option<RunningLoop>>,
}

impl<S, B> OutboxPublisher<S, B>
where
    S: OutboxStore + 'static,
    B: MessageBus + 'static,
{
    pub fn new(store: S, bus: B, config: PublisherConfig) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                store,
                bus,
                config,
                published: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.inner.published.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Starts the background loop. Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(run_loop(inner, shutdown_rx));
        *running = Some(RunningLoop { shutdown, handle });

        tracing::info!(
            publisher_id = %self.inner.config.publisher_id,
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            batch_size = self.inner.config.batch_size,
            "outbox publisher started"
        );
        true
    }

    /// Stops the loop and waits for the batch in flight to finish.
    ///
    /// Returns `false` if the publisher was not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().await.take() else {
            return false;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "outbox publisher task ended abnormally");
        }
        tracing::info!(publisher_id = %self.inner.config.publisher_id, "outbox publisher stopped");
        true
    }

    /// Claims one batch and tries to publish every row in it.
    pub async fn poll_and_publish(&self) -> Result<PublishReport> {
        self.inner.poll_and_publish().await
    }
}

async fn run_loop<S, B>(inner: Arc<PublisherInner<S, B>>, mut shutdown: watch::Receiver<bool>)
where
    S: OutboxStore,
    B: MessageBus,
{
    let mut ticker = tokio::time::interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if let Err(e) = inner.poll_and_publish().await {
                    tracing::warn!(error = %e, "outbox poll failed, retrying on next tick");
                }
            }
        }
    }
}

impl<S, B> PublisherInner<S, B>
where
    S: OutboxStore,
    B: MessageBus,
{
    #[tracing::instrument(skip(self), fields(publisher_id = %self.config.publisher_id))]
    async fn poll_and_publish(&self) -> Result<PublishReport> {
        let batch = self
            .store
            .claim_batch(&ClaimRequest {
                publisher_id: self.config.publisher_id.clone(),
                limit: self.config.batch_size,
                lease: self.config.claim_lease,
                max_retries: self.config.max_retries,
            })
            .await?;

        let pending = self.store.count_unpublished().await?;
        metrics::gauge!("outbox_pending_events").set(pending as f64);

        let mut report = PublishReport {
            claimed: batch.len(),
            ..PublishReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let mut failed_keys: HashSet<String> = HashSet::new();
        for event in batch {
            if failed_keys.contains(&event.routing_key) {
                self.store.release(event.id).await?;
                report.deferred += 1;
                continue;
            }

            if self.publish_one(&event).await? {
                report.published += 1;
            } else {
                failed_keys.insert(event.routing_key.clone());
                report.failed += 1;
            }
        }

        tracing::debug!(
            claimed = report.claimed,
            published = report.published,
            failed = report.failed,
            deferred = report.deferred,
            "outbox batch processed"
        );
        Ok(report)
    }

    /// Returns `Ok(false)` when the bus rejected the row.
    async fn publish_one(&self, event: &OutboxEvent) -> Result<bool> {
        let started = Instant::now();
        let outcome = self
            .bus
            .publish(BusMessage {
                topic: event.topic.clone(),
                key: event.routing_key.clone(),
                payload: event.payload.clone(),
            })
            .await;
        metrics::histogram!("outbox_publish_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                if !self.store.mark_published(event.id).await? {
                    tracing::debug!(event_id = %event.id, "row already marked published elsewhere");
                }
                self.published.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("outbox_events_published_total", "event_type" => event.event_type.clone())
                    .increment(1);
                Ok(true)
            }
            Err(err) => {
                self.store.record_failure(event.id, &err.to_string()).await?;
                self.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("outbox_publish_failures_total").increment(1);

                let attempts = event.retry_count + 1;
                if attempts >= self.config.max_retries {
                    tracing::error!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        attempts,
                        error = %err,
                        "outbox event parked after reaching max retries"
                    );
                } else {
                    tracing::warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        attempts,
                        error = %err,
                        "failed to publish outbox event"
                    );
                }
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, InMemoryMessageBus};
    use crate::memory::InMemoryOutboxStore;
    use crate::store::StateWrite;
    use common::Version;

    async fn seed(store: &InMemoryOutboxStore, order_id: &str, event_types: &[&str]) {
        let events = event_types
            .iter()
            .map(|t| {
                OutboxEvent::builder()
                    .aggregate_id(order_id)
                    .aggregate_type("Order")
                    .event_type(*t)
                    .topic("wms.orders.events")
                    .payload_raw(t.as_bytes().to_vec())
                    .build()
            })
            .collect();
        store
            .commit(
                StateWrite {
                    aggregate_type: "Order".to_string(),
                    aggregate_id: order_id.to_string(),
                    expected_version: Version::initial(),
                    state: serde_json::json!({}),
                },
                events,
            )
            .await
            .unwrap();
    }

    fn publisher(
        store: &InMemoryOutboxStore,
        bus: &InMemoryMessageBus,
    ) -> OutboxPublisher<InMemoryOutboxStore, InMemoryMessageBus> {
        OutboxPublisher::new(
            store.clone(),
            bus.clone(),
            PublisherConfig {
                poll_interval: Duration::from_millis(10),
                ..PublisherConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn publishes_and_marks_rows() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryMessageBus::new();
        seed(&store, "ORD-001", &["wms.order.received"]).await;

        let report = publisher(&store, &bus).poll_and_publish().await.unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(bus.delivered().await.len(), 1);
        assert_eq!(store.count_unpublished().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_publish_stays_unpublished_and_is_retried() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryMessageBus::new();
        seed(&store, "ORD-001", &["wms.order.received"]).await;
        bus.fail_next(BusError::Unavailable("broker down".to_string()))
            .await;
        let publisher = publisher(&store, &bus);

        let first = publisher.poll_and_publish().await.unwrap();
        assert_eq!(first.failed, 1);
        let row = &store.all_events().await[0];
        assert_eq!(row.retry_count, 1);
        assert!(row.last_error.as_deref().unwrap().contains("broker down"));
        assert!(row.published_at.is_none());

        let second = publisher.poll_and_publish().await.unwrap();
        assert_eq!(second.published, 1);
        assert_eq!(publisher.stats(), PublisherStats { published: 1, failed: 1 });
    }

    #[tokio::test]
    async fn failure_defers_later_rows_with_same_key() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryMessageBus::new();
        seed(
            &store,
            "ORD-001",
            &["wms.order.received", "wms.order.cancelled"],
        )
        .await;
        seed(&store, "ORD-002", &["wms.order.received"]).await;
        bus.fail_next(BusError::Unavailable("broker down".to_string()))
            .await;
        let publisher = publisher(&store, &bus);

        let report = publisher.poll_and_publish().await.unwrap();
        assert_eq!(
            report,
            PublishReport {
                claimed: 3,
                published: 1,
                failed: 1,
                deferred: 1
            }
        );

        publisher.poll_and_publish().await.unwrap();
        let order: Vec<Vec<u8>> = bus
            .delivered()
            .await
            .into_iter()
            .filter(|m| m.key == "ORD-001")
            .map(|m| m.payload)
            .collect();
        assert_eq!(
            order,
            vec![
                b"wms.order.received".to_vec(),
                b"wms.order.cancelled".to_vec()
            ]
        );
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let store = InMemoryOutboxStore::new();
        let bus = InMemoryMessageBus::new();
        let publisher = publisher(&store, &bus);

        assert!(publisher.start().await);
        assert!(!publisher.start().await);
        assert!(publisher.is_running().await);

        seed(&store, "ORD-001", &["wms.order.received"]).await;
        for _ in 0..100 {
            if store.count_unpublished().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.count_unpublished().await.unwrap(), 0);

        assert!(publisher.stop().await);
        assert!(!publisher.stop().await);
        assert!(!publisher.is_running().await);

        seed(&store, "ORD-002", &["wms.order.received"]).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.count_unpublished().await.unwrap(), 1);
    }
}
