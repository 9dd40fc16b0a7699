//! Event consumers and the deduplicating wrapper that makes them idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use outbox::CloudEvent;

use crate::Result;
use crate::dedup::{DEFAULT_RETENTION_HOURS, ProcessedEvent, ProcessedEventStore};

/// What happened to a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The event changed state.
    Applied,
    /// The event was seen before and skipped.
    Duplicate,
    /// The consumer has no interest in this event type.
    Ignored,
}

/// Something that reacts to delivered events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one delivery. Returning an error leaves the event eligible for
    /// redelivery.
    async fn handle(&self, event: &CloudEvent) -> Result<HandleOutcome>;
}

#[async_trait]
impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    async fn handle(&self, event: &CloudEvent) -> Result<HandleOutcome> {
        (**self).handle(event).await
    }
}

/// Runs the wrapped handler at most once per event id for a named consumer.
///
/// The marker is written only after the handler succeeds, so a crash between
/// the two leads to one more delivery. Wrapped handlers must tolerate that.
pub struct DeduplicatingHandler<H, S> {
    consumer: String,
    inner: H,
    store: S,
    retention: Duration,
}

impl<H: EventHandler, S: ProcessedEventStore> DeduplicatingHandler<H, S> {
    pub fn new(consumer: impl Into<String>, inner: H, store: S) -> Self {
        Self {
            consumer: consumer.into(),
            inner,
            store,
            retention: Duration::hours(DEFAULT_RETENTION_HOURS),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: EventHandler, S: ProcessedEventStore> EventHandler for DeduplicatingHandler<H, S> {
    #[tracing::instrument(
        skip(self, event),
        fields(consumer = %self.consumer, event_id = %event.id, event_type = %event.event_type)
    )]
    async fn handle(&self, event: &CloudEvent) -> Result<HandleOutcome> {
        if self.store.is_processed(&self.consumer, event.id).await? {
            metrics::counter!("consumer_dedup_hits_total", "consumer" => self.consumer.clone())
                .increment(1);
            tracing::debug!("duplicate skipped");
            return Ok(HandleOutcome::Duplicate);
        }

        let outcome = self.inner.handle(event).await?;

        let record = ProcessedEvent::new(
            self.consumer.clone(),
            event.id,
            event.event_type.clone(),
            self.retention,
        );
        if !self.store.mark_processed(record).await? {
            tracing::debug!("event marked by a concurrent delivery");
        }
        metrics::counter!("consumer_dedup_misses_total", "consumer" => self.consumer.clone())
            .increment(1);

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProjectionError;
    use crate::dedup::InMemoryProcessedEventStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _event: &CloudEvent) -> Result<HandleOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && call == 0 {
                return Err(ProjectionError::Handler("downstream unavailable".into()));
            }
            Ok(HandleOutcome::Applied)
        }
    }

    fn event() -> CloudEvent {
        CloudEvent::new(
            "wms.order.received",
            "/wms/order-service",
            "order/ORD-001",
            serde_json::json!({"orderId": "ORD-001"}),
        )
    }

    #[tokio::test]
    async fn redelivered_event_runs_handler_once() {
        let store = InMemoryProcessedEventStore::new();
        let handler = DeduplicatingHandler::new("planning", Counting::default(), store.clone());
        let event = event();

        assert_eq!(handler.handle(&event).await.unwrap(), HandleOutcome::Applied);
        for _ in 0..3 {
            assert_eq!(
                handler.handle(&event).await.unwrap(),
                HandleOutcome::Duplicate
            );
        }

        assert_eq!(handler.inner().calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn failed_handler_leaves_event_unmarked() {
        let store = InMemoryProcessedEventStore::new();
        let inner = Counting {
            fail_first: true,
            ..Default::default()
        };
        let handler = DeduplicatingHandler::new("planning", inner, store.clone());
        let event = event();

        assert!(handler.handle(&event).await.is_err());
        assert!(!store.is_processed("planning", event.id).await.unwrap());

        assert_eq!(handler.handle(&event).await.unwrap(), HandleOutcome::Applied);
        assert_eq!(handler.inner().calls.load(Ordering::SeqCst), 2);
        assert!(store.is_processed("planning", event.id).await.unwrap());
    }

    #[tokio::test]
    async fn distinct_events_are_all_handled() {
        let handler = DeduplicatingHandler::new(
            "planning",
            Counting::default(),
            InMemoryProcessedEventStore::new(),
        );

        handler.handle(&event()).await.unwrap();
        handler.handle(&event()).await.unwrap();

        assert_eq!(handler.inner().calls.load(Ordering::SeqCst), 2);
    }
}
