//! Projection processor for replaying the outbox log into projections.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use outbox::{CloudEvent, OutboxStoreExt};

use crate::Result;
use crate::consumer::{EventHandler, HandleOutcome};
use crate::projection::Projection;
use crate::projector::IdempotentProjector;
use crate::store::ProjectionStore;

/// A projection the processor can wipe and replay.
#[async_trait]
pub trait Rebuildable: EventHandler {
    fn name(&self) -> &'static str;

    async fn reset(&self) -> Result<()>;
}

#[async_trait]
impl<P: Projection, S: ProjectionStore> Rebuildable for IdempotentProjector<P, S> {
    fn name(&self) -> &'static str {
        IdempotentProjector::name(self)
    }

    async fn reset(&self) -> Result<()> {
        IdempotentProjector::reset(self).await
    }
}

/// Counts from a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub events: u64,
    pub applied: u64,
    pub duplicates: u64,
}

/// Feeds outbox rows, in commit order, to registered projections.
///
/// The outbox is the durable event log, so a projection can be rebuilt
/// without the message bus.
pub struct ProjectionProcessor<S> {
    log: S,
    page_size: usize,
    projections: Vec<Arc<dyn Rebuildable>>,
}

impl<S: OutboxStoreExt> ProjectionProcessor<S> {
    pub fn new(log: S) -> Self {
        Self {
            log,
            page_size: 500,
            projections: Vec::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn register(&mut self, projection: Arc<dyn Rebuildable>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Delivers one event to every projection.
    #[tracing::instrument(
        skip(self, event),
        fields(event_id = %event.id, event_type = %event.event_type)
    )]
    pub async fn process_event(&self, event: &CloudEvent) -> Result<()> {
        for projection in &self.projections {
            projection.handle(event).await?;
        }
        Ok(())
    }

    /// Replays the whole log. Events already applied are skipped.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        let mut stream = self.log.stream_log(self.page_size);

        while let Some(row) = stream.next().await {
            let event = row?.cloud_event()?;
            report.events += 1;

            for projection in &self.projections {
                match projection.handle(&event).await? {
                    HandleOutcome::Applied => report.applied += 1,
                    HandleOutcome::Duplicate => report.duplicates += 1,
                    HandleOutcome::Ignored => {}
                }
            }
        }

        tracing::info!(
            events = report.events,
            applied = report.applied,
            duplicates = report.duplicates,
            "catch-up complete"
        );
        Ok(report)
    }

    /// Resets every projection and replays the log from the start.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<ReplayReport> {
        for projection in &self.projections {
            tracing::info!(projection = projection.name(), "resetting projection");
            projection.reset().await?;
        }
        self.run_catch_up().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryProjectionStore;
    use crate::views::OrderStatusProjection;
    use chrono::Utc;
    use outbox::{InMemoryOutboxStore, OutboxEvent, OutboxStore, StateWrite, Version};
    use serde_json::{Value, json};

    fn order_event(event_type: &str, data: Value) -> CloudEvent {
        let subject = format!("order/{}", data["orderId"].as_str().unwrap_or_default());
        CloudEvent::new(event_type, "/wms/order-service", subject, data)
    }

    fn received(order_id: &str) -> CloudEvent {
        order_event(
            "wms.order.received",
            json!({
                "orderId": order_id,
                "customerId": "CUST-1",
                "lines": [{"sku": "SKU-1", "quantity": 1}],
                "priority": "standard",
                "receivedAt": Utc::now(),
            }),
        )
    }

    fn wave_assigned(order_id: &str) -> CloudEvent {
        order_event(
            "wms.order.wave-assigned",
            json!({"orderId": order_id, "waveId": "W-1", "assignedAt": Utc::now()}),
        )
    }

    fn cancelled(order_id: &str) -> CloudEvent {
        order_event(
            "wms.order.cancelled",
            json!({"orderId": order_id, "reason": "customer", "cancelledAt": Utc::now()}),
        )
    }

    async fn seed(store: &InMemoryOutboxStore, order_id: &str, events: Vec<CloudEvent>) {
        let rows = events
            .iter()
            .map(|e| OutboxEvent::from_cloud_event(order_id, "Order", "wms.orders.events", e))
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        let write = StateWrite {
            aggregate_type: "Order".into(),
            aggregate_id: order_id.into(),
            expected_version: Version::initial(),
            state: json!({}),
        };
        store.commit(write, rows).await.unwrap();
    }

    type OrderStatusProjector = IdempotentProjector<OrderStatusProjection, InMemoryProjectionStore>;

    fn processor(
        log: InMemoryOutboxStore,
    ) -> (ProjectionProcessor<InMemoryOutboxStore>, Arc<OrderStatusProjector>) {
        let projector = Arc::new(IdempotentProjector::new(
            OrderStatusProjection,
            InMemoryProjectionStore::new(),
        ));
        let mut processor = ProjectionProcessor::new(log).with_page_size(2);
        processor.register(projector.clone());
        (processor, projector)
    }

    #[tokio::test]
    async fn catch_up_twice_applies_each_event_once() {
        let log = InMemoryOutboxStore::new();
        seed(&log, "ORD-001", vec![received("ORD-001"), wave_assigned("ORD-001")]).await;
        seed(&log, "ORD-002", vec![cancelled("ORD-002")]).await;
        let (processor, projector) = processor(log);

        let first = processor.run_catch_up().await.unwrap();
        let second = processor.run_catch_up().await.unwrap();

        assert_eq!(first.events, 3);
        assert_eq!(first.applied, 3);
        assert_eq!(second.applied, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(projector.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rebuild_reproduces_the_same_records() {
        let log = InMemoryOutboxStore::new();
        seed(&log, "ORD-001", vec![received("ORD-001"), cancelled("ORD-001")]).await;
        let (processor, projector) = processor(log);

        processor.run_catch_up().await.unwrap();
        let before = projector.get("ORD-001").await.unwrap();

        let report = processor.rebuild_all().await.unwrap();
        let after = projector.get("ORD-001").await.unwrap();

        assert_eq!(report.applied, 2);
        assert_eq!(before, after);
        assert_eq!(after.unwrap().status, "cancelled");
    }

    #[tokio::test]
    async fn live_event_after_catch_up_is_not_applied_twice() {
        let log = InMemoryOutboxStore::new();
        let event = received("ORD-009");
        seed(&log, "ORD-009", vec![event.clone()]).await;
        let (processor, projector) = processor(log);

        processor.run_catch_up().await.unwrap();
        processor.process_event(&event).await.unwrap();

        let record = projector.get("ORD-009").await.unwrap().unwrap();
        assert_eq!(record.events_applied, 1);
    }
}
