//! Idempotent projector: applies each event to its projection exactly once.

use async_trait::async_trait;
use outbox::CloudEvent;
use serde_json::Value;

use crate::Result;
use crate::consumer::{EventHandler, HandleOutcome};
use crate::projection::Projection;
use crate::store::{ApplyOutcome, EventRef, ProjectionStore};

/// Drives a [`Projection`] over a [`ProjectionStore`].
///
/// The applied-event marker and the record write share one atomic step, so
/// replaying the whole log, or any part of it, leaves the records unchanged.
pub struct IdempotentProjector<P, S> {
    projection: P,
    store: S,
}

impl<P: Projection, S: ProjectionStore> IdempotentProjector<P, S> {
    pub fn new(projection: P, store: S) -> Self {
        Self { projection, store }
    }

    pub fn name(&self) -> &'static str {
        self.projection.name()
    }

    pub async fn get(&self, key: &str) -> Result<Option<P::Record>> {
        match self.store.get(self.projection.name(), key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self) -> Result<Vec<P::Record>> {
        self.store
            .list(self.projection.name())
            .await?
            .into_iter()
            .map(|(_, value)| -> Result<P::Record> { Ok(serde_json::from_value(value)?) })
            .collect()
    }

    /// Drops all records so the log can be replayed from scratch.
    pub async fn reset(&self) -> Result<()> {
        self.store.reset(self.projection.name()).await
    }
}

#[async_trait]
impl<P: Projection, S: ProjectionStore> EventHandler for IdempotentProjector<P, S> {
    #[tracing::instrument(
        skip(self, event),
        fields(projection = self.projection.name(), event_id = %event.id, event_type = %event.event_type)
    )]
    async fn handle(&self, event: &CloudEvent) -> Result<HandleOutcome> {
        let Some(key) = self.projection.key(event) else {
            return Ok(HandleOutcome::Ignored);
        };

        let update = |current: Option<Value>| -> Result<Value> {
            let current = current
                .map(serde_json::from_value::<P::Record>)
                .transpose()?;
            let next = self.projection.apply(current, event)?;
            Ok(serde_json::to_value(next)?)
        };
        let event_ref = EventRef {
            id: event.id,
            event_type: &event.event_type,
        };

        let name = self.projection.name();
        match self.store.apply_once(name, &key, event_ref, &update).await? {
            ApplyOutcome::Applied => {
                metrics::counter!("projector_events_applied_total", "projection" => name)
                    .increment(1);
                Ok(HandleOutcome::Applied)
            }
            ApplyOutcome::Duplicate => {
                metrics::counter!("projector_duplicates_skipped_total", "projection" => name)
                    .increment(1);
                tracing::debug!(key = %key, "duplicate skipped");
                Ok(HandleOutcome::Duplicate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryProjectionStore;
    use crate::views::OrderStatusProjection;
    use serde_json::json;

    fn wave_assigned() -> CloudEvent {
        CloudEvent::new(
            "wms.order.wave-assigned",
            "/wms/order-service",
            "order/ORD-001",
            json!({"orderId": "ORD-001", "waveId": "W-1", "assignedAt": chrono::Utc::now()}),
        )
    }

    #[tokio::test]
    async fn redelivery_leaves_state_as_after_first_delivery() {
        let projector =
            IdempotentProjector::new(OrderStatusProjection, InMemoryProjectionStore::new());
        let event = wave_assigned();

        assert_eq!(projector.handle(&event).await.unwrap(), HandleOutcome::Applied);
        let once = projector.get("ORD-001").await.unwrap().unwrap();

        for _ in 0..5 {
            assert_eq!(
                projector.handle(&event).await.unwrap(),
                HandleOutcome::Duplicate
            );
        }
        let many = projector.get("ORD-001").await.unwrap().unwrap();

        assert_eq!(once, many);
        assert_eq!(many.events_applied, 1);
        assert_eq!(many.wave_id.as_deref(), Some("W-1"));
    }

    #[tokio::test]
    async fn events_without_key_are_ignored() {
        let projector =
            IdempotentProjector::new(OrderStatusProjection, InMemoryProjectionStore::new());
        let event = CloudEvent::new("wms.inventory.adjusted", "/wms/x", "sku/1", json!({}));

        assert_eq!(projector.handle(&event).await.unwrap(), HandleOutcome::Ignored);
        assert!(projector.list().await.unwrap().is_empty());
    }
}
