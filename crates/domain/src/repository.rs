//! Outbox writer: saves aggregate state together with its pending events.

use std::marker::PhantomData;

use common::Version;
use outbox::{CloudEvent, OutboxEvent, OutboxStore, StateWrite};

use crate::aggregate::{AggregateRoot, DomainEvent};
use crate::error::DomainError;

/// Loads and saves one aggregate type through an [`OutboxStore`].
pub struct Repository<S, A>
where
    S: OutboxStore,
    A: AggregateRoot,
{
    store: S,
    _phantom: PhantomData<fn() -> A>,
}

impl<S, A> Repository<S, A>
where
    S: OutboxStore,
    A: AggregateRoot,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate, returning None if it was never saved.
    pub async fn load(&self, aggregate_id: &str) -> Result<Option<A>, DomainError> {
        let Some(stored) = self
            .store
            .load_state(A::aggregate_type(), aggregate_id)
            .await?
        else {
            return Ok(None);
        };

        let mut aggregate: A = serde_json::from_value(stored.state)?;
        aggregate.set_version(stored.version);
        Ok(Some(aggregate))
    }

    /// Loads an aggregate that must exist.
    pub async fn get(&self, aggregate_id: &str) -> Result<A, DomainError> {
        self.load(aggregate_id)
            .await?
            .ok_or_else(|| DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id: aggregate_id.to_string(),
            })
    }

    /// Persists the aggregate's state and one outbox row per pending event
    /// in a single transaction.
    ///
    /// Pending events are cleared only after the commit succeeded; on error
    /// the aggregate is left untouched so the caller can retry the operation.
    #[tracing::instrument(
        skip(self, aggregate),
        fields(aggregate_type = A::aggregate_type(), aggregate_id = %aggregate.aggregate_id())
    )]
    pub async fn save(&self, aggregate: &mut A) -> Result<Version, DomainError> {
        let rows = self.outbox_rows(aggregate)?;
        let row_count = rows.len();

        let write = StateWrite {
            aggregate_type: A::aggregate_type().to_string(),
            aggregate_id: aggregate.aggregate_id().to_string(),
            expected_version: aggregate.version(),
            state: serde_json::to_value(&*aggregate)?,
        };

        let version = self.store.commit(write, rows).await?;
        aggregate.set_version(version);
        aggregate.clear_pending_events();

        metrics::counter!("outbox_events_written_total", "aggregate_type" => A::aggregate_type())
            .increment(row_count as u64);
        tracing::debug!(%version, events = row_count, "aggregate saved");

        Ok(version)
    }

    fn outbox_rows(&self, aggregate: &A) -> Result<Vec<OutboxEvent>, DomainError> {
        aggregate
            .pending_events()
            .iter()
            .map(|event| -> Result<OutboxEvent, DomainError> {
                let route = event.route();
                let mut envelope = CloudEvent::new(
                    route.event_type,
                    route.source,
                    event.subject(),
                    event.data()?,
                )
                .with_correlation_id(aggregate.aggregate_id());
                if let Some(wave) = event.wave_number() {
                    envelope = envelope.with_wave_number(wave);
                }

                Ok(OutboxEvent::from_cloud_event(
                    aggregate.aggregate_id(),
                    A::aggregate_type(),
                    route.topic,
                    &envelope,
                )?)
            })
            .collect()
    }
}

impl<S, A> Clone for Repository<S, A>
where
    S: OutboxStore + Clone,
    A: AggregateRoot,
{
    fn clone(&self) -> Self {
        Self::new(self.store.clone())
    }
}
