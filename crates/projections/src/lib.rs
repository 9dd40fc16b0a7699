//! Idempotent consumers and read-model projections.
//!
//! Events arrive at least once, so everything here is built to tolerate
//! redelivery:
//! - [`DeduplicatingHandler`] wraps any [`EventHandler`] and skips event ids
//!   it has already processed, using a [`ProcessedEventStore`]
//! - [`IdempotentProjector`] applies each event to a [`Projection`] exactly
//!   once by recording the event id and the record update atomically
//! - [`ProjectionProcessor`] replays the outbox log to catch up or rebuild

pub mod consumer;
pub mod dedup;
pub mod error;
pub mod processor;
pub mod projection;
pub mod projector;
pub mod store;
pub mod views;

pub use consumer::{DeduplicatingHandler, EventHandler, HandleOutcome};
pub use dedup::{
    DEFAULT_RETENTION_HOURS, InMemoryProcessedEventStore, PostgresProcessedEventStore,
    ProcessedEvent, ProcessedEventStore,
};
pub use error::{ProjectionError, Result};
pub use processor::{ProjectionProcessor, Rebuildable, ReplayReport};
pub use projection::Projection;
pub use projector::IdempotentProjector;
pub use store::{
    ApplyOutcome, EventRef, InMemoryProjectionStore, PostgresProjectionStore, ProjectionStore,
    RecordUpdate,
};
pub use views::{OrderStatusProjection, OrderStatusRecord};
