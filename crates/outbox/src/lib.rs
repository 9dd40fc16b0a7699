//! Transactional outbox.
//!
//! Services persist their aggregate state and the events it produced in one
//! transaction through [`OutboxStore::commit`]. An [`OutboxPublisher`] then
//! relays unpublished rows to a [`MessageBus`] at least once, claiming rows
//! with a lease so that several publishers can share one store.

pub mod bus;
pub mod cloudevent;
pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod publisher;
pub mod store;

pub use bus::{BusError, BusMessage, DEFAULT_LOG_CAPACITY, InMemoryMessageBus, MessageBus};
pub use cloudevent::CloudEvent;
pub use common::Version;
pub use error::{OutboxError, Result};
pub use event::{EventId, OutboxEvent, OutboxEventBuilder};
pub use memory::InMemoryOutboxStore;
pub use postgres::PostgresOutboxStore;
pub use publisher::{OutboxPublisher, PublishReport, PublisherConfig, PublisherStats};
pub use store::{ClaimRequest, EventStream, OutboxStore, OutboxStoreExt, StateWrite, StoredState};
