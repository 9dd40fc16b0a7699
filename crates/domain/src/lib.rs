//! Domain layer.
//!
//! This crate provides:
//! - [`AggregateRoot`] for state-stored aggregates that buffer pending events
//! - [`DomainEvent`] for closed event enums that carry their own routing
//! - [`Repository`], the outbox writer that saves state and events atomically
//! - the [`Order`] and [`Wave`] aggregates

pub mod aggregate;
pub mod error;
pub mod order;
pub mod repository;
pub mod wave;

pub use aggregate::{AggregateRoot, DomainEvent, EventRoute};
pub use error::DomainError;
pub use order::{
    Order, OrderCancelled, OrderError, OrderEvent, OrderLine, OrderReceived, OrderStatus,
    OrderWaveAssigned, Priority,
};
pub use repository::Repository;
pub use wave::{Wave, WaveCreated, WaveError, WaveEvent};
