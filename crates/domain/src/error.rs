//! Domain error types.

use outbox::OutboxError;
use thiserror::Error;

use crate::order::OrderError;
use crate::wave::WaveError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the outbox store.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// An order business rule rejected the operation.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// A wave business rule rejected the operation.
    #[error("Wave error: {0}")]
    Wave(#[from] WaveError),

    /// Aggregate not found.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
