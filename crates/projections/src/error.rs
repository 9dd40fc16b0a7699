//! Projection error types.

use thiserror::Error;

/// Errors that can occur while consuming events or updating read models.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Outbox error: {0}")]
    Outbox(#[from] outbox::OutboxError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to decode an event or a stored record.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// A projection rejected an event.
    #[error("Projection error: {0}")]
    Projection(String),

    /// A wrapped consumer failed; the event stays eligible for redelivery.
    #[error("Handler error: {0}")]
    Handler(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
