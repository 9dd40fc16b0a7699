use thiserror::Error;

use crate::{EventId, Version};

/// Errors that can occur when interacting with the outbox.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The aggregate was modified since it was loaded.
    #[error(
        "Concurrency conflict for {aggregate_type} {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_type: String,
        aggregate_id: String,
        expected: Version,
        actual: Version,
    },

    /// An outbox row with this id already exists.
    #[error("Duplicate outbox event: {0}")]
    DuplicateEvent(EventId),

    /// The transaction was aborted before it became visible.
    #[error("Transaction aborted: {0}")]
    Transaction(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
