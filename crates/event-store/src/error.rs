use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream moved on since the writer loaded it.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The batch handed to `append` is malformed.
    #[error("Invalid append batch: {0}")]
    InvalidBatch(String),

    /// An envelope was built without one of its required fields.
    #[error("Incomplete event envelope: missing {0}")]
    IncompleteEnvelope(&'static str),

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

impl EventStoreError {
    /// True for optimistic version mismatches, which callers may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
