//! Projection and query error types.

use thiserror::Error;

/// Errors raised while feeding events to projections.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// The payload did not decode into the event type the view expects.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Projection error: {0}")]
    Projection(String),
}

pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Errors returned by query handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The read model has no entry under `key`.
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
}
