//! Top-level error type for the binary.

use domain::DomainError;
use event_store::EventStoreError;
use projections::{ProjectionError, QueryError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("event store: {0}")]
    Store(#[from] EventStoreError),

    #[error("command failed: {0}")]
    Domain(#[from] DomainError),

    #[error("projection: {0}")]
    Projection(#[from] ProjectionError),

    #[error("query failed: {0}")]
    Query(#[from] QueryError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}
