//! Domain error types.

use std::error::Error as StdError;
use std::time::Duration;

use common::AggregateId;
use event_store::{EventStoreError, Version};
use thiserror::Error;

/// A command whose own payload is malformed. Raised before anything is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: &'static str },

    #[error("{field} must be greater than zero, got {value}")]
    NotPositive { field: &'static str, value: i64 },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: i64 },
}

/// Errors that can occur while handling a command.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid command: {0}")]
    Validation(#[from] ValidationError),

    /// The aggregate refused the command. No event was produced.
    /// [`DomainError::rule`] recovers the aggregate's own error type.
    #[error("rule violated: {0}")]
    Rule(Box<dyn StdError + Send + Sync>),

    #[error("{aggregate_type} {aggregate_id} not found")]
    NotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// Another writer committed first and the retry budget is spent.
    #[error(
        "concurrency conflict on {aggregate_id}: expected version {expected}, stream is at {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The load/decide/append round trip did not finish in time. Only raised
    /// before an append completed; appends are atomic, so nothing was
    /// partially written.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("event store error: {0}")]
    EventStore(EventStoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    pub fn rule_violation<E: StdError + Send + Sync + 'static>(rule: E) -> Self {
        DomainError::Rule(Box::new(rule))
    }

    /// The rule violation as `E`, if this is one raised by an aggregate whose
    /// error type is `E`.
    pub fn rule<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            DomainError::Rule(rule) => rule.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::ConcurrencyConflict { .. })
    }

    /// Short label used for the `outcome` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation",
            DomainError::Rule(_) => "rejected",
            DomainError::NotFound { .. } => "not_found",
            DomainError::ConcurrencyConflict { .. } => "conflict",
            DomainError::Timeout(_) => "timeout",
            DomainError::EventStore(_) => "store",
            DomainError::Serialization(_) => "serialization",
        }
    }
}

impl From<EventStoreError> for DomainError {
    fn from(e: EventStoreError) -> Self {
        match e {
            EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => DomainError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            },
            other => DomainError::EventStore(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_becomes_domain_conflict() {
        let aggregate_id = AggregateId::new();
        let err: DomainError = EventStoreError::ConcurrencyConflict {
            aggregate_id,
            expected: Version::new(3),
            actual: Version::new(4),
        }
        .into();

        assert!(err.is_conflict());
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn rule_violations_keep_their_type() {
        let err = DomainError::rule_violation(ValidationError::Required { field: "holder" });

        assert_eq!(err.kind(), "rejected");
        assert_eq!(
            err.rule::<ValidationError>(),
            Some(&ValidationError::Required { field: "holder" })
        );
        assert!(err.rule::<std::fmt::Error>().is_none());
        assert_eq!(err.to_string(), "rule violated: holder is required");
    }

    #[test]
    fn other_store_errors_stay_wrapped() {
        let err: DomainError = EventStoreError::InvalidBatch("empty".to_string()).into();
        assert!(matches!(err, DomainError::EventStore(_)));
    }
}
