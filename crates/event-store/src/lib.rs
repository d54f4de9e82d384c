//! Append-only event storage with optimistic concurrency control.
//!
//! Every aggregate owns one stream of [`EventEnvelope`]s ordered by
//! [`Version`]. Writers pass the version they loaded; the store rejects the
//! append with [`EventStoreError::ConcurrencyConflict`] when another writer got
//! there first.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use snapshot::Snapshot;
pub use store::{EventStore, EventStoreExt, EventStream, prepare_append};
