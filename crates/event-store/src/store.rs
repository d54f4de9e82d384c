use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::TryStreamExt;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version};

/// A stream of events in the store's global order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Persistence contract for event streams.
///
/// `append` is the only mutating operation on events. It must be atomic per
/// aggregate and must serialize concurrent appends to the same aggregate,
/// while appends to different aggregates proceed independently.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` to the stream of `aggregate_id`.
    ///
    /// Fails with `ConcurrencyConflict` unless the stream is currently at
    /// `expected_version`. On success the events carry versions
    /// `expected_version + 1 ..= expected_version + n` and the new stream
    /// version is returned. Either every event is stored or none is.
    async fn append(
        &self,
        aggregate_id: AggregateId,
        events: Vec<EventEnvelope>,
        expected_version: Version,
    ) -> Result<Version>;

    /// All events of one stream in version order. Empty if the stream does
    /// not exist.
    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>>;

    /// Events of one stream with `version >= from_version`, in version order.
    async fn load_from(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// Every event across all streams, in the store's global order.
    ///
    /// The in-memory store orders by commit. A store that assigns positions
    /// before commit can miss an event whose transaction commits after a
    /// later position was read; readers that must see everything subscribe
    /// to live publication before streaming.
    async fn stream_all(&self) -> Result<EventStream>;

    /// Current version of a stream, or `None` if it has no events.
    async fn stream_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Stores a snapshot, replacing any earlier one for the same aggregate.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;
}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    async fn append(
        &self,
        aggregate_id: AggregateId,
        events: Vec<EventEnvelope>,
        expected_version: Version,
    ) -> Result<Version> {
        (**self).append(aggregate_id, events, expected_version).await
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        (**self).load(aggregate_id).await
    }

    async fn load_from(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        (**self).load_from(aggregate_id, from_version).await
    }

    async fn stream_all(&self) -> Result<EventStream> {
        (**self).stream_all().await
    }

    async fn stream_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        (**self).stream_version(aggregate_id).await
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        (**self).save_snapshot(snapshot).await
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        (**self).get_snapshot(aggregate_id).await
    }
}

/// Convenience methods layered on any [`EventStore`].
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Collects [`EventStore::stream_all`] into memory. Used for full
    /// projection rebuilds.
    async fn load_all(&self) -> Result<Vec<EventEnvelope>> {
        self.stream_all().await?.try_collect().await
    }

    async fn stream_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.stream_version(aggregate_id).await?.is_some())
    }

    /// Loads the latest snapshot, if any, and the events recorded after it.
    async fn load_with_snapshot(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<(Option<Snapshot>, Vec<EventEnvelope>)> {
        match self.get_snapshot(aggregate_id).await? {
            Some(snapshot) => {
                let events = self
                    .load_from(aggregate_id, snapshot.version.next())
                    .await?;
                Ok((Some(snapshot), events))
            }
            None => Ok((None, self.load(aggregate_id).await?)),
        }
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks an append batch and stamps its versions.
///
/// The batch must be non-empty, target `aggregate_id` only and share one
/// aggregate type. Versions are rewritten to follow `expected_version`
/// contiguously, whatever the caller put there.
pub fn prepare_append(
    aggregate_id: AggregateId,
    mut events: Vec<EventEnvelope>,
    expected_version: Version,
) -> Result<Vec<EventEnvelope>> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidBatch(
            "cannot append an empty batch".to_string(),
        ));
    };
    let aggregate_type = first.aggregate_type.clone();

    let mut version = expected_version;
    for event in &mut events {
        if event.aggregate_id != aggregate_id {
            return Err(EventStoreError::InvalidBatch(format!(
                "event {} belongs to aggregate {}, not {aggregate_id}",
                event.event_id, event.aggregate_id
            )));
        }
        if event.aggregate_type != aggregate_type {
            return Err(EventStoreError::InvalidBatch(format!(
                "mixed aggregate types {aggregate_type} and {}",
                event.aggregate_type
            )));
        }
        version = version.next();
        event.version = version;
    }

    Ok(events)
}
