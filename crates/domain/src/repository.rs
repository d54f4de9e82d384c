//! Loading and persisting aggregates.

use std::marker::PhantomData;

use common::AggregateId;
use event_bus::EventBus;
use event_store::{EventEnvelope, EventStore, EventStoreExt, Snapshot};

use crate::aggregate::{Aggregate, AggregateRoot, RecordedEvent};
use crate::error::DomainError;

/// Event-store-backed repository for one aggregate type.
///
/// The repository owns the write path's two side effects: appending with the
/// aggregate's concurrency token and publishing what was appended.
pub struct Repository<S, A> {
    store: S,
    bus: EventBus,
    snapshot_interval: Option<u64>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<S: Clone, A> Clone for Repository<S, A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            bus: self.bus.clone(),
            snapshot_interval: self.snapshot_interval,
            _aggregate: PhantomData,
        }
    }
}

impl<S, A> Repository<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            snapshot_interval: None,
            _aggregate: PhantomData,
        }
    }

    /// Saves a snapshot whenever a commit crosses a multiple of `interval`
    /// versions, and loads from the latest snapshot. Zero disables it.
    pub fn with_snapshots(mut self, interval: u64) -> Self {
        self.snapshot_interval = (interval > 0).then_some(interval);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Rebuilds an aggregate from its stream. `NotFound` if it has no events.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn get_by_id(&self, id: AggregateId) -> Result<AggregateRoot<A>, DomainError> {
        self.load(id).await?.ok_or(DomainError::NotFound {
            aggregate_type: A::aggregate_type(),
            aggregate_id: id,
        })
    }

    /// Like [`Repository::get_by_id`], but a missing stream yields a fresh
    /// aggregate at version 0.
    pub async fn load_or_new(&self, id: AggregateId) -> Result<AggregateRoot<A>, DomainError> {
        Ok(self
            .load(id)
            .await?
            .unwrap_or_else(|| AggregateRoot::new(id)))
    }

    async fn load(&self, id: AggregateId) -> Result<Option<AggregateRoot<A>>, DomainError> {
        if self.snapshot_interval.is_some()
            && let (Some(snapshot), tail) = self.store.load_with_snapshot(id).await?
        {
            match snapshot.restore::<A>() {
                Ok(state) => {
                    let mut root = AggregateRoot::restore(id, snapshot.version, state);
                    root.replay(decode_all::<A>(&tail)?);
                    return Ok(Some(root));
                }
                Err(e) => {
                    tracing::warn!(aggregate_id = %id, error = %e, "unreadable snapshot; replaying full stream");
                }
            }
        }

        let events = self.store.load(id).await?;
        if events.is_empty() {
            return Ok(None);
        }
        Ok(Some(AggregateRoot::load_from_history(
            id,
            decode_all::<A>(&events)?,
        )))
    }

    /// Appends the aggregate's uncommitted events without publishing them.
    ///
    /// Uses the version the aggregate was loaded at as the expected version,
    /// so a concurrent writer surfaces as `ConcurrencyConflict`. On success the
    /// uncommitted queue is cleared and the stored envelopes are returned.
    /// Returns as soon as the append lands; snapshots are taken separately
    /// by [`Repository::snapshot_if_due`].
    #[tracing::instrument(skip(self, root), fields(aggregate_id = %root.id(), count = root.uncommitted_events().len()))]
    pub async fn commit(
        &self,
        root: &mut AggregateRoot<A>,
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        if !root.has_uncommitted() {
            return Ok(Vec::new());
        }

        let envelopes = root
            .uncommitted_events()
            .iter()
            .map(|recorded| recorded.to_envelope(A::aggregate_type()))
            .collect::<Result<Vec<_>, _>>()?;
        let expected = root.committed_version();

        self.store
            .append(root.id(), envelopes.clone(), expected)
            .await?;
        root.mark_committed();
        Ok(envelopes)
    }

    /// Hands committed events to the bus in version order.
    ///
    /// The events are already durable, so a bus failure is logged rather
    /// than returned.
    pub async fn publish(&self, events: &[EventEnvelope]) {
        if events.is_empty() {
            return;
        }
        if let Err(e) = self.bus.publish_all(events.iter().cloned()).await {
            tracing::error!(error = %e, count = events.len(), "committed events were not published");
        }
    }

    /// Commits, publishes, then snapshots if due. No-op without uncommitted
    /// events.
    pub async fn save(
        &self,
        root: &mut AggregateRoot<A>,
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let committed = self.commit(root).await?;
        self.publish(&committed).await;
        self.snapshot_if_due(root.id(), root.state(), &committed).await;
        Ok(committed)
    }

    /// Saves `state` as a snapshot when `committed` crosses a multiple of the
    /// snapshot interval. `state` must be the state after those events.
    ///
    /// The events are already durable, so a failed save is only logged.
    pub async fn snapshot_if_due(
        &self,
        id: AggregateId,
        state: &A,
        committed: &[EventEnvelope],
    ) {
        let (Some(interval), Some(first), Some(last)) =
            (self.snapshot_interval, committed.first(), committed.last())
        else {
            return;
        };
        let interval = interval as i64;
        let before = first.version.as_i64() - 1;
        let after = last.version;
        if before / interval == after.as_i64() / interval {
            return;
        }

        let result = match Snapshot::capture(id, A::aggregate_type(), after, state) {
            Ok(snapshot) => self.store.save_snapshot(snapshot).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => tracing::debug!(aggregate_id = %id, version = %after, "snapshot saved"),
            Err(e) => tracing::warn!(aggregate_id = %id, error = %e, "snapshot not saved"),
        }
    }
}

fn decode_all<A: Aggregate>(
    events: &[EventEnvelope],
) -> Result<Vec<RecordedEvent<A::Event>>, DomainError> {
    events
        .iter()
        .map(|envelope| RecordedEvent::from_envelope(envelope).map_err(DomainError::from))
        .collect()
}
