use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version,
    store::{EventStore, EventStream, prepare_append},
};

type StreamHandle = Arc<Mutex<Vec<EventEnvelope>>>;

/// In-memory event store.
///
/// Each aggregate stream sits behind its own mutex, so appends to one stream
/// serialize while appends to different streams run in parallel. A separate
/// commit log keeps the global order for [`EventStore::stream_all`].
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<AggregateId, StreamHandle>>>,
    log: Arc<RwLock<Vec<EventEnvelope>>>,
    snapshots: Arc<RwLock<HashMap<AggregateId, Snapshot>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all streams.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.len()
    }

    /// Drops every stream and snapshot.
    pub async fn clear(&self) {
        self.streams.write().await.clear();
        self.log.write().await.clear();
        self.snapshots.write().await.clear();
    }

    async fn stream(&self, aggregate_id: AggregateId) -> Option<StreamHandle> {
        self.streams.read().await.get(&aggregate_id).cloned()
    }

    async fn stream_or_create(&self, aggregate_id: AggregateId) -> StreamHandle {
        if let Some(stream) = self.stream(aggregate_id).await {
            return stream;
        }
        self.streams
            .write()
            .await
            .entry(aggregate_id)
            .or_default()
            .clone()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(
        &self,
        aggregate_id: AggregateId,
        events: Vec<EventEnvelope>,
        expected_version: Version,
    ) -> Result<Version> {
        let batch = prepare_append(aggregate_id, events, expected_version)?;

        let handle = self.stream_or_create(aggregate_id).await;
        let mut stream = handle.lock().await;

        let actual = stream.last().map(|e| e.version).unwrap_or_default();
        if actual != expected_version {
            metrics::counter!("event_store_concurrency_conflicts_total").increment(1);
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        let new_version = expected_version.advanced_by(batch.len());
        // The stream lock is held until both writes land, so readers never see
        // a partial batch in the stream and the log keeps per-stream order.
        let mut log = self.log.write().await;
        log.extend(batch.iter().cloned());
        metrics::counter!("event_store_events_appended_total").increment(batch.len() as u64);
        stream.extend(batch);

        Ok(new_version)
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        match self.stream(aggregate_id).await {
            Some(stream) => Ok(stream.lock().await.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn load_from(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let Some(stream) = self.stream(aggregate_id).await else {
            return Ok(Vec::new());
        };
        let stream = stream.lock().await;
        Ok(stream
            .iter()
            .filter(|e| e.version >= from_version)
            .cloned()
            .collect())
    }

    async fn stream_all(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.log.read().await.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn stream_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let Some(stream) = self.stream(aggregate_id).await else {
            return Ok(None);
        };
        let stream = stream.lock().await;
        Ok(stream.last().map(|e| e.version))
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().await.get(&aggregate_id).cloned())
    }
}
