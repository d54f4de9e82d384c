use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventStoreError, Result, Snapshot, Version,
    store::{EventStore, EventStream, prepare_append},
};

const EVENT_COLUMNS: &str =
    "id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata";

const STREAM_PAGE_SIZE: i64 = 500;

/// PostgreSQL-backed event store.
///
/// Each append runs in one transaction. The `MAX(version)` check catches stale
/// writers up front and the `unique_aggregate_version` constraint catches the
/// ones that race past it, so both paths surface as `ConcurrencyConflict`.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and runs the bundled migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self::new(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn fetch_page(pool: &PgPool, after: i64) -> Result<Vec<(i64, EventEnvelope)>> {
        let rows = sqlx::query(&format!(
            "SELECT position, {EVENT_COLUMNS} FROM events WHERE position > $1 ORDER BY position ASC LIMIT $2"
        ))
        .bind(after)
        .bind(STREAM_PAGE_SIZE)
        .fetch_all(pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<(i64, EventEnvelope)> {
                let position: i64 = row.try_get("position")?;
                Ok((position, Self::row_to_event(row)?))
            })
            .collect()
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(
        &self,
        aggregate_id: AggregateId,
        events: Vec<EventEnvelope>,
        expected_version: Version,
    ) -> Result<Version> {
        let batch = prepare_append(aggregate_id, events, expected_version)?;
        let conflict = |actual: Version| {
            metrics::counter!("event_store_concurrency_conflicts_total").increment(1);
            EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            }
        };

        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;
        let actual = Version::new(current.unwrap_or(0));
        if actual != expected_version {
            return Err(conflict(actual));
        }

        for event in &batch {
            let metadata_json = serde_json::to_value(&event.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(event.aggregate_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(event.version.as_i64())
            .bind(event.timestamp)
            .bind(&event.payload)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err)
                    if db_err.constraint() == Some("unique_aggregate_version") =>
                {
                    conflict(event.version)
                }
                other => EventStoreError::Database(other),
            })?;
        }

        tx.commit().await?;
        metrics::counter!("event_store_events_appended_total").increment(batch.len() as u64);
        Ok(expected_version.advanced_by(batch.len()))
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE aggregate_id = $1 ORDER BY version ASC"
        ))
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn load_from(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE aggregate_id = $1 AND version >= $2 ORDER BY version ASC"
        ))
        .bind(aggregate_id.as_uuid())
        .bind(from_version.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    /// Pages through `events` by `position`.
    ///
    /// `position` is allocated at insert, not at commit. A transaction that
    /// holds a lower position but commits after a higher one was read is
    /// not seen by this stream. Projections still receive it from the bus,
    /// because they subscribe before catching up.
    async fn stream_all(&self) -> Result<EventStream> {
        use futures_util::{StreamExt, TryStreamExt, stream};

        // Keyset pagination over `position` keeps the stream independent of
        // `&self` and bounds memory on large logs.
        let pages = stream::try_unfold(
            (self.pool.clone(), 0_i64, false),
            |(pool, after, exhausted)| async move {
                if exhausted {
                    return Ok::<_, EventStoreError>(None);
                }
                let page = Self::fetch_page(&pool, after).await?;
                let last = page.last().map(|(position, _)| *position).unwrap_or(after);
                let exhausted = (page.len() as i64) < STREAM_PAGE_SIZE;
                let events: Vec<_> = page.into_iter().map(|(_, event)| event).collect();
                Ok(Some((events, (pool, last, exhausted))))
            },
        );

        let events = pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
            .try_flatten();

        Ok(events.boxed())
    }

    async fn stream_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, aggregate_type, version, taken_at, state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id) DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                version = EXCLUDED.version,
                taken_at = EXCLUDED.taken_at,
                state = EXCLUDED.state
            "#,
        )
        .bind(snapshot.aggregate_id.as_uuid())
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version.as_i64())
        .bind(snapshot.taken_at)
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        let row: Option<PgRow> = sqlx::query(
            "SELECT aggregate_id, aggregate_type, version, taken_at, state FROM snapshots WHERE aggregate_id = $1",
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Snapshot> {
            Ok(Snapshot {
                aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
                aggregate_type: row.try_get("aggregate_type")?,
                version: Version::new(row.try_get("version")?),
                taken_at: row.try_get::<DateTime<Utc>, _>("taken_at")?,
                state: row.try_get("state")?,
            })
        })
        .transpose()
    }
}
