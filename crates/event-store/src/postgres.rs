use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{TryStreamExt, stream};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventQuery, EventStoreError, NewEvent, Result, Snapshot,
    Version,
    store::{EventStore, EventStream, ensure_same_aggregate_type, validate_new_events},
};

const EVENT_COLUMNS: &str = "position, id, event_type, aggregate_id, aggregate_type, version, \
                             schema_version, timestamp, payload, metadata";

/// Rows fetched per round trip when streaming.
const PAGE_SIZE: i64 = 500;

/// PostgreSQL-backed event store.
///
/// Per-aggregate linearizability comes from the `unique_aggregate_version`
/// constraint: two transactions racing for the same version cannot both
/// commit.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and applies pending migrations.
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

    /// Streams rows page by page, keyed on a monotonically increasing column.
    ///
    /// `fetch_page` receives the last seen key and returns the next page.
    fn paged<F, Fut>(pool: PgPool, start: i64, fetch_page: F) -> EventStream
    where
        F: Fn(PgPool, i64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<(i64, EventEnvelope)>>> + Send + 'static,
    {
        let pages = stream::try_unfold(
            (pool, start, false),
            move |(pool, cursor, exhausted)| {
                let next = (!exhausted).then(|| fetch_page(pool.clone(), cursor));
                async move {
                    let Some(next) = next else {
                        return Ok(None);
                    };
                    let page = next.await?;
                    let exhausted = (page.len() as i64) < PAGE_SIZE;
                    let cursor = page.last().map_or(cursor, |(key, _)| *key);
                    let events = page
                        .into_iter()
                        .map(|(_, event)| Ok::<_, EventStoreError>(event));
                    Ok::<_, EventStoreError>(Some((
                        stream::iter(events),
                        (pool, cursor, exhausted),
                    )))
                }
            },
        );
        Box::pin(pages.try_flatten())
    }
}

fn row_to_event(row: &PgRow) -> Result<EventEnvelope> {
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_value(row.try_get("metadata")?)?;
    let schema_version: i32 = row.try_get("schema_version")?;

    Ok(EventEnvelope {
        event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        event_type: row.try_get("event_type")?,
        aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
        aggregate_type: row.try_get("aggregate_type")?,
        version: Version::new(row.try_get("version")?),
        timestamp: row.try_get("timestamp")?,
        schema_version: u32::try_from(schema_version).map_err(|_| {
            EventStoreError::Validation(format!("stored schema_version {schema_version} is invalid"))
        })?,
        payload: row.try_get("payload")?,
        metadata,
    })
}

fn rows_to_events(rows: Vec<PgRow>) -> Result<Vec<EventEnvelope>> {
    rows.iter().map(row_to_event).collect()
}

async fn fetch_stream_page(
    pool: PgPool,
    aggregate_id: AggregateId,
    after_version: i64,
) -> Result<Vec<(i64, EventEnvelope)>> {
    let rows = sqlx::query(&format!(
        "SELECT {EVENT_COLUMNS} FROM events \
         WHERE aggregate_id = $1 AND version > $2 \
         ORDER BY version ASC LIMIT $3"
    ))
    .bind(aggregate_id.as_uuid())
    .bind(after_version)
    .bind(PAGE_SIZE)
    .fetch_all(&pool)
    .await?;

    rows.iter()
        .map(|row| row_to_event(row).map(|event| (event.version.as_i64(), event)))
        .collect()
}

async fn fetch_log_page(pool: PgPool, after_position: i64) -> Result<Vec<(i64, EventEnvelope)>> {
    let rows = sqlx::query(&format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE position > $1 ORDER BY position ASC LIMIT $2"
    ))
    .bind(after_position)
    .bind(PAGE_SIZE)
    .fetch_all(&pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<(i64, EventEnvelope)> {
            Ok((row.try_get("position")?, row_to_event(row)?))
        })
        .collect()
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(batch = events.len()))]
    async fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: Version,
        events: Vec<NewEvent>,
    ) -> Result<Vec<EventEnvelope>> {
        validate_new_events(expected_version, &events)?;

        let mut tx = self.pool.begin().await?;

        let head = sqlx::query(
            "SELECT version, aggregate_type FROM events \
             WHERE aggregate_id = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let (actual, existing_type) = match head {
            Some(row) => (
                Version::new(row.try_get("version")?),
                Some(row.try_get::<String, _>("aggregate_type")?),
            ),
            None => (Version::initial(), None),
        };

        if actual != expected_version {
            metrics::counter!("event_store_concurrency_conflicts_total").increment(1);
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }
        ensure_same_aggregate_type(
            aggregate_id,
            existing_type.as_deref(),
            &events[0].aggregate_type,
        )?;

        let mut committed = Vec::with_capacity(events.len());
        let mut version = expected_version;
        for event in events {
            version = version.next();
            let event = event.into_envelope(aggregate_id, version);
            let metadata = serde_json::to_value(&event.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, schema_version, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(aggregate_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(version.as_i64())
            .bind(event.schema_version as i32)
            .bind(event.timestamp)
            .bind(&event.payload)
            .bind(metadata)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // A racing writer committed this version first.
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_aggregate_version")
                {
                    metrics::counter!("event_store_concurrency_conflicts_total").increment(1);
                    return EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        expected: expected_version,
                        actual: version,
                    };
                }
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("events_pkey")
                {
                    return EventStoreError::Validation(format!(
                        "event id {} is already committed",
                        event.event_id
                    ));
                }
                EventStoreError::StorageUnavailable(e)
            })?;

            committed.push(event);
        }

        tx.commit().await?;

        metrics::counter!("event_store_events_appended_total").increment(committed.len() as u64);
        tracing::debug!(new_version = %version, "events committed");
        Ok(committed)
    }

    async fn load(
        &self,
        aggregate_id: AggregateId,
        after_version: Version,
    ) -> Result<EventStream> {
        Ok(Self::paged(
            self.pool.clone(),
            after_version.as_i64(),
            move |pool, cursor| fetch_stream_page(pool, aggregate_id, cursor),
        ))
    }

    async fn load_by_timestamp(
        &self,
        aggregate_id: AggregateId,
        as_of: DateTime<Utc>,
    ) -> Result<EventStream> {
        // Everything below the first event stamped after `as_of`.
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE aggregate_id = $1 AND version < COALESCE( \
                 (SELECT MIN(version) FROM events WHERE aggregate_id = $1 AND timestamp > $2), \
                 9223372036854775807) \
             ORDER BY version ASC"
        ))
        .bind(aggregate_id.as_uuid())
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        let events = rows_to_events(rows)?;
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Version> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map_or(Version::initial(), Version::new))
    }

    async fn stream_all(&self) -> Result<EventStream> {
        Ok(Self::paged(self.pool.clone(), 0, fetch_log_page))
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE 1=1");
        let mut param_count = 0;
        let mut next_param = || {
            param_count += 1;
            param_count
        };

        if query.aggregate_id.is_some() {
            sql.push_str(&format!(" AND aggregate_id = ${}", next_param()));
        }
        if query.aggregate_type.is_some() {
            sql.push_str(&format!(" AND aggregate_type = ${}", next_param()));
        }
        if query.event_types.is_some() {
            sql.push_str(&format!(" AND event_type = ANY(${})", next_param()));
        }
        if query.from_version.is_some() {
            sql.push_str(&format!(" AND version >= ${}", next_param()));
        }
        if query.to_version.is_some() {
            sql.push_str(&format!(" AND version <= ${}", next_param()));
        }
        if query.from_timestamp.is_some() {
            sql.push_str(&format!(" AND timestamp >= ${}", next_param()));
        }
        if query.to_timestamp.is_some() {
            sql.push_str(&format!(" AND timestamp <= ${}", next_param()));
        }
        sql.push_str(" ORDER BY timestamp ASC, version ASC");
        if query.limit.is_some() {
            sql.push_str(&format!(" LIMIT ${}", next_param()));
        }
        if query.offset.is_some() {
            sql.push_str(&format!(" OFFSET ${}", next_param()));
        }

        let mut statement = sqlx::query(&sql);
        if let Some(id) = query.aggregate_id {
            statement = statement.bind(id.as_uuid());
        }
        if let Some(aggregate_type) = query.aggregate_type {
            statement = statement.bind(aggregate_type);
        }
        if let Some(event_types) = query.event_types {
            statement = statement.bind(event_types);
        }
        if let Some(from_version) = query.from_version {
            statement = statement.bind(from_version.as_i64());
        }
        if let Some(to_version) = query.to_version {
            statement = statement.bind(to_version.as_i64());
        }
        if let Some(from) = query.from_timestamp {
            statement = statement.bind(from);
        }
        if let Some(to) = query.to_timestamp {
            statement = statement.bind(to);
        }
        if let Some(limit) = query.limit {
            statement = statement.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            statement = statement.bind(offset as i64);
        }

        rows_to_events(statement.fetch_all(&self.pool).await?)
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let current = self.current_version(snapshot.aggregate_id).await?;
        if snapshot.version < Version::first() || snapshot.version > current {
            return Err(EventStoreError::Validation(format!(
                "snapshot version {} is outside the stream of {} (current version {current})",
                snapshot.version, snapshot.aggregate_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, version, aggregate_type, timestamp, state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id, version) DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                timestamp = EXCLUDED.timestamp,
                state = EXCLUDED.state
            "#,
        )
        .bind(snapshot.aggregate_id.as_uuid())
        .bind(snapshot.version.as_i64())
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.timestamp)
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_latest_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            r#"
            SELECT aggregate_id, aggregate_type, version, timestamp, state
            FROM snapshots
            WHERE aggregate_id = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Snapshot {
                aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
                aggregate_type: row.try_get("aggregate_type")?,
                version: Version::new(row.try_get("version")?),
                timestamp: row.try_get("timestamp")?,
                state: row.try_get("state")?,
            })
        })
        .transpose()
    }
}
