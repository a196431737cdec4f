use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream;
use tokio::sync::{Mutex, RwLock};

use crate::{
    AggregateId, EventEnvelope, EventId, EventQuery, EventStoreError, NewEvent, Result, Snapshot,
    Version,
    store::{EventStore, EventStream, ensure_same_aggregate_type, validate_new_events},
};

type StreamHandle = Arc<Mutex<Vec<EventEnvelope>>>;

/// Every committed event in commit order, plus the ids already taken.
#[derive(Default)]
struct CommitLog {
    events: Vec<EventEnvelope>,
    ids: HashSet<EventId>,
}

/// Event store held entirely in process memory.
///
/// Each aggregate's stream sits behind its own mutex, so appends to
/// different aggregates never wait on each other. A separate log keeps the
/// global commit order for `stream_all`.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<AggregateId, StreamHandle>>>,
    log: Arc<RwLock<CommitLog>>,
    snapshots: Arc<RwLock<HashMap<AggregateId, BTreeMap<Version, Snapshot>>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of committed events across all aggregates.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }

    async fn stream_handle(&self, aggregate_id: AggregateId) -> Option<StreamHandle> {
        self.streams.read().await.get(&aggregate_id).cloned()
    }

    async fn stream_handle_or_create(&self, aggregate_id: AggregateId) -> StreamHandle {
        if let Some(handle) = self.stream_handle(aggregate_id).await {
            return handle;
        }
        self.streams
            .write()
            .await
            .entry(aggregate_id)
            .or_default()
            .clone()
    }

    async fn committed(&self, aggregate_id: AggregateId) -> Vec<EventEnvelope> {
        match self.stream_handle(aggregate_id).await {
            Some(handle) => handle.lock().await.clone(),
            None => Vec::new(),
        }
    }
}

fn into_stream(events: Vec<EventEnvelope>) -> EventStream {
    Box::pin(stream::iter(events.into_iter().map(Ok)))
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, events), fields(batch = events.len()))]
    async fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: Version,
        events: Vec<NewEvent>,
    ) -> Result<Vec<EventEnvelope>> {
        validate_new_events(expected_version, &events)?;

        let handle = self.stream_handle_or_create(aggregate_id).await;
        let mut stream = handle.lock().await;

        let actual = stream.last().map_or(Version::initial(), |e| e.version);
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
            stream.first().map(|e| e.aggregate_type.as_str()),
            &events[0].aggregate_type,
        )?;

        // Held until the batch is in the log, so no other append can claim
        // one of these ids in between.
        let mut log = self.log.write().await;
        if let Some(taken) = events.iter().find(|e| log.ids.contains(&e.event_id)) {
            return Err(EventStoreError::validation(format!(
                "event id {} is already committed",
                taken.event_id
            )));
        }

        let mut version = expected_version;
        let committed: Vec<EventEnvelope> = events
            .into_iter()
            .map(|event| {
                version = version.next();
                event.into_envelope(aggregate_id, version)
            })
            .collect();

        // The global log is extended while the stream lock is held, so the
        // commit order of one aggregate always matches its version order.
        log.ids.extend(committed.iter().map(|e| e.event_id));
        log.events.extend(committed.iter().cloned());
        stream.extend(committed.iter().cloned());

        metrics::counter!("event_store_events_appended_total").increment(committed.len() as u64);
        tracing::debug!(new_version = %version, "events committed");
        Ok(committed)
    }

    async fn load(
        &self,
        aggregate_id: AggregateId,
        after_version: Version,
    ) -> Result<EventStream> {
        let events = self
            .committed(aggregate_id)
            .await
            .into_iter()
            .filter(|e| e.version > after_version)
            .collect();
        Ok(into_stream(events))
    }

    async fn load_by_timestamp(
        &self,
        aggregate_id: AggregateId,
        as_of: DateTime<Utc>,
    ) -> Result<EventStream> {
        let events = self
            .committed(aggregate_id)
            .await
            .into_iter()
            .take_while(|e| e.timestamp <= as_of)
            .collect();
        Ok(into_stream(events))
    }

    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Version> {
        Ok(match self.stream_handle(aggregate_id).await {
            Some(handle) => handle
                .lock()
                .await
                .last()
                .map_or(Version::initial(), |e| e.version),
            None => Version::initial(),
        })
    }

    async fn stream_all(&self) -> Result<EventStream> {
        Ok(into_stream(self.log.read().await.events.clone()))
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let mut events: Vec<_> = self
            .log
            .read()
            .await
            .events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();

        events.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.version.cmp(&b.version))
        });

        let events = events.into_iter().skip(query.offset.unwrap_or(0));
        Ok(match query.limit {
            Some(limit) => events.take(limit).collect(),
            None => events.collect(),
        })
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let current = self.current_version(snapshot.aggregate_id).await?;
        if snapshot.version < Version::first() || snapshot.version > current {
            return Err(EventStoreError::validation(format!(
                "snapshot version {} is outside the stream of {} (current version {current})",
                snapshot.version, snapshot.aggregate_id
            )));
        }

        self.snapshots
            .write()
            .await
            .entry(snapshot.aggregate_id)
            .or_default()
            .insert(snapshot.version, snapshot);
        Ok(())
    }

    async fn load_latest_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        Ok(self
            .snapshots
            .read()
            .await
            .get(&aggregate_id)
            .and_then(|by_version| by_version.values().next_back().cloned()))
    }
}
