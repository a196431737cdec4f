use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use futures_util::TryStreamExt;

use crate::{
    AggregateId, EventEnvelope, EventQuery, EventStoreError, NewEvent, Result, Snapshot, Version,
};

/// A stream of committed events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// The append-only event log.
///
/// Implementations must be linearizable per aggregate: of two appends that
/// name the same expected version, exactly one commits. Appends to different
/// aggregates do not coordinate.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically commits `events` after `expected_version`.
    ///
    /// The events receive versions `expected_version + 1`, `+ 2`, ... and are
    /// returned with those versions. Fails with `ConcurrencyConflict` when the
    /// stream is not at `expected_version`, and with `Validation` when the
    /// batch is empty or malformed. Nothing is written on failure.
    async fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: Version,
        events: Vec<NewEvent>,
    ) -> Result<Vec<EventEnvelope>>;

    /// Streams the aggregate's events with version greater than
    /// `after_version`, in ascending version order.
    ///
    /// Every call starts a new read, so a stream can be re-read from the
    /// start by calling `load` again.
    async fn load(&self, aggregate_id: AggregateId, after_version: Version)
    -> Result<EventStream>;

    /// Streams the longest prefix of the aggregate's stream whose timestamps
    /// are all at or before `as_of`.
    ///
    /// Stopping at the first later event keeps the result gap-free even if
    /// clocks produced out-of-order timestamps.
    async fn load_by_timestamp(
        &self,
        aggregate_id: AggregateId,
        as_of: DateTime<Utc>,
    ) -> Result<EventStream>;

    /// Version of the last committed event, or `Version::initial()` when the
    /// aggregate has no events.
    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Version>;

    /// Streams every committed event in commit order.
    ///
    /// Events of one aggregate appear in version order; the interleaving of
    /// different aggregates carries no meaning.
    async fn stream_all(&self) -> Result<EventStream>;

    /// Runs an ad-hoc filter over the log.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    /// Stores a snapshot. Snapshots never replace events and are never
    /// authoritative.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Returns the snapshot with the highest version, if any.
    async fn load_latest_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;
}

/// Convenience methods available on every event store.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Collects the whole stream of an aggregate.
    async fn load_all(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        self.load(aggregate_id, Version::initial())
            .await?
            .try_collect()
            .await
    }

    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.current_version(aggregate_id).await? > Version::initial())
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Lets callers pick a backend at runtime behind `Arc<dyn EventStore>`.
#[async_trait]
impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    async fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: Version,
        events: Vec<NewEvent>,
    ) -> Result<Vec<EventEnvelope>> {
        (**self).append(aggregate_id, expected_version, events).await
    }

    async fn load(
        &self,
        aggregate_id: AggregateId,
        after_version: Version,
    ) -> Result<EventStream> {
        (**self).load(aggregate_id, after_version).await
    }

    async fn load_by_timestamp(
        &self,
        aggregate_id: AggregateId,
        as_of: DateTime<Utc>,
    ) -> Result<EventStream> {
        (**self).load_by_timestamp(aggregate_id, as_of).await
    }

    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Version> {
        (**self).current_version(aggregate_id).await
    }

    async fn stream_all(&self) -> Result<EventStream> {
        (**self).stream_all().await
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        (**self).query_events(query).await
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        (**self).save_snapshot(snapshot).await
    }

    async fn load_latest_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        (**self).load_latest_snapshot(aggregate_id).await
    }
}

/// Checks a batch before any backend touches storage.
pub(crate) fn validate_new_events(expected_version: Version, events: &[NewEvent]) -> Result<()> {
    if expected_version < Version::initial() {
        return Err(EventStoreError::validation(format!(
            "expected version must not be negative, got {expected_version}"
        )));
    }

    let Some(first) = events.first() else {
        return Err(EventStoreError::validation("cannot append an empty batch"));
    };

    let mut seen = HashSet::with_capacity(events.len());
    for event in events {
        if event.event_type.trim().is_empty() {
            return Err(EventStoreError::validation("event_type must not be empty"));
        }
        if event.aggregate_type.trim().is_empty() {
            return Err(EventStoreError::validation(
                "aggregate_type must not be empty",
            ));
        }
        if event.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::validation(format!(
                "all events in a batch must share one aggregate type, found {} and {}",
                first.aggregate_type, event.aggregate_type
            )));
        }
        if event.schema_version == 0 {
            return Err(EventStoreError::validation(format!(
                "event {} has schema_version 0",
                event.event_id
            )));
        }
        if !seen.insert(event.event_id) {
            return Err(EventStoreError::validation(format!(
                "duplicate event id {} in batch",
                event.event_id
            )));
        }
    }

    Ok(())
}

/// Rejects a batch whose aggregate type differs from the stream's.
pub(crate) fn ensure_same_aggregate_type(
    aggregate_id: AggregateId,
    existing: Option<&str>,
    incoming: &str,
) -> Result<()> {
    match existing {
        Some(existing) if existing != incoming => Err(EventStoreError::validation(format!(
            "aggregate {aggregate_id} is a {existing}, cannot append {incoming} events"
        ))),
        _ => Ok(()),
    }
}
