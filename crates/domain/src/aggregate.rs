//! Core aggregate and domain event traits.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A closed set of facts an aggregate can record.
///
/// Implementors are tagged enums serialized as `{"type": ..., "data": ...}`;
/// the tag is what the store records as `event_type`.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Newest payload shape this code can read.
    const SCHEMA_VERSION: u32 = 1;

    fn event_type(&self) -> &'static str;

    /// Every tag the enum can carry. Replay rejects anything else.
    fn known_event_types() -> &'static [&'static str];

    /// When the fact was decided. Becomes the stored event timestamp.
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// An event-sourced aggregate root.
///
/// State is only ever changed by [`Aggregate::apply`], which must be pure,
/// total and deterministic: the same events in the same order always give the
/// same state. Commands are separate methods that inspect state and return
/// new events, or a rule violation, without mutating anything.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;

    /// Raised when a command breaks a business rule.
    type Error: std::error::Error + Send + Sync + 'static;

    fn aggregate_type() -> &'static str;

    /// `None` until the creation event has been applied.
    fn id(&self) -> Option<AggregateId>;

    /// Version of the last applied event, `Version::initial()` when none.
    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    fn apply(&mut self, event: &Self::Event);
}

/// Aggregates whose state may be cached as a snapshot.
pub trait SnapshotCapable: Aggregate + Serialize + DeserializeOwned {
    /// Number of events between snapshots.
    fn snapshot_interval() -> u64 {
        100
    }

    /// Whether moving from `from` to `to` crossed a snapshot boundary.
    fn crossed_snapshot_boundary(from: Version, to: Version) -> bool {
        let interval = Self::snapshot_interval().max(1) as i64;
        to > from && to.as_i64() / interval > from.as_i64() / interval
    }
}
