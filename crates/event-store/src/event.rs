use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AggregateId;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an event inside its aggregate's stream.
///
/// Committed versions start at 1 and grow by exactly 1 per event. Version 0
/// means "no events yet" and is what callers pass as the expected version
/// when creating a new aggregate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The version of an aggregate with no events.
    pub fn initial() -> Self {
        Self(0)
    }

    /// The version assigned to the first committed event.
    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// An event that has been decided but not yet committed.
///
/// It carries everything except its position: the store assigns the version
/// when the batch is appended. The id and timestamp are fixed here, at
/// decision time, so replaying the committed event never has to invent them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_id: EventId,
    /// Variant tag of the payload (e.g. "OrderCreated").
    pub event_type: String,
    /// Kind of aggregate the stream belongs to (e.g. "Order").
    pub aggregate_type: String,
    pub timestamp: DateTime<Utc>,
    /// Version of the payload's shape. Must be at least 1.
    pub schema_version: u32,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewEvent {
    /// Creates an event with a fresh id, the current time and schema version 1.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            aggregate_type: aggregate_type.into(),
            timestamp: Utc::now(),
            schema_version: 1,
            payload,
            metadata: HashMap::new(),
        }
    }

    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_schema_version(mut self, schema_version: u32) -> Self {
        self.schema_version = schema_version;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Stamps the event with its stream position.
    pub fn into_envelope(self, aggregate_id: AggregateId, version: Version) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id,
            event_type: self.event_type,
            aggregate_id,
            aggregate_type: self.aggregate_type,
            version,
            timestamp: self.timestamp,
            schema_version: self.schema_version,
            payload: self.payload,
            metadata: self.metadata,
        }
    }
}

/// A committed event: the immutable unit of the log.
///
/// For a given `aggregate_id` the committed versions form the gap-free
/// sequence 1, 2, 3, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub event_type: String,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
    pub schema_version: u32,
    pub payload: serde_json::Value,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    /// Decodes the payload into a typed event.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
