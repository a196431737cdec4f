use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, Version};

/// Cached aggregate state at a given version.
///
/// Purely an optimisation: replaying the events after `version` on top of
/// `state` must give the same aggregate as replaying the full stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    /// Version of the last event folded into `state`.
    pub version: Version,
    pub timestamp: DateTime<Utc>,
    pub state: serde_json::Value,
}

impl Snapshot {
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        state: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            timestamp: Utc::now(),
            state,
        }
    }

    /// Serializes `state` into a snapshot.
    pub fn from_state<T: Serialize>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            aggregate_id,
            aggregate_type,
            version,
            serde_json::to_value(state)?,
        ))
    }

    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Counter {
        value: i32,
        label: String,
    }

    #[test]
    fn test_state_survives_snapshotting() {
        let id = AggregateId::new();
        let original = Counter {
            value: 42,
            label: "answer".to_string(),
        };

        let snapshot = Snapshot::from_state(id, "Counter", Version::new(5), &original).unwrap();
        assert_eq!(snapshot.version, Version::new(5));
        assert_eq!(snapshot.aggregate_type, "Counter");

        let restored: Counter = snapshot.into_state().unwrap();
        assert_eq!(restored, original);
    }
}
