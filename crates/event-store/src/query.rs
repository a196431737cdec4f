use chrono::{DateTime, Utc};

use crate::{AggregateId, EventEnvelope, Version};

/// Ad-hoc filter over the whole log, for diagnostics and tooling.
///
/// All bounds are inclusive. Results come back ordered by timestamp, then
/// version.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub aggregate_id: Option<AggregateId>,
    pub aggregate_type: Option<String>,
    /// Matches any of the listed event types.
    pub event_types: Option<Vec<String>>,
    pub from_version: Option<Version>,
    pub to_version: Option<Version>,
    pub from_timestamp: Option<DateTime<Utc>>,
    pub to_timestamp: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_aggregate(aggregate_id: AggregateId) -> Self {
        Self::new().aggregate_id(aggregate_id)
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types
            .get_or_insert_with(Vec::new)
            .push(event_type.into());
        self
    }

    pub fn from_version(mut self, version: Version) -> Self {
        self.from_version = Some(version);
        self
    }

    pub fn to_version(mut self, version: Version) -> Self {
        self.to_version = Some(version);
        self
    }

    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether `event` passes every filter (limit and offset aside).
    pub fn matches(&self, event: &EventEnvelope) -> bool {
        if let Some(id) = self.aggregate_id
            && event.aggregate_id != id
        {
            return false;
        }
        if let Some(ref aggregate_type) = self.aggregate_type
            && &event.aggregate_type != aggregate_type
        {
            return false;
        }
        if let Some(ref types) = self.event_types
            && !types.contains(&event.event_type)
        {
            return false;
        }
        if self.from_version.is_some_and(|v| event.version < v)
            || self.to_version.is_some_and(|v| event.version > v)
        {
            return false;
        }
        if self.from_timestamp.is_some_and(|t| event.timestamp < t)
            || self.to_timestamp.is_some_and(|t| event.timestamp > t)
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewEvent;

    fn envelope(version: i64, event_type: &str) -> EventEnvelope {
        NewEvent::new(event_type, "Order", serde_json::json!({}))
            .into_envelope(AggregateId::new(), Version::new(version))
    }

    #[test]
    fn test_event_type_filters_accumulate() {
        let query = EventQuery::new()
            .event_type("OrderCreated")
            .event_type("OrderShipped");
        assert_eq!(
            query.event_types,
            Some(vec!["OrderCreated".to_string(), "OrderShipped".to_string()])
        );
    }

    #[test]
    fn test_version_bounds_are_inclusive() {
        let query = EventQuery::new()
            .from_version(Version::new(2))
            .to_version(Version::new(3));

        assert!(!query.matches(&envelope(1, "ItemAdded")));
        assert!(query.matches(&envelope(2, "ItemAdded")));
        assert!(query.matches(&envelope(3, "ItemAdded")));
        assert!(!query.matches(&envelope(4, "ItemAdded")));
    }

    #[test]
    fn test_aggregate_filter_excludes_other_streams() {
        let event = envelope(1, "OrderCreated");
        assert!(EventQuery::for_aggregate(event.aggregate_id).matches(&event));
        assert!(!EventQuery::for_aggregate(AggregateId::new()).matches(&event));
        assert!(!EventQuery::new().aggregate_type("Invoice").matches(&event));
    }
}
