use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Another writer advanced the stream since the caller loaded it.
    /// Recoverable: reload the aggregate and retry the command.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The batch or request was malformed. Fatal for the call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The storage backend could not be reached or failed mid-operation.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// Conflicts need a reload before the retry; storage failures only need
    /// backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::StorageUnavailable(_)
        )
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicts_and_outages_are_retryable() {
        let conflict = EventStoreError::ConcurrencyConflict {
            aggregate_id: AggregateId::new(),
            expected: Version::new(1),
            actual: Version::new(2),
        };
        assert!(conflict.is_concurrency_conflict());
        assert!(conflict.is_retryable());
        assert!(EventStoreError::StorageUnavailable(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!EventStoreError::validation("empty batch").is_retryable());
    }
}
