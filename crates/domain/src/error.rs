//! Domain error types.

use common::AggregateId;
use event_store::EventStoreError;
use thiserror::Error;

type BoxedRuleError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The aggregate refused the command. A normal outcome, not a fault:
    /// nothing was written and the version did not move.
    #[error("Business rule violation: {0}")]
    BusinessRuleViolation(BoxedRuleError),

    /// Stored events could not be folded into an aggregate: unknown variant,
    /// foreign stream, gap in versions or an unsupported schema version.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The event store refused or failed the call. Conflicts and outages
    /// keep their identity so callers can decide whether to retry.
    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    pub fn rule_violation(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::BusinessRuleViolation(Box::new(error))
    }

    /// Returns the typed rule error if this is a violation raised by `E`.
    pub fn violation<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::BusinessRuleViolation(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub fn is_business_rule_violation(&self) -> bool {
        matches!(self, Self::BusinessRuleViolation(_))
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::EventStore(e) if e.is_concurrency_conflict())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EventStore(e) if e.is_retryable())
    }
}
