//! Projection error types.

use thiserror::Error;

/// Errors that can occur during projection processing.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Reading the log failed. Nothing past the last good event is applied.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// A stored event could not be decoded into its domain type.
    #[error("Event decode error: {0}")]
    Decode(#[from] domain::DomainError),

    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// A projection refused an event.
    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("Unknown read model: {0}")]
    UnknownReadModel(String),

    #[error("Read model already registered: {0}")]
    DuplicateReadModel(&'static str),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
