//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, OrderError};
use event_store::EventStoreError;
use projections::ProjectionError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Command or replay failure from the domain layer.
    Domain(DomainError),
    /// Raw event store failure.
    Store(EventStoreError),
    /// Read-model failure.
    Projection(ProjectionError),
}

impl ApiError {
    fn status_and_message(self) -> (StatusCode, String) {
        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => (domain_status(&err), err.to_string()),
            ApiError::Store(err) => (store_status(&err), err.to_string()),
            ApiError::Projection(err) => (projection_status(&err), err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        metrics::counter!("api_errors_total", "status" => status.as_u16().to_string()).increment(1);
        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        // A command against an order that was never created.
        DomainError::BusinessRuleViolation(_)
            if err.violation::<OrderError>() == Some(&OrderError::NotCreated) =>
        {
            StatusCode::NOT_FOUND
        }
        DomainError::BusinessRuleViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::AggregateNotFound { .. } => StatusCode::NOT_FOUND,
        DomainError::EventStore(e) => store_status(e),
        DomainError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn store_status(err: &EventStoreError) -> StatusCode {
    match err {
        EventStoreError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
        EventStoreError::Validation(_) => StatusCode::BAD_REQUEST,
        EventStoreError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EventStoreError::Migration(_) | EventStoreError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn projection_status(err: &ProjectionError) -> StatusCode {
    match err {
        ProjectionError::UnknownReadModel(_) => StatusCode::NOT_FOUND,
        ProjectionError::EventStore(e) => store_status(e),
        ProjectionError::Decode(e) => domain_status(e),
        ProjectionError::Deserialization(_)
        | ProjectionError::Projection(_)
        | ProjectionError::Checkpoint(_)
        | ProjectionError::DuplicateReadModel(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<EventStoreError> for ApiError {
    fn from(err: EventStoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<ProjectionError> for ApiError {
    fn from(err: ProjectionError) -> Self {
        ApiError::Projection(err)
    }
}
