//! Request handlers, one module per resource.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod projections;
pub mod streams;

use common::AggregateId;

use crate::error::ApiError;

pub(crate) fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    id.parse::<AggregateId>()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
