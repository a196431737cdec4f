//! Raw event stream access: `load`, `loadByTimestamp` and `append`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::OrderEvent;
use event_store::{EventEnvelope, EventStore, Version};
use futures_util::TryStreamExt;
use serde::Deserialize;

use super::parse_aggregate_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct LoadParams {
    pub after_version: Option<i64>,
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct AppendRequest {
    pub expected_version: i64,
    /// Tagged order events, e.g. `{"type": "ItemAdded", "data": {...}}`.
    pub events: Vec<serde_json::Value>,
}

/// GET /streams/{id}/events: the stream after `after_version`, or its
/// prefix up to `as_of`. An unknown stream is empty.
#[tracing::instrument(skip(state))]
pub async fn load(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<LoadParams>,
) -> Result<Json<Vec<EventEnvelope>>, ApiError> {
    let aggregate_id = parse_aggregate_id(&id)?;

    let stream = match (params.after_version, params.as_of) {
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "after_version and as_of cannot be combined".to_string(),
            ));
        }
        (Some(after), None) if after < 0 => {
            return Err(ApiError::BadRequest(format!(
                "after_version must not be negative, got {after}"
            )));
        }
        (Some(after), None) => state.store.load(aggregate_id, Version::new(after)).await?,
        (None, Some(as_of)) => state.store.load_by_timestamp(aggregate_id, as_of).await?,
        (None, None) => state.store.load(aggregate_id, Version::initial()).await?,
    };

    let events: Vec<EventEnvelope> = stream.try_collect().await?;
    Ok(Json(events))
}

/// POST /streams/{id}/events: append already-decided order events.
///
/// Every payload must decode into an order event, and a creation event must
/// name the stream it is appended to. The batch must also be a legal
/// continuation of the order at `expected_version`. Responds with the
/// committed envelopes.
#[tracing::instrument(skip(state, req), fields(expected_version = req.expected_version))]
pub async fn append(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AppendRequest>,
) -> Result<(StatusCode, Json<Vec<EventEnvelope>>), ApiError> {
    let aggregate_id = parse_aggregate_id(&id)?;
    if req.expected_version < 0 {
        return Err(ApiError::BadRequest(format!(
            "expected_version must not be negative, got {}",
            req.expected_version
        )));
    }

    if req.events.is_empty() {
        return Err(ApiError::BadRequest("cannot append an empty batch".to_string()));
    }

    let events = decode_order_events(aggregate_id, req.events)?;
    let result = state
        .orders
        .append_events(aggregate_id, Version::new(req.expected_version), events)
        .await?;

    state.project(&result.committed).await;
    Ok((StatusCode::CREATED, Json(result.committed)))
}

fn decode_order_events(
    aggregate_id: AggregateId,
    payloads: Vec<serde_json::Value>,
) -> Result<Vec<OrderEvent>, ApiError> {
    payloads
        .into_iter()
        .enumerate()
        .map(|(i, payload)| {
            let event: OrderEvent = serde_json::from_value(payload).map_err(|e| {
                ApiError::BadRequest(format!("event {i} is not an order event: {e}"))
            })?;
            if let OrderEvent::OrderCreated(data) = &event
                && data.order_id != aggregate_id
            {
                return Err(ApiError::BadRequest(format!(
                    "event {i} creates order {}, not {aggregate_id}",
                    data.order_id
                )));
            }
            Ok(event)
        })
        .collect()
}
