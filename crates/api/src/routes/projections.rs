//! Read-model queries and projection maintenance.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use projections::RebuildOutcome;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct ReadModelStatus {
    pub name: &'static str,
    pub events_applied: u64,
    pub aggregates: usize,
    pub checkpointed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct RebuildResponse {
    pub read_model: String,
    pub outcome: &'static str,
    pub applied: u64,
    pub skipped: u64,
    pub deferred: u64,
    pub failed: u64,
}

/// GET /projections: every read model and its checkpoint.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ReadModelStatus>>, ApiError> {
    let mut statuses = Vec::new();
    for name in state.projections.read_model_names() {
        let checkpoint = state.projections.checkpoint(name).await?;
        statuses.push(ReadModelStatus {
            name,
            events_applied: checkpoint.as_ref().map_or(0, |c| c.events_applied),
            aggregates: checkpoint.as_ref().map_or(0, |c| c.positions.len()),
            checkpointed_at: checkpoint.map(|c| c.updated_at),
        });
    }
    Ok(Json(statuses))
}

/// POST /projections/{name}/rebuild: discard the read model and refold the
/// whole log. Stops early, with progress kept, if the server shuts down.
#[tracing::instrument(skip(state))]
pub async fn rebuild(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<RebuildResponse>, ApiError> {
    let outcome = state.projections.rebuild(&name, &state.shutdown).await?;
    let stats = outcome.stats();

    Ok(Json(RebuildResponse {
        read_model: name,
        outcome: match outcome {
            RebuildOutcome::Completed(_) => "completed",
            RebuildOutcome::Cancelled(_) => "cancelled",
        },
        applied: stats.applied,
        skipped: stats.skipped,
        deferred: stats.deferred,
        failed: stats.failed,
    }))
}

/// GET /read-models/{name}/{key}
#[tracing::instrument(skip(state))]
pub async fn query(
    State(state): State<Arc<AppState>>,
    Path((name, key)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .projections
        .query(&name, &key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{key} not found in {name}")))
}
