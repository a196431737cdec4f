//! HTTP API over the event-sourced order kernel.
//!
//! Commands go through [`OrderService`]; whatever they commit is handed to
//! the [`ProjectionBuilder`] before the response is sent, so read models are
//! current for the caller that wrote. Structured logging comes from
//! `tracing`, metrics from the Prometheus recorder installed by the binary.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use domain::{OrderService, RetryPolicy};
use event_store::{EventEnvelope, EventStore};
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{
    ApplyStatus, CustomerHistoryProjection, InventoryProjection, OrderSummaryProjection,
    ProjectionBuilder, ProjectionBuilderConfig,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// The store every component shares, whichever backend is configured.
pub type SharedStore = Arc<dyn EventStore>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub store: SharedStore,
    pub orders: OrderService<SharedStore>,
    pub projections: ProjectionBuilder<SharedStore>,

    /// Cancelled on shutdown; running rebuilds stop at the next event.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Feeds committed events to every read model.
    ///
    /// A read model that deferred an event (its predecessor from a
    /// concurrent request has not arrived yet) is caught up from the log
    /// straight away.
    pub async fn project(&self, committed: &[EventEnvelope]) {
        let mut lagging = Vec::new();
        for report in self.projections.apply_all(committed).await {
            for (name, status) in &report.outcomes {
                if *status == ApplyStatus::Deferred && !lagging.contains(name) {
                    lagging.push(*name);
                }
            }
        }

        for name in lagging {
            if let Err(e) = self.projections.incremental_update(name).await {
                tracing::warn!(read_model = name, error = %e, "catch-up after deferral failed");
            }
        }
    }
}

/// Wires the order service and the three read models over `store`, then
/// brings the read models up to date with whatever the log already holds.
pub async fn create_state(
    store: SharedStore,
    config: &Config,
) -> Result<Arc<AppState>, projections::ProjectionError> {
    let orders = OrderService::new(store.clone())
        .with_retry_policy(RetryPolicy::new(config.command_max_attempts));

    let mut builder =
        ProjectionBuilder::new(store.clone()).with_config(ProjectionBuilderConfig {
            checkpoint_interval: config.checkpoint_interval.max(1),
        });
    builder.register(OrderSummaryProjection).await?;
    builder
        .register(InventoryProjection::new().with_seed(config.inventory_seed.iter().cloned()))
        .await?;
    builder.register(CustomerHistoryProjection).await?;

    let stats = builder.incremental_update_all().await?;
    for (name, stats) in &stats {
        tracing::info!(
            read_model = name,
            applied = stats.applied,
            failed = stats.failed,
            "read model caught up"
        );
    }

    Ok(Arc::new(AppState {
        store,
        orders,
        projections: builder,
        shutdown: CancellationToken::new(),
    }))
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/items", post(routes::orders::add_item))
        .route("/orders/{id}/items/{sku}", delete(routes::orders::remove_item))
        .route("/orders/{id}/payment", post(routes::orders::pay))
        .route("/orders/{id}/ship", post(routes::orders::ship))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route(
            "/streams/{id}/events",
            get(routes::streams::load).post(routes::streams::append),
        )
        .route("/projections", get(routes::projections::list))
        .route(
            "/projections/{name}/rebuild",
            post(routes::projections::rebuild),
        )
        .route("/read-models/{name}/{key}", get(routes::projections::query))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
