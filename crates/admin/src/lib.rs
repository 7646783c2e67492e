//! Operator-facing HTTP API: project provisioning, counter inspection and
//! resets, health, stats and Prometheus metrics.

pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use mixgate_common::AppConfig;
use mixgate_projects::ProjectRegistry;
use mixgate_rate_limit::CounterStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub use state::{AppState, GatewayMetrics, SharedState as SharedStateType};

/// Build the Axum router with all admin API routes and middleware.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route("/api/metrics", get(routes::metrics::get_metrics))
        .route("/api/stats", get(routes::stats::get_stats))
        .route("/api/config", get(routes::config::get_config))
        // Projects
        .route(
            "/api/orgs/{org}/projects",
            get(routes::projects::list_projects).post(routes::projects::create_project),
        )
        .route(
            "/api/orgs/{org}/projects/{slug}",
            get(routes::projects::get_project)
                .patch(routes::projects::update_project)
                .delete(routes::projects::delete_project),
        )
        // Counters
        .route("/api/counters", get(routes::counters::list_counters))
        .route("/api/counters/reset", post(routes::counters::reset_all))
        .route(
            "/api/counters/{project_id}/reset",
            post(routes::counters::reset_counter),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Serve the admin API on `listen_addr` until the process shuts down.
pub async fn run_admin_server(state: SharedState, listen_addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listen_addr, "admin API server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Convenience constructor for the shared admin state.
pub fn new_shared_state(
    config: AppConfig,
    registry: Arc<ProjectRegistry>,
    counters: Arc<dyn CounterStore>,
) -> SharedState {
    Arc::new(AppState::new(config, registry, counters))
}
