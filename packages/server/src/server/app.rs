//! Application setup and router construction.

use std::time::Duration;

use axum::extract::Extension;
use axum::routing::{get, post, put};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::jobs::JobStore;
use crate::server::middleware::extract_client_ip;
use crate::server::routes::{
    admin_executors_handler, admin_stats_handler, bulk_cancel_handler, bulk_submit_handler,
    cancel_handler, claim_handler, complete_handler, fail_handler, get_handler, health_handler,
    heartbeat_handler, list_handler, metrics_handler, submit_handler,
};

/// Shared per-request state.
#[derive(Clone)]
pub struct AppState {
    pub store: JobStore,
    pub heartbeat_timeout: Duration,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        Self {
            store: JobStore::new(pool),
            heartbeat_timeout: config.heartbeat_timeout,
        }
    }
}

/// Build the full coordinator router.
pub fn build_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/jobs", post(submit_handler).get(list_handler))
        .route("/jobs/bulk", post(bulk_submit_handler))
        .route("/jobs/bulk/cancel", post(bulk_cancel_handler))
        .route("/jobs/claim", post(claim_handler))
        .route("/jobs/:id", get(get_handler).delete(cancel_handler))
        .route("/jobs/:id/heartbeat", put(heartbeat_handler))
        .route("/jobs/:id/complete", put(complete_handler))
        .route("/jobs/:id/fail", put(fail_handler))
        .route("/admin/stats", get(admin_stats_handler))
        .route("/admin/executors", get(admin_executors_handler));

    Router::new()
        .nest("/api/v1", api)
        .layer(axum::middleware::from_fn(extract_client_ip))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
