//! Admin surface: queue statistics and the live executor roster.

use axum::extract::Extension;
use axum::Json;
use executr_api::{ExecutorInfo, StatsResponse};

use crate::error::ApiError;
use crate::server::app::AppState;

/// `GET /api/v1/admin/stats`
pub async fn admin_stats_handler(
    Extension(state): Extension<AppState>,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.store.stats().await?;
    Ok(Json(stats))
}

/// `GET /api/v1/admin/executors`
pub async fn admin_executors_handler(
    Extension(state): Extension<AppState>,
) -> Result<Json<Vec<ExecutorInfo>>, ApiError> {
    let executors = state.store.active_executors().await?;
    Ok(Json(executors))
}
