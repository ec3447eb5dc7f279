use axum::extract::Extension;
use axum::http::StatusCode;
use axum::Json;
use executr_api::HealthResponse;

use crate::server::app::AppState;

/// `GET /api/v1/health`
///
/// Probes the database with a bounded `SELECT 1`. 200 when the store
/// answers, 503 otherwise.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let db_ok = matches!(
        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            sqlx::query("SELECT 1").execute(state.store.pool()),
        )
        .await,
        Ok(Ok(_))
    );

    let (status_code, status, database) = if db_ok {
        (StatusCode::OK, "healthy", "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", "error")
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            database: database.to_string(),
        }),
    )
}
