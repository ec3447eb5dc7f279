//! Typed API errors and their HTTP rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use executr_api::ErrorBody;
use uuid::Uuid;

/// Every failure an endpoint can surface. Each variant carries enough to
/// render the `{error, context}` envelope at the right status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("job {0} not found")]
    NotFound(Uuid),

    /// A state-conditioned update matched no row: the job exists but is
    /// not in the status the operation requires.
    #[error("job {job_id} is not {expected}")]
    InvalidTransition { job_id: Uuid, expected: &'static str },

    #[error("storage unavailable")]
    Storage(#[from] sqlx::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            ApiError::Validation(msg) => ErrorBody::new(msg.clone()),
            ApiError::NotFound(id) => ErrorBody::with_context(
                "job not found",
                serde_json::json!({ "job_id": id.to_string() }),
            ),
            ApiError::InvalidTransition { job_id, expected } => ErrorBody::with_context(
                self.to_string(),
                serde_json::json!({ "job_id": job_id.to_string(), "expected_status": expected }),
            ),
            // The store error text goes to the log, not the client.
            ApiError::Storage(_) => ErrorBody::new("storage unavailable"),
            ApiError::Internal(_) => ErrorBody::new("internal error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            if let ApiError::Storage(ref e) = self {
                tracing::error!(error = %e, "store error");
            }
        }
        (status, Json(self.body())).into_response()
    }
}
