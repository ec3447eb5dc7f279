//! The job API: submit, list, get, cancel, claim, heartbeat, complete,
//! fail, and the bulk variants.

use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use executr_api::{
    BulkCancelRequest, BulkCancelResponse, BulkSubmitResponse, BulkSubmitResult, ClaimRequest,
    CompleteRequest, FailRequest, HeartbeatRequest, Job, JobFilter, JobSubmission,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::jobs::{CancelOutcome, TransitionOutcome};
use crate::server::app::AppState;
use crate::server::middleware::ClientIp;

/// Maximum items per bulk submission.
pub const MAX_BULK_JOBS: usize = 100;

/// `POST /api/v1/jobs`
pub async fn submit_handler(
    Extension(state): Extension<AppState>,
    Json(submission): Json<JobSubmission>,
) -> Result<Response, ApiError> {
    submission
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let row = state.store.insert(&submission).await?;
    info!(job_id = %row.id, job_type = %row.job_type, priority = %row.priority, "job submitted");

    Ok((StatusCode::CREATED, Json(Job::from(row))).into_response())
}

/// `GET /api/v1/jobs`
pub async fn list_handler(
    Extension(state): Extension<AppState>,
    Query(filter): Query<JobFilter>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let rows = state.store.list(&filter).await?;
    Ok(Json(rows.into_iter().map(Job::from).collect()))
}

/// `GET /api/v1/jobs/{id}` — snapshot plus attempt history, newest first.
pub async fn get_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    let row = state.store.get(id).await?.ok_or(ApiError::NotFound(id))?;
    let attempts = state.store.attempts(id).await?;

    let mut job = Job::from(row);
    job.attempts = attempts.into_iter().map(Into::into).collect();
    Ok(Json(job))
}

/// `DELETE /api/v1/jobs/{id}` — cancel a pending job.
pub async fn cancel_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    match state.store.cancel(id).await? {
        CancelOutcome::Cancelled => {
            info!(job_id = %id, "job cancelled");
            Ok(StatusCode::NO_CONTENT)
        }
        CancelOutcome::NotPending => Err(ApiError::InvalidTransition {
            job_id: id,
            expected: "pending",
        }),
        CancelOutcome::NotFound => Err(ApiError::NotFound(id)),
    }
}

/// `POST /api/v1/jobs/claim` — atomically promote one pending job to
/// running. 204 when the queue has nothing claimable.
pub async fn claim_handler(
    Extension(state): Extension<AppState>,
    client_ip: Option<Extension<ClientIp>>,
    Json(req): Json<ClaimRequest>,
) -> Result<Response, ApiError> {
    if req.executor_id.is_empty() {
        return Err(ApiError::Validation("executor_id must not be empty".into()));
    }

    let peer_ip = client_ip.map(|Extension(ClientIp(ip))| ip.to_string());
    let executor_ip = req.executor_ip.as_deref().or(peer_ip.as_deref());

    match state.store.claim(&req.executor_id, executor_ip).await? {
        Some(row) => {
            info!(job_id = %row.id, executor_id = %req.executor_id, "job claimed");
            Ok((StatusCode::OK, Json(Job::from(row))).into_response())
        }
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// `PUT /api/v1/jobs/{id}/heartbeat` — owner-checked liveness stamp.
/// A heartbeat from a non-owner (or for a job no longer running) is a
/// silent no-op; only an unknown job id is an error.
pub async fn heartbeat_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<StatusCode, ApiError> {
    if req.executor_id.is_empty() {
        return Err(ApiError::Validation("executor_id must not be empty".into()));
    }

    let exists = state.store.heartbeat(id, &req.executor_id).await?;
    if !exists {
        return Err(ApiError::NotFound(id));
    }
    debug!(job_id = %id, executor_id = %req.executor_id, "heartbeat");
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /api/v1/jobs/{id}/complete`
pub async fn complete_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteRequest>,
) -> Result<StatusCode, ApiError> {
    match state.store.complete(id, &req).await? {
        TransitionOutcome::Applied => {
            info!(job_id = %id, executor_id = %req.executor_id, exit_code = req.exit_code, "job completed");
            Ok(StatusCode::NO_CONTENT)
        }
        TransitionOutcome::NotRunning => Err(ApiError::InvalidTransition {
            job_id: id,
            expected: "running",
        }),
        TransitionOutcome::NotFound => Err(ApiError::NotFound(id)),
    }
}

/// `PUT /api/v1/jobs/{id}/fail`
pub async fn fail_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FailRequest>,
) -> Result<StatusCode, ApiError> {
    match state.store.fail(id, &req).await? {
        TransitionOutcome::Applied => {
            info!(
                job_id = %id,
                executor_id = %req.executor_id,
                error = %req.error_message,
                "job failed"
            );
            Ok(StatusCode::NO_CONTENT)
        }
        TransitionOutcome::NotRunning => Err(ApiError::InvalidTransition {
            job_id: id,
            expected: "running",
        }),
        TransitionOutcome::NotFound => Err(ApiError::NotFound(id)),
    }
}

/// `POST /api/v1/jobs/bulk` — up to 100 submissions; 201 when every item
/// landed, 206 on a partial batch.
pub async fn bulk_submit_handler(
    Extension(state): Extension<AppState>,
    Json(submissions): Json<Vec<JobSubmission>>,
) -> Result<Response, ApiError> {
    if submissions.is_empty() {
        return Err(ApiError::Validation("bulk submission must not be empty".into()));
    }
    if submissions.len() > MAX_BULK_JOBS {
        return Err(ApiError::Validation(format!(
            "bulk submission exceeds {} jobs",
            MAX_BULK_JOBS
        )));
    }

    let mut results = Vec::with_capacity(submissions.len());
    let mut successful = 0usize;

    for (index, submission) in submissions.iter().enumerate() {
        if let Err(e) = submission.validate() {
            results.push(BulkSubmitResult {
                index,
                id: None,
                error: Some(e.to_string()),
            });
            continue;
        }

        match state.store.insert(submission).await {
            Ok(row) => {
                successful += 1;
                results.push(BulkSubmitResult {
                    index,
                    id: Some(row.id),
                    error: None,
                });
            }
            Err(e) => results.push(BulkSubmitResult {
                index,
                id: None,
                error: Some(e.to_string()),
            }),
        }
    }

    let failed = results.len() - successful;
    let status = if failed == 0 {
        StatusCode::CREATED
    } else {
        StatusCode::PARTIAL_CONTENT
    };
    info!(total = results.len(), successful, failed, "bulk submission");

    let body = BulkSubmitResponse {
        total: results.len(),
        successful,
        failed,
        results,
    };
    Ok((status, Json(body)).into_response())
}

/// `POST /api/v1/jobs/bulk/cancel` — a non-pending or unknown job counts
/// as failed, never as a request error.
pub async fn bulk_cancel_handler(
    Extension(state): Extension<AppState>,
    Json(req): Json<BulkCancelRequest>,
) -> Result<Json<BulkCancelResponse>, ApiError> {
    let mut cancelled = 0usize;
    let mut failed = 0usize;

    for id in &req.job_ids {
        match state.store.cancel(*id).await? {
            CancelOutcome::Cancelled => cancelled += 1,
            CancelOutcome::NotPending | CancelOutcome::NotFound => failed += 1,
        }
    }

    info!(cancelled, failed, total = req.job_ids.len(), "bulk cancel");
    Ok(Json(BulkCancelResponse {
        cancelled,
        failed,
        total: req.job_ids.len(),
    }))
}
