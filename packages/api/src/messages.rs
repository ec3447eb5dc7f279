//! Request and response bodies for the claim/report and admin endpoints.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /jobs/claim`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub executor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_ip: Option<String>,
}

/// Body of `PUT /jobs/{id}/heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub executor_id: String,
}

/// Body of `PUT /jobs/{id}/complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub executor_id: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub exit_code: i32,
}

/// Body of `PUT /jobs/{id}/fail`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailRequest {
    pub executor_id: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// One row of the `POST /jobs/bulk` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkSubmitResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of `POST /jobs/bulk`. 201 when every item succeeded, 206
/// otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkSubmitResponse {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BulkSubmitResult>,
}

/// Body of `POST /jobs/bulk/cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCancelRequest {
    pub job_ids: Vec<Uuid>,
}

/// Response of `POST /jobs/bulk/cancel`. A job that was not pending (or
/// did not exist) counts as failed, not as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCancelResponse {
    pub cancelled: usize,
    pub failed: usize,
    pub total: usize,
}

/// Response of `GET /admin/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub jobs_by_status: HashMap<String, i64>,
    pub pending_by_priority: HashMap<String, i64>,
    pub active_executors: i64,
    pub timestamp: DateTime<Utc>,
}

/// One entry of `GET /admin/executors`: an executor currently holding at
/// least one running job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub executor_id: String,
    pub running_jobs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}
