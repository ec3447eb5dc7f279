//! Database row models and their wire conversions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use executr_api::{AttemptStatus, Job, JobAttempt, JobPriority, JobStatus};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// One row of the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,

    pub job_type: String,
    pub binary_url: String,
    pub binary_sha256: String,
    pub arguments: Vec<String>,
    pub env_variables: Json<HashMap<String, String>>,
    pub priority: JobPriority,
    pub max_retries: i32,

    pub status: JobStatus,
    pub executor_id: Option<String>,
    pub retry_count: i32,
    pub retry_after: Option<DateTime<Utc>>,

    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            job_type: row.job_type,
            binary_url: row.binary_url,
            binary_sha256: row.binary_sha256,
            arguments: row.arguments,
            env_variables: row.env_variables.0,
            priority: row.priority,
            max_retries: row.max_retries,
            status: row.status,
            executor_id: row.executor_id,
            retry_count: row.retry_count,
            retry_after: row.retry_after,
            stdout: row.stdout,
            stderr: row.stderr,
            exit_code: row.exit_code,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            last_heartbeat: row.last_heartbeat,
            attempts: Vec::new(),
        }
    }
}

/// One row of the `job_attempts` table.
#[derive(Debug, Clone, FromRow)]
pub struct AttemptRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub executor_id: String,
    pub executor_ip: Option<String>,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl From<AttemptRow> for JobAttempt {
    fn from(row: AttemptRow) -> Self {
        JobAttempt {
            id: row.id,
            job_id: row.job_id,
            executor_id: row.executor_id,
            executor_ip: row.executor_ip,
            status: row.status,
            started_at: row.started_at,
            ended_at: row.ended_at,
            error_message: row.error_message,
        }
    }
}
