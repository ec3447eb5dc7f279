//! Job and attempt snapshots as they appear on the wire.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a job.
///
/// Transitions form a DAG: pending → {running, cancelled};
/// running → {completed, failed, pending (stale reset)};
/// failed → pending (retry promotion while retries remain);
/// completed and cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "job_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether the job can never leave this status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Scheduling tier. Claims drain foreground before background before
/// best_effort; within a tier the oldest `created_at` wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "job_priority", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Foreground,
    #[default]
    Background,
    BestEffort,
}

impl JobPriority {
    /// Integer rank for DB ordering; lower claims first.
    pub fn rank(&self) -> i16 {
        match self {
            JobPriority::Foreground => 1,
            JobPriority::Background => 2,
            JobPriority::BestEffort => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Foreground => "foreground",
            JobPriority::Background => "background",
            JobPriority::BestEffort => "best_effort",
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "foreground" => Ok(JobPriority::Foreground),
            "background" => Ok(JobPriority::Background),
            "best_effort" => Ok(JobPriority::BestEffort),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Terminal disposition of one worker's stewardship of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "attempt_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Timeout,
}

/// A snapshot of one job as returned by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,

    // Immutable descriptor
    #[serde(rename = "type")]
    pub job_type: String,
    pub binary_url: String,
    pub binary_sha256: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub env_variables: HashMap<String, String>,
    pub priority: JobPriority,
    pub max_retries: i32,

    // Mutable state
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<String>,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,

    // Result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    // Timestamps (UTC)
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Attempt history, newest first. Only populated by `GET /jobs/{id}`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<JobAttempt>,
}

/// One stewardship record; a job accumulates these across retries and
/// stale resets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttempt {
    pub id: Uuid,
    pub job_id: Uuid,
    pub executor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_ip: Option<String>,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
