//! Job submission payloads and the list filter.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::job::{JobPriority, JobStatus};

/// A new job as posted to `POST /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    #[serde(rename = "type")]
    pub job_type: String,
    pub binary_url: String,
    pub binary_sha256: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub env_variables: HashMap<String, String>,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub max_retries: i32,
}

/// Rejection reasons for a submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("job type must not be empty")]
    EmptyType,
    #[error("job type must not contain whitespace")]
    WhitespaceInType,
    #[error("binary_url must not be empty")]
    EmptyBinaryUrl,
    #[error("max_retries must not be negative")]
    NegativeMaxRetries,
}

impl JobSubmission {
    /// Check the descriptor against the submission rules. Priority is
    /// already constrained by the enum at deserialization time.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.job_type.is_empty() {
            return Err(ValidationError::EmptyType);
        }
        if self.job_type.chars().any(char::is_whitespace) {
            return Err(ValidationError::WhitespaceInType);
        }
        if self.binary_url.is_empty() {
            return Err(ValidationError::EmptyBinaryUrl);
        }
        if self.max_retries < 0 {
            return Err(ValidationError::NegativeMaxRetries);
        }
        Ok(())
    }
}

/// Conjunctive filters for `GET /jobs`. Absent fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<JobPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

/// Hard cap on a single list page.
pub const MAX_LIST_LIMIT: i64 = 1000;
/// Page size when the caller does not ask for one.
pub const DEFAULT_LIST_LIMIT: i64 = 100;

impl JobFilter {
    /// The effective page size: default 100, clamped to [1, 1000].
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }

    /// The effective offset: non-negative.
    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
