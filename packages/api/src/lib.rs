//! Shared wire types for the Executr job-execution system.
//!
//! Everything that crosses the coordinator's HTTP boundary lives here: the
//! job and attempt snapshots, submission payloads, the request bodies for
//! claim/heartbeat/complete/fail, the bulk and admin responses, and the
//! `{error, context}` error envelope.
//!
//! The `postgres` feature adds `sqlx` derives to the status and priority
//! enums so the coordinator can bind them directly; the worker and client
//! build without it.

pub mod config;
pub mod error;
pub mod job;
pub mod messages;
pub mod submission;

pub use error::ErrorBody;
pub use job::{AttemptStatus, Job, JobAttempt, JobPriority, JobStatus};
pub use messages::{
    BulkCancelRequest, BulkCancelResponse, BulkSubmitResponse, BulkSubmitResult, ClaimRequest,
    CompleteRequest, ExecutorInfo, FailRequest, HealthResponse, HeartbeatRequest, StatsResponse,
};
pub use submission::{JobFilter, JobSubmission, ValidationError};
