//! Every SQL statement the coordinator issues.
//!
//! State transitions are single conditional UPDATEs whose WHERE clause
//! encodes the required prior status, so concurrent writers can never
//! regress a terminal row. The claim path uses `FOR UPDATE SKIP LOCKED`
//! so concurrent claimers do not serialize behind each other.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use executr_api::{
    CompleteRequest, ExecutorInfo, FailRequest, JobFilter, JobSubmission, StatsResponse,
};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use tracing::warn;
use uuid::Uuid;

use super::model::{AttemptRow, JobRow};

const JOB_COLUMNS: &str = "id, job_type, binary_url, binary_sha256, arguments, env_variables, \
     priority, max_retries, status, executor_id, retry_count, retry_after, \
     stdout, stderr, exit_code, error_message, \
     created_at, started_at, completed_at, last_heartbeat";

const ATTEMPT_COLUMNS: &str =
    "id, job_id, executor_id, executor_ip, status, started_at, ended_at, error_message";

/// Outcome of a conditional cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The job exists but has already left `pending`.
    NotPending,
    NotFound,
}

/// Outcome of a conditional terminal transition (complete/fail).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The job exists but is not running; the post is silently stale.
    NotRunning,
    NotFound,
}

/// Postgres-backed job store. Cheap to clone; wraps the connection pool.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert one pending job from a validated submission.
    pub async fn insert(&self, submission: &JobSubmission) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO jobs (
                id, job_type, binary_url, binary_sha256, arguments, env_variables,
                priority, max_retries, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', NOW())
            RETURNING {JOB_COLUMNS}
            "#
        );

        sqlx::query_as::<_, JobRow>(&query)
            .bind(Uuid::new_v4())
            .bind(&submission.job_type)
            .bind(&submission.binary_url)
            .bind(&submission.binary_sha256)
            .bind(&submission.arguments)
            .bind(Json(&submission.env_variables))
            .bind(submission.priority)
            .bind(submission.max_retries)
            .fetch_one(&self.pool)
            .await
    }

    /// Newest-first listing with conjunctive filters.
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE ($1::job_status IS NULL OR status = $1)
              AND ($2::text IS NULL OR job_type = $2)
              AND ($3::job_priority IS NULL OR priority = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#
        );

        sqlx::query_as::<_, JobRow>(&query)
            .bind(filter.status)
            .bind(filter.job_type.as_deref())
            .bind(filter.priority)
            .bind(filter.effective_limit())
            .bind(filter.effective_offset())
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Attempts for one job, newest first.
    pub async fn attempts(&self, job_id: Uuid) -> Result<Vec<AttemptRow>, sqlx::Error> {
        let query = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM job_attempts WHERE job_id = $1 ORDER BY started_at DESC"
        );
        sqlx::query_as::<_, AttemptRow>(&query)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
    }

    /// pending → cancelled, stamping `completed_at`.
    pub async fn cancel(&self, id: Uuid) -> Result<CancelOutcome, sqlx::Error> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled', completed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated > 0 {
            return Ok(CancelOutcome::Cancelled);
        }

        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM jobs WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(if exists {
            CancelOutcome::NotPending
        } else {
            CancelOutcome::NotFound
        })
    }

    /// Atomically promote the single best pending job to running.
    ///
    /// Best = lowest priority tier, then oldest `created_at`; ties beyond
    /// that are whatever SKIP LOCKED hands out under contention. Returns
    /// the post-image, or `None` when nothing is pending.
    pub async fn claim(
        &self,
        executor_id: &str,
        executor_ip: Option<&str>,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            r#"
            WITH next_job AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                ORDER BY priority, created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running',
                executor_id = $1,
                started_at = NOW(),
                last_heartbeat = NOW()
            WHERE id IN (SELECT id FROM next_job)
            RETURNING {JOB_COLUMNS}
            "#
        );

        let claimed = sqlx::query_as::<_, JobRow>(&query)
            .bind(executor_id)
            .fetch_optional(&self.pool)
            .await?;

        // The attempt record is best effort: a failure here must not undo
        // the claim itself.
        if let Some(ref job) = claimed {
            if let Err(e) = self.insert_attempt(job.id, executor_id, executor_ip).await {
                warn!(job_id = %job.id, executor_id, error = %e, "failed to record job attempt");
            }
        }

        Ok(claimed)
    }

    async fn insert_attempt(
        &self,
        job_id: Uuid,
        executor_id: &str,
        executor_ip: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO job_attempts (id, job_id, executor_id, executor_ip, status, started_at)
            VALUES ($1, $2, $3, $4, 'running', NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(executor_id)
        .bind(executor_ip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stamp `last_heartbeat = NOW()` iff the row is running and owned by
    /// this executor. A non-matching row is a silent no-op so a worker
    /// that lost its claim to a stale reset cannot disturb the new owner.
    /// Returns false when the job does not exist at all.
    pub async fn heartbeat(&self, id: Uuid, executor_id: &str) -> Result<bool, sqlx::Error> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET last_heartbeat = NOW()
            WHERE id = $1 AND status = 'running' AND executor_id = $2
            "#,
        )
        .bind(id)
        .bind(executor_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated > 0 {
            return Ok(true);
        }

        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM jobs WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
    }

    /// running → completed with captured outputs.
    pub async fn complete(
        &self,
        id: Uuid,
        req: &CompleteRequest,
    ) -> Result<TransitionOutcome, sqlx::Error> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                stdout = $2,
                stderr = $3,
                exit_code = $4,
                completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(&req.stdout)
        .bind(&req.stderr)
        .bind(req.exit_code)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated > 0 {
            self.finish_attempt(id, &req.executor_id, "completed", None)
                .await;
            return Ok(TransitionOutcome::Applied);
        }
        self.transition_miss(id).await
    }

    /// running → failed with diagnostic and whatever was captured.
    pub async fn fail(&self, id: Uuid, req: &FailRequest) -> Result<TransitionOutcome, sqlx::Error> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error_message = $2,
                stdout = $3,
                stderr = $4,
                exit_code = $5,
                completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(&req.error_message)
        .bind(req.stdout.as_deref())
        .bind(req.stderr.as_deref())
        .bind(req.exit_code)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated > 0 {
            self.finish_attempt(id, &req.executor_id, "failed", Some(&req.error_message))
                .await;
            return Ok(TransitionOutcome::Applied);
        }
        self.transition_miss(id).await
    }

    async fn transition_miss(&self, id: Uuid) -> Result<TransitionOutcome, sqlx::Error> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM jobs WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(if exists {
            TransitionOutcome::NotRunning
        } else {
            TransitionOutcome::NotFound
        })
    }

    /// Close the open attempt for a finished stewardship. Best effort.
    async fn finish_attempt(
        &self,
        job_id: Uuid,
        executor_id: &str,
        status: &str,
        error_message: Option<&str>,
    ) {
        let result = sqlx::query(
            r#"
            UPDATE job_attempts
            SET status = $3::attempt_status, ended_at = NOW(), error_message = $4
            WHERE job_id = $1 AND executor_id = $2 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(executor_id)
        .bind(status)
        .bind(error_message)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(job_id = %job_id, executor_id, error = %e, "failed to close job attempt");
        }
    }

    /// Reset running jobs whose heartbeat is older than the timeout back
    /// to pending, clearing executor state. Open attempts are closed as
    /// `timeout`. Returns the ids of the jobs that were reset.
    pub async fn reset_stale(&self, heartbeat_timeout: Duration) -> Result<Vec<Uuid>, sqlx::Error> {
        let reset: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET status = 'pending',
                executor_id = NULL,
                started_at = NULL,
                last_heartbeat = NULL
            WHERE status = 'running'
              AND last_heartbeat < NOW() - make_interval(secs => $1)
            RETURNING id
            "#,
        )
        .bind(heartbeat_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        if !reset.is_empty() {
            let result = sqlx::query(
                r#"
                UPDATE job_attempts
                SET status = 'timeout', ended_at = NOW(), error_message = 'heartbeat timeout'
                WHERE job_id = ANY($1) AND status = 'running'
                "#,
            )
            .bind(&reset)
            .execute(&self.pool)
            .await;

            if let Err(e) = result {
                warn!(error = %e, "failed to close attempts for stale jobs");
            }
        }

        Ok(reset)
    }

    /// Delete terminal jobs whose `completed_at` is older than the
    /// retention window. Attempt rows cascade.
    pub async fn delete_expired(&self, retention: Duration) -> Result<u64, sqlx::Error> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND completed_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(retention.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(deleted)
    }

    /// Promote up to `limit` retryable failures back to pending.
    ///
    /// The backoff gate is `retry_after`: a failure becomes eligible once
    /// it is null or past. Promotion increments `retry_count`, clears the
    /// previous result, and arms the next gate at `60 s * 2^retry_count`
    /// (capped at one hour). The WHERE clause re-checks status and retry
    /// budget so concurrent manual actions cannot double-promote.
    pub async fn promote_retries(&self, limit: i64) -> Result<u64, sqlx::Error> {
        let promoted = sqlx::query(
            r#"
            WITH retryable AS (
                SELECT id
                FROM jobs
                WHERE status = 'failed'
                  AND retry_count < max_retries
                  AND (retry_after IS NULL OR retry_after <= NOW())
                ORDER BY completed_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'pending',
                retry_count = retry_count + 1,
                retry_after = NOW() + make_interval(secs => LEAST(60.0 * power(2, retry_count), 3600.0)::double precision),
                executor_id = NULL,
                started_at = NULL,
                completed_at = NULL,
                last_heartbeat = NULL,
                stdout = NULL,
                stderr = NULL,
                exit_code = NULL,
                error_message = NULL
            WHERE id IN (SELECT id FROM retryable)
              AND status = 'failed'
              AND retry_count < max_retries
            "#,
        )
        .bind(limit)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(promoted)
    }

    /// Aggregate counts for `/admin/stats` and `/metrics`.
    pub async fn stats(&self) -> Result<StatsResponse, sqlx::Error> {
        let by_status: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status::text, COUNT(*) FROM jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let pending_by_priority: Vec<(String, i64)> = sqlx::query_as(
            "SELECT priority::text, COUNT(*) FROM jobs WHERE status = 'pending' GROUP BY priority",
        )
        .fetch_all(&self.pool)
        .await?;

        let active_executors: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT executor_id) FROM jobs WHERE status = 'running' AND executor_id IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StatsResponse {
            jobs_by_status: by_status.into_iter().collect::<HashMap<_, _>>(),
            pending_by_priority: pending_by_priority.into_iter().collect::<HashMap<_, _>>(),
            active_executors,
            timestamp: Utc::now(),
        })
    }

    /// Executors currently holding running jobs, busiest first.
    pub async fn active_executors(&self) -> Result<Vec<ExecutorInfo>, sqlx::Error> {
        let rows: Vec<(String, i64, Option<chrono::DateTime<Utc>>)> = sqlx::query_as(
            r#"
            SELECT executor_id, COUNT(*), MAX(last_heartbeat)
            FROM jobs
            WHERE status = 'running' AND executor_id IS NOT NULL
            GROUP BY executor_id
            ORDER BY COUNT(*) DESC, executor_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(executor_id, running_jobs, last_heartbeat)| ExecutorInfo {
                executor_id,
                running_jobs,
                last_heartbeat,
            })
            .collect())
    }
}
