//! The worker runtime.
//!
//! ```text
//! Worker
//!     │
//!     ├─► claim loop (one permit per in-flight job, max_jobs total)
//!     │       └─► JobExecutor per claimed job
//!     │               ├─► heartbeat pump (own task, cancelled on exit)
//!     │               ├─► BinaryCache.get_binary
//!     │               ├─► runner::run in <work_dir>/<job_id>/
//!     │               └─► complete / fail post
//!     └─► graceful drain: stop claiming, let in-flight jobs finish
//! ```
//!
//! A coordinator that stays unreachable past `network_timeout` quiesces
//! the claim loop; in-flight jobs still run to completion and the
//! process exits once they drain.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use executr_api::{CompleteRequest, FailRequest, Job};
use executr_client::ExecutrClient;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::BinaryCache;
use crate::config::Config;
use crate::runner::{self, ExecutionRequest, ExecutionResult};

/// Error message posted for a run that exited non-zero.
const NONZERO_EXIT_MESSAGE: &str = "Job failed with non-zero exit code";

/// Build a globally unique executor id from the configured name.
pub fn derive_executor_id(name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", name, &suffix[..8])
}

/// A booted worker, ready to run its claim loop.
pub struct Worker {
    config: Config,
    executor_id: String,
    executor: JobExecutor,
}

impl Worker {
    /// Boot: derive an identity, scrub orphaned work directories, open
    /// the binary cache, and construct the coordinator client.
    pub fn new(config: Config) -> Result<Self> {
        let executor_id = derive_executor_id(&config.name);

        scrub_work_dir(&config.work_dir)
            .with_context(|| format!("failed to prepare work dir {}", config.work_dir.display()))?;

        let cache = BinaryCache::new(&config.cache_dir, config.max_cache_bytes)
            .with_context(|| format!("failed to open cache dir {}", config.cache_dir.display()))?;

        let client = ExecutrClient::new(config.server_url.clone())
            .context("invalid coordinator url")?;

        info!(
            executor_id = %executor_id,
            server_url = %config.server_url,
            max_jobs = config.max_jobs,
            "worker booted"
        );

        let executor = JobExecutor {
            client,
            cache: Arc::new(cache),
            executor_id: executor_id.clone(),
            work_root: config.work_dir.clone(),
            heartbeat_interval: config.heartbeat_interval,
        };

        Ok(Self {
            config,
            executor_id,
            executor,
        })
    }

    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    /// Run the claim loop until shutdown or network quiesce, then drain
    /// in-flight jobs.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_jobs));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut network_failure_since: Option<Instant> = None;

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "claim loop starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, no further claims");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            // Reap finished executors so the set does not grow unbounded.
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "job executor panicked");
                }
            }

            // All slots busy: drop this tick, do not queue it.
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("all job slots busy, skipping poll");
                    continue;
                }
            };

            match self.executor.client.claim(&self.executor_id, None).await {
                Ok(Some(job)) => {
                    network_failure_since = None;
                    info!(job_id = %job.id, job_type = %job.job_type, "claimed job");
                    let executor = self.executor.clone();
                    in_flight.spawn(async move {
                        executor.execute(job, permit).await;
                    });
                }
                Ok(None) => {
                    network_failure_since = None;
                    drop(permit);
                }
                Err(e) => {
                    drop(permit);
                    let since = *network_failure_since.get_or_insert_with(Instant::now);
                    warn!(error = %e, "claim failed");
                    if since.elapsed() >= self.config.network_timeout {
                        error!(
                            timeout_secs = self.config.network_timeout.as_secs(),
                            "coordinator unreachable past network timeout, quiescing"
                        );
                        break;
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            info!(count = in_flight.len(), "waiting for in-flight jobs to finish");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "job executor panicked");
            }
        }

        info!(executor_id = %self.executor_id, "worker stopped");
        Ok(())
    }
}

/// Everything one job execution needs; cheap to clone per claim.
#[derive(Clone)]
struct JobExecutor {
    client: ExecutrClient,
    cache: Arc<BinaryCache>,
    executor_id: String,
    work_root: PathBuf,
    heartbeat_interval: Duration,
}

impl JobExecutor {
    /// Run one claimed job end to end. Holds its semaphore permit for
    /// the whole stewardship.
    async fn execute(self, job: Job, _permit: OwnedSemaphorePermit) {
        let work_dir = self.work_root.join(job.id.to_string());

        if let Err(e) = tokio::fs::create_dir_all(&work_dir).await {
            self.post_prep_failure(&job, format!("failed to create working directory: {}", e))
                .await;
            return;
        }

        let heartbeat_cancel = CancellationToken::new();
        let heartbeat_task = self.spawn_heartbeat(job.id, heartbeat_cancel.clone());

        match self.prepare_and_run(&job, &work_dir).await {
            Ok(result) => self.post_result(&job, result).await,
            Err(message) => self.post_prep_failure(&job, message).await,
        }

        heartbeat_cancel.cancel();
        let _ = heartbeat_task.await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            warn!(job_id = %job.id, error = %e, "failed to clean up working directory");
        }
    }

    /// Fetch the verified binary and execute it.
    async fn prepare_and_run(&self, job: &Job, work_dir: &Path) -> Result<ExecutionResult, String> {
        let binary_path = self
            .cache
            .get_binary(&job.binary_url, &job.binary_sha256)
            .await
            .map_err(|e| e.to_string())?;

        let request = ExecutionRequest {
            binary_path,
            arguments: job.arguments.clone(),
            env: job.env_variables.clone(),
            work_dir: work_dir.to_path_buf(),
        };

        // Graceful shutdown lets running jobs finish, so this token is
        // armed per job, not tied to the worker's shutdown signal.
        Ok(runner::run(request, CancellationToken::new()).await)
    }

    /// Post the terminal status. Failures are logged at WARN and not
    /// retried here; the coordinator's stale recovery will reset the job
    /// if no terminal post ever lands.
    async fn post_result(&self, job: &Job, result: ExecutionResult) {
        if result.succeeded() {
            let post = self
                .client
                .complete(
                    job.id,
                    &CompleteRequest {
                        executor_id: self.executor_id.clone(),
                        stdout: result.stdout,
                        stderr: result.stderr,
                        exit_code: result.exit_code,
                    },
                )
                .await;
            match post {
                Ok(()) => info!(job_id = %job.id, "job completed"),
                Err(e) => warn!(job_id = %job.id, error = %e, "failed to post completion"),
            }
        } else {
            let exit_code = result.exit_code;
            let post = self
                .client
                .fail(
                    job.id,
                    &FailRequest {
                        executor_id: self.executor_id.clone(),
                        error_message: NONZERO_EXIT_MESSAGE.to_string(),
                        stdout: Some(result.stdout),
                        stderr: Some(result.stderr),
                        exit_code: Some(result.exit_code),
                    },
                )
                .await;
            match post {
                Ok(()) => info!(job_id = %job.id, exit_code, "job failed"),
                Err(e) => warn!(job_id = %job.id, error = %e, "failed to post failure"),
            }
        }
    }

    /// Report a job that never reached execution (directory or binary
    /// preparation failed).
    async fn post_prep_failure(&self, job: &Job, message: String) {
        warn!(job_id = %job.id, error = %message, "job preparation failed");
        let post = self
            .client
            .fail(
                job.id,
                &FailRequest {
                    executor_id: self.executor_id.clone(),
                    error_message: message,
                    stdout: None,
                    stderr: None,
                    exit_code: None,
                },
            )
            .await;
        if let Err(e) = post {
            warn!(job_id = %job.id, error = %e, "failed to post preparation failure");
        }
    }

    /// Periodic liveness stamps, independent of the runner's blocking
    /// wait on the child.
    fn spawn_heartbeat(
        &self,
        job_id: Uuid,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let client = self.client.clone();
        let executor_id = self.executor_id.clone();
        let period = self.heartbeat_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // the claim already stamped now()

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = client.heartbeat(job_id, &executor_id).await {
                            warn!(job_id = %job_id, error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        })
    }
}

/// Remove everything under the work directory: job dirs orphaned by a
/// previous incarnation must not survive a restart. Best effort.
pub fn scrub_work_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;

    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "failed to read work dir entry during scrub");
                continue;
            }
        };

        let path = entry.path();
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match removed {
            Ok(()) => info!(path = %path.display(), "removed orphaned work entry"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove orphaned work entry"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_id_has_name_and_hex_suffix() {
        let id = derive_executor_id("executor-0");
        let suffix = id.strip_prefix("executor-0-").expect("name prefix");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn executor_ids_are_unique_per_boot() {
        let a = derive_executor_id("w");
        let b = derive_executor_id("w");
        assert_ne!(a, b);
    }

    #[test]
    fn scrub_removes_files_and_directories() {
        let root = tempfile::tempdir().unwrap();
        let orphan_dir = root.path().join("11111111-2222-3333-4444-555555555555");
        std::fs::create_dir_all(orphan_dir.join("nested")).unwrap();
        std::fs::write(orphan_dir.join("nested/out.txt"), b"data").unwrap();
        std::fs::write(root.path().join("stray.log"), b"stray").unwrap();

        scrub_work_dir(root.path()).unwrap();

        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn scrub_creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("work");
        scrub_work_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }
}
