//! Background maintenance loops.
//!
//! Three single-purpose loops run alongside the HTTP server:
//!
//! ```text
//! stale recovery   (5 s)   running + silent heartbeat  → pending
//! retention        (1 h)   terminal + past retention   → deleted
//! retry promotion  (30 s)  failed + retries remaining  → pending
//! ```
//!
//! Each loop runs its pass to completion, logs per-pass failures, and
//! sleeps until the next tick; a store error never crashes the process.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::store::JobStore;

/// Tick interval of the stale-recovery loop.
pub const STALE_RECOVERY_INTERVAL: Duration = Duration::from_secs(5);
/// Tick interval of the retry-promotion loop.
pub const RETRY_PROMOTION_INTERVAL: Duration = Duration::from_secs(30);
/// Failed jobs promoted per retry tick.
pub const RETRY_BATCH_SIZE: i64 = 10;

/// Reset running jobs whose heartbeat went silent for longer than
/// `heartbeat_timeout`.
pub async fn stale_recovery_loop(
    store: JobStore,
    heartbeat_timeout: Duration,
    shutdown: CancellationToken,
) {
    info!(
        timeout_secs = heartbeat_timeout.as_secs(),
        "stale recovery loop starting"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(STALE_RECOVERY_INTERVAL) => {}
        }

        match store.reset_stale(heartbeat_timeout).await {
            Ok(reset) if !reset.is_empty() => {
                for job_id in &reset {
                    info!(job_id = %job_id, "reset stale job to pending");
                }
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "stale recovery pass failed"),
        }
    }

    info!("stale recovery loop stopped");
}

/// Delete terminal jobs older than the retention window.
pub async fn retention_loop(
    store: JobStore,
    cleanup_interval: Duration,
    retention: Duration,
    shutdown: CancellationToken,
) {
    info!(
        interval_secs = cleanup_interval.as_secs(),
        retention_secs = retention.as_secs(),
        "retention cleanup loop starting"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(cleanup_interval) => {}
        }

        match store.delete_expired(retention).await {
            Ok(0) => debug!("retention pass deleted nothing"),
            Ok(deleted) => info!(deleted, "retention pass deleted expired jobs"),
            Err(e) => error!(error = %e, "retention pass failed"),
        }
    }

    info!("retention cleanup loop stopped");
}

/// Promote eligible failed jobs back to pending with exponential backoff.
pub async fn retry_promotion_loop(store: JobStore, shutdown: CancellationToken) {
    info!(
        batch = RETRY_BATCH_SIZE,
        "retry promotion loop starting"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(RETRY_PROMOTION_INTERVAL) => {}
        }

        match store.promote_retries(RETRY_BATCH_SIZE).await {
            Ok(0) => {}
            Ok(promoted) => info!(promoted, "promoted failed jobs for retry"),
            Err(e) => error!(error = %e, "retry promotion pass failed"),
        }
    }

    info!("retry promotion loop stopped");
}
