//! End-to-end worker behavior against a mock coordinator.
//!
//! The mock serves a real executable's bytes as the job binary, so a
//! test drives the full path: claim → download + verify → execute →
//! terminal post → work-directory cleanup.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use executr_api::{CompleteRequest, FailRequest, Job, JobPriority, JobStatus};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use worker_core::{Config, Worker};

#[derive(Clone)]
struct Coordinator {
    job: Arc<Job>,
    binary: Arc<Vec<u8>>,
    claimed: Arc<AtomicBool>,
    heartbeats: Arc<std::sync::atomic::AtomicUsize>,
    completions: Arc<Mutex<Vec<CompleteRequest>>>,
    failures: Arc<Mutex<Vec<FailRequest>>>,
}

impl Coordinator {
    fn job_template(addr_hint: &str, binary: &[u8], arguments: Vec<String>) -> Job {
        Job {
            id: Uuid::new_v4(),
            job_type: "echo-test".to_string(),
            binary_url: addr_hint.to_string(),
            binary_sha256: hex::encode(Sha256::digest(binary)),
            arguments,
            env_variables: HashMap::new(),
            priority: JobPriority::Background,
            max_retries: 0,
            status: JobStatus::Running,
            executor_id: None,
            retry_count: 0,
            retry_after: None,
            stdout: None,
            stderr: None,
            exit_code: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            last_heartbeat: Some(Utc::now()),
            attempts: vec![],
        }
    }
}

async fn claim(State(c): State<Coordinator>) -> impl IntoResponse {
    if c.claimed
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        Json(c.job.as_ref().clone()).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn binary(State(c): State<Coordinator>) -> Vec<u8> {
    c.binary.as_ref().clone()
}

async fn heartbeat(State(c): State<Coordinator>) -> StatusCode {
    c.heartbeats.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

async fn complete(State(c): State<Coordinator>, Json(req): Json<CompleteRequest>) -> StatusCode {
    c.completions.lock().await.push(req);
    StatusCode::NO_CONTENT
}

async fn fail(State(c): State<Coordinator>, Json(req): Json<FailRequest>) -> StatusCode {
    c.failures.lock().await.push(req);
    StatusCode::NO_CONTENT
}

/// Boot a mock coordinator serving exactly one claimable job.
async fn mock_coordinator(binary: Vec<u8>, arguments: Vec<String>, digest_override: Option<String>) -> (SocketAddr, Coordinator) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut job = Coordinator::job_template(&format!("http://{}/binary", addr), &binary, arguments);
    if let Some(digest) = digest_override {
        job.binary_sha256 = digest;
    }

    let state = Coordinator {
        job: Arc::new(job),
        binary: Arc::new(binary.clone()),
        claimed: Arc::new(AtomicBool::new(false)),
        heartbeats: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        completions: Arc::new(Mutex::new(Vec::new())),
        failures: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/api/v1/jobs/claim", post(claim))
        .route("/api/v1/jobs/:id/heartbeat", put(heartbeat))
        .route("/api/v1/jobs/:id/complete", put(complete))
        .route("/api/v1/jobs/:id/fail", put(fail))
        .route("/binary", get(binary))
        .with_state(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

fn worker_config(addr: SocketAddr, cache_dir: &std::path::Path, work_dir: &std::path::Path) -> Config {
    Config {
        server_url: format!("http://{}", addr),
        name: "itest".to_string(),
        cache_dir: cache_dir.to_path_buf(),
        work_dir: work_dir.to_path_buf(),
        max_jobs: 1,
        poll_interval: Duration::from_millis(50),
        max_cache_bytes: 50 * 1024 * 1024,
        heartbeat_interval: Duration::from_millis(100),
        network_timeout: Duration::from_secs(60),
        log_level: "info".to_string(),
    }
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within 10 s");
}

#[tokio::test]
async fn claims_runs_and_completes_a_job() {
    let echo = std::fs::read("/bin/echo").expect("/bin/echo readable");
    let (addr, coordinator) = mock_coordinator(
        echo,
        vec!["hello".to_string(), "executr".to_string()],
        None,
    )
    .await;

    let cache_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let worker = Worker::new(worker_config(addr, cache_dir.path(), work_dir.path())).unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    let completions = coordinator.completions.clone();
    wait_for(|| {
        let completions = completions.clone();
        async move { !completions.lock().await.is_empty() }
    })
    .await;

    let posted = coordinator.completions.lock().await;
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].exit_code, 0);
    assert_eq!(posted[0].stdout.trim(), "hello executr");
    assert!(posted[0].executor_id.starts_with("itest-"));
    drop(posted);

    // The binary landed in the cache under its digest.
    let digest = &coordinator.job.binary_sha256;
    assert!(cache_dir.path().join(digest).exists());

    // The per-job working directory is gone.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(std::fs::read_dir(work_dir.path()).unwrap().count(), 0);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn digest_mismatch_fails_the_job_with_diagnostic() {
    let echo = std::fs::read("/bin/echo").expect("/bin/echo readable");
    let (addr, coordinator) =
        mock_coordinator(echo, vec![], Some("00".repeat(32))).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let worker = Worker::new(worker_config(addr, cache_dir.path(), work_dir.path())).unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    let failures = coordinator.failures.clone();
    wait_for(|| {
        let failures = failures.clone();
        async move { !failures.lock().await.is_empty() }
    })
    .await;

    let posted = coordinator.failures.lock().await;
    assert_eq!(posted.len(), 1);
    assert!(posted[0].error_message.contains("digest mismatch"));
    assert!(posted[0].exit_code.is_none());
    drop(posted);

    assert!(coordinator.completions.lock().await.is_empty());

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn nonzero_exit_posts_failure_with_outputs() {
    let false_bin = std::fs::read("/bin/false").expect("/bin/false readable");
    let (addr, coordinator) = mock_coordinator(false_bin, vec![], None).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let worker = Worker::new(worker_config(addr, cache_dir.path(), work_dir.path())).unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    let failures = coordinator.failures.clone();
    wait_for(|| {
        let failures = failures.clone();
        async move { !failures.lock().await.is_empty() }
    })
    .await;

    let posted = coordinator.failures.lock().await;
    assert_eq!(posted[0].error_message, "Job failed with non-zero exit code");
    assert_eq!(posted[0].exit_code, Some(1));
    drop(posted);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn quiesces_after_network_timeout() {
    // Nothing listens on this address.
    let cache_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let config = Config {
        server_url: "http://127.0.0.1:1".to_string(),
        name: "lonely".to_string(),
        cache_dir: cache_dir.path().to_path_buf(),
        work_dir: work_dir.path().to_path_buf(),
        max_jobs: 1,
        poll_interval: Duration::from_millis(50),
        max_cache_bytes: 1024 * 1024,
        heartbeat_interval: Duration::from_secs(5),
        network_timeout: Duration::from_millis(300),
        log_level: "info".to_string(),
    };

    let worker = Worker::new(config).unwrap();
    let started = std::time::Instant::now();
    worker.run(CancellationToken::new()).await.unwrap();

    // Exited on its own, well before any shutdown signal.
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn exit_code_and_stderr_are_captured_on_failure() {
    // Scripts with a shebang line exec directly; no shell is spawned by
    // the worker itself.
    let script = b"#!/bin/sh\necho \"ERROR: Intentional failure\" >&2\nexit 42\n".to_vec();
    let (addr, coordinator) = mock_coordinator(script, vec![], None).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let worker = Worker::new(worker_config(addr, cache_dir.path(), work_dir.path())).unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    let failures = coordinator.failures.clone();
    wait_for(|| {
        let failures = failures.clone();
        async move { !failures.lock().await.is_empty() }
    })
    .await;

    let posted = coordinator.failures.lock().await;
    assert_eq!(posted[0].exit_code, Some(42));
    assert_eq!(posted[0].error_message, "Job failed with non-zero exit code");
    assert!(posted[0]
        .stderr
        .as_deref()
        .unwrap_or_default()
        .contains("ERROR: Intentional failure"));
    drop(posted);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn oversized_output_is_truncated_before_posting() {
    // ~10,000 lines of ~120 bytes each: well past the 1 MiB cap.
    // Builtins only: the job environment is empty, so there is no PATH.
    let script = b"#!/bin/sh\npad=xxxxxxxxxx\npad=$pad$pad$pad$pad$pad$pad$pad$pad$pad$pad\ni=1\nwhile [ $i -le 10000 ]; do\n  printf 'STDOUT Line %05d %s\\n' $i \"$pad\"\n  i=$((i+1))\ndone\n"
        .to_vec();
    let (addr, coordinator) = mock_coordinator(script, vec![], None).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let worker = Worker::new(worker_config(addr, cache_dir.path(), work_dir.path())).unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    let completions = coordinator.completions.clone();
    wait_for(|| {
        let completions = completions.clone();
        async move { !completions.lock().await.is_empty() }
    })
    .await;

    let posted = coordinator.completions.lock().await;
    assert_eq!(posted[0].exit_code, 0);
    assert!(posted[0].stdout.len() <= 1024 * 1024);
    assert!(posted[0].stdout.starts_with("STDOUT Line 00001"));
    assert!(posted[0].stdout.contains("OUTPUT TRUNCATED"));
    // The tail survives truncation.
    assert!(posted[0].stdout.contains("STDOUT Line 10000"));
    drop(posted);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn heartbeats_flow_while_the_job_runs() {
    // Absolute path: the empty job environment carries no PATH.
    let script = b"#!/bin/sh\n/bin/sleep 1\n".to_vec();
    let (addr, coordinator) = mock_coordinator(script, vec![], None).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let worker = Worker::new(worker_config(addr, cache_dir.path(), work_dir.path())).unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    let completions = coordinator.completions.clone();
    wait_for(|| {
        let completions = completions.clone();
        async move { !completions.lock().await.is_empty() }
    })
    .await;

    // With a 100 ms pump and a 1 s child, several stamps must have landed.
    assert!(coordinator.heartbeats.load(Ordering::SeqCst) >= 3);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn startup_scrubs_orphaned_work_directories() {
    let echo = std::fs::read("/bin/echo").expect("/bin/echo readable");
    let (addr, _coordinator) = mock_coordinator(echo, vec![], None).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();

    let orphan = work_dir.path().join(Uuid::new_v4().to_string());
    std::fs::create_dir_all(&orphan).unwrap();
    std::fs::write(orphan.join("leftover.txt"), b"stale").unwrap();

    let _worker = Worker::new(worker_config(addr, cache_dir.path(), work_dir.path())).unwrap();

    assert!(!orphan.exists(), "orphaned job dir removed at boot");
}
