//! Child-process execution with captured, size-bounded output.
//!
//! The child's argv is exactly `[binary, ...arguments]` — no shell, no
//! splitting. Its environment is fully replaced by the job's mapping and
//! its working directory is the per-job directory. Cancellation kills
//! the child and still returns whatever was captured.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::output::truncate_output;

/// Exit code reported when the binary could not be started or the child
/// was killed before exiting on its own.
pub const EXIT_CODE_UNKNOWN: i32 = -1;

/// What to execute and where.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub binary_path: PathBuf,
    pub arguments: Vec<String>,
    pub env: HashMap<String, String>,
    pub work_dir: PathBuf,
}

/// Terminal result of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    fn spawn_failure(error: &std::io::Error, binary: &Path) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("failed to start binary {}: {}", binary.display(), error),
            exit_code: EXIT_CODE_UNKNOWN,
        }
    }
}

/// Run the binary to completion (or cancellation) and capture its output.
pub async fn run(request: ExecutionRequest, cancel: CancellationToken) -> ExecutionResult {
    debug!(
        binary = %request.binary_path.display(),
        args = ?request.arguments,
        work_dir = %request.work_dir.display(),
        "launching job binary"
    );

    let mut command = Command::new(&request.binary_path);
    command
        .args(&request.arguments)
        .env_clear()
        .envs(&request.env)
        .current_dir(&request.work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return ExecutionResult::spawn_failure(&e, &request.binary_path),
    };

    // Drain both pipes concurrently with the wait so a chatty child can
    // never fill a pipe and deadlock.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });

    // Scope the wait future so its borrow of the child ends before the
    // cancellation path needs the child back.
    let waited = {
        let wait = child.wait();
        tokio::pin!(wait);
        tokio::select! {
            status = &mut wait => Some(status),
            _ = cancel.cancelled() => None,
        }
    };

    let exit_code = match waited {
        Some(Ok(status)) => status.code().unwrap_or(EXIT_CODE_UNKNOWN),
        Some(Err(e)) => {
            warn!(error = %e, "failed to wait for child");
            EXIT_CODE_UNKNOWN
        }
        None => {
            debug!("execution cancelled, killing child");
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "failed to kill child");
            }
            // Reap the child so the pipes close and the readers finish.
            let _ = child.wait().await;
            EXIT_CODE_UNKNOWN
        }
    };

    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();

    ExecutionResult {
        stdout: truncate_output(&String::from_utf8_lossy(&stdout_bytes)),
        stderr: truncate_output(&String::from_utf8_lossy(&stderr_bytes)),
        exit_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn request(binary: &str, arguments: &[&str]) -> (ExecutionRequest, TempDir) {
        let work = TempDir::new().unwrap();
        let request = ExecutionRequest {
            binary_path: PathBuf::from(binary),
            arguments: arguments.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            work_dir: work.path().to_path_buf(),
        };
        (request, work)
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let (req, _work) = request("/bin/echo", &["hello", "runner"]);
        let result = run(req, CancellationToken::new()).await;

        assert_eq!(result.exit_code, 0);
        assert!(result.succeeded());
        assert_eq!(result.stdout.trim(), "hello runner");
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn arguments_are_not_shell_interpreted() {
        let (req, _work) = request("/bin/echo", &["$HOME", "a b"]);
        let result = run(req, CancellationToken::new()).await;

        assert_eq!(result.stdout.trim(), "$HOME a b");
    }

    #[tokio::test]
    async fn environment_is_replaced_not_inherited() {
        let (mut req, _work) = request("/usr/bin/env", &[]);
        req.env.insert("ONLY_VAR".to_string(), "only-value".to_string());
        let result = run(req, CancellationToken::new()).await;

        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("ONLY_VAR=only-value"));
        // Nothing leaks from the worker's own environment.
        assert!(!result.stdout.contains("PATH="));
    }

    #[tokio::test]
    async fn empty_env_yields_empty_environment() {
        let (req, _work) = request("/usr/bin/env", &[]);
        let result = run(req, CancellationToken::new()).await;

        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.trim().is_empty());
    }

    #[tokio::test]
    async fn working_directory_is_the_job_dir() {
        let (req, work) = request("/bin/pwd", &[]);
        let result = run(req, CancellationToken::new()).await;

        assert_eq!(result.exit_code, 0);
        let reported = PathBuf::from(result.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            work.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_reported() {
        let (req, _work) = request("/bin/false", &[]);
        let result = run(req, CancellationToken::new()).await;

        assert_ne!(result.exit_code, 0);
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn missing_binary_reports_minus_one_with_diagnostic() {
        let (req, _work) = request("/nonexistent/binary", &[]);
        let result = run(req, CancellationToken::new()).await;

        assert_eq!(result.exit_code, EXIT_CODE_UNKNOWN);
        assert!(result.stderr.contains("failed to start binary"));
        assert!(result.stderr.contains("/nonexistent/binary"));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let (req, _work) = request("/bin/sleep", &["30"]);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result = run(req, cancel).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.exit_code, EXIT_CODE_UNKNOWN);
    }
}
