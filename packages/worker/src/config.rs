//! Worker configuration.
//!
//! Same contract as the coordinator: every setting has a command-line
//! flag and an `EXECUTR_*` environment variable, and the environment
//! wins.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use executr_api::config::{duration_setting, env_or};

#[derive(Debug, Parser)]
#[command(name = "worker", about = "Executr worker", version)]
struct Args {
    /// Coordinator base URL
    #[arg(long = "server-url")]
    server_url: Option<String>,

    /// Worker name; the executor id is derived from it
    #[arg(long)]
    name: Option<String>,

    /// Directory for the content-addressed binary cache
    #[arg(long = "cache-dir")]
    cache_dir: Option<String>,

    /// Directory under which per-job working directories are created
    #[arg(long = "work-dir")]
    work_dir: Option<String>,

    /// Maximum concurrently running jobs
    #[arg(long = "max-jobs")]
    max_jobs: Option<usize>,

    /// How often to poll for claimable jobs (e.g. 5s)
    #[arg(long = "poll-interval")]
    poll_interval: Option<String>,

    /// Binary cache budget in megabytes
    #[arg(long = "max-cache-size")]
    max_cache_size: Option<u64>,

    /// How often to heartbeat each running job (e.g. 5s)
    #[arg(long = "heartbeat-interval")]
    heartbeat_interval: Option<String>,

    /// Stop claiming after this long without a reachable coordinator
    #[arg(long = "network-timeout")]
    network_timeout: Option<String>,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

/// Resolved worker settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: String,
    pub name: String,
    pub cache_dir: PathBuf,
    pub work_dir: PathBuf,
    pub max_jobs: usize,
    pub poll_interval: Duration,
    pub max_cache_bytes: u64,
    pub heartbeat_interval: Duration,
    pub network_timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Load from CLI flags and `EXECUTR_*` environment variables.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::resolve(Args::parse())
    }

    /// Parse an explicit argv; used by tests.
    pub fn load_from<I, T>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::resolve(Args::try_parse_from(argv)?)
    }

    fn resolve(args: Args) -> Result<Self> {
        let name = env_or("EXECUTR_NAME", args.name)
            .context("name is required (--name or EXECUTR_NAME)")?;
        if name.is_empty() {
            anyhow::bail!("worker name must not be empty");
        }

        let server_url = env_or("EXECUTR_SERVER_URL", args.server_url)
            .unwrap_or_else(|| "http://localhost:8080".to_string());

        let cache_dir = env_or("EXECUTR_CACHE_DIR", args.cache_dir)
            .unwrap_or_else(|| "~/.executr/cache".to_string());
        let cache_dir = expand_home(&cache_dir)?;

        let work_dir = env_or("EXECUTR_WORK_DIR", args.work_dir)
            .unwrap_or_else(|| "/tmp/executr-jobs".to_string());

        let max_jobs = match env_or("EXECUTR_MAX_JOBS", args.max_jobs.map(|n| n.to_string())) {
            Some(raw) => raw.parse::<usize>().context("max-jobs must be a number")?,
            None => 1,
        };
        if max_jobs == 0 {
            anyhow::bail!("max-jobs must be at least 1");
        }

        let max_cache_mb = match env_or(
            "EXECUTR_MAX_CACHE_SIZE",
            args.max_cache_size.map(|n| n.to_string()),
        ) {
            Some(raw) => raw
                .parse::<u64>()
                .context("max-cache-size must be a number of megabytes")?,
            None => 400,
        };

        Ok(Self {
            server_url,
            name,
            cache_dir,
            work_dir: PathBuf::from(work_dir),
            max_jobs,
            poll_interval: duration_setting(
                "EXECUTR_POLL_INTERVAL",
                args.poll_interval,
                Duration::from_secs(5),
            )?,
            max_cache_bytes: max_cache_mb * 1024 * 1024,
            heartbeat_interval: duration_setting(
                "EXECUTR_HEARTBEAT_INTERVAL",
                args.heartbeat_interval,
                Duration::from_secs(5),
            )?,
            network_timeout: duration_setting(
                "EXECUTR_NETWORK_TIMEOUT",
                args.network_timeout,
                Duration::from_secs(60),
            )?,
            log_level: env_or("EXECUTR_LOG_LEVEL", args.log_level)
                .unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Expand a leading `~/` against the current user's home directory.
fn expand_home(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().context("cannot expand ~: no home directory")?;
        return Ok(home.join(rest));
    }
    Ok(PathBuf::from(path))
}
