//! Coordinator configuration.
//!
//! Every setting accepts a command-line flag and an `EXECUTR_*` environment
//! variable; the environment wins over the flag so containerized
//! deployments can override baked-in defaults.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use executr_api::config::{duration_setting, env_or};

#[derive(Debug, Parser)]
#[command(name = "coordinator", about = "Executr coordinator", version)]
struct Args {
    /// Postgres connection string
    #[arg(long = "db-url")]
    db_url: Option<String>,

    /// HTTP listen port
    #[arg(long)]
    port: Option<u16>,

    /// How often the retention cleanup loop runs (e.g. 1h, 30m)
    #[arg(long = "cleanup-interval")]
    cleanup_interval: Option<String>,

    /// How long terminal jobs are kept before deletion (e.g. 48h)
    #[arg(long = "job-retention")]
    job_retention: Option<String>,

    /// Running jobs without a heartbeat for this long are reset to pending
    #[arg(long = "heartbeat-timeout")]
    heartbeat_timeout: Option<String>,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

/// Resolved coordinator settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub port: u16,
    pub cleanup_interval: Duration,
    pub job_retention: Duration,
    pub heartbeat_timeout: Duration,
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
        let db_url = env_or("EXECUTR_DB_URL", args.db_url)
            .context("db-url is required (--db-url or EXECUTR_DB_URL)")?;

        let port = match env_or("EXECUTR_PORT", args.port.map(|p| p.to_string())) {
            Some(raw) => raw.parse::<u16>().context("port must be a number")?,
            None => 8080,
        };

        Ok(Self {
            db_url,
            port,
            cleanup_interval: duration_setting(
                "EXECUTR_CLEANUP_INTERVAL",
                args.cleanup_interval,
                Duration::from_secs(3600),
            )?,
            job_retention: duration_setting(
                "EXECUTR_JOB_RETENTION",
                args.job_retention,
                Duration::from_secs(48 * 3600),
            )?,
            heartbeat_timeout: duration_setting(
                "EXECUTR_HEARTBEAT_TIMEOUT",
                args.heartbeat_timeout,
                Duration::from_secs(15),
            )?,
            log_level: env_or("EXECUTR_LOG_LEVEL", args.log_level)
                .unwrap_or_else(|| "info".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied() {
        let config =
            Config::load_from(["coordinator", "--db-url", "postgres://localhost/executr"]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.cleanup_interval, Duration::from_secs(3600));
        assert_eq!(config.job_retention, Duration::from_secs(48 * 3600));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(15));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::load_from([
            "coordinator",
            "--db-url",
            "postgres://localhost/executr",
            "--port",
            "9090",
            "--heartbeat-timeout",
            "30s",
        ])
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(30));
    }

    #[test]
    fn missing_db_url_is_an_error() {
        // Guard: only meaningful when the env override is not set.
        if std::env::var("EXECUTR_DB_URL").is_err() {
            assert!(Config::load_from(["coordinator"]).is_err());
        }
    }
}
