//! Small configuration helpers shared by the coordinator and the worker.
//!
//! Every Executr setting accepts a command-line flag and an `EXECUTR_*`
//! environment variable, with the environment winning so container
//! deployments can override baked-in defaults.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
    #[error("unknown duration unit: {0}")]
    UnknownUnit(String),
}

/// Environment overrides flag.
pub fn env_or(var: &str, flag: Option<String>) -> Option<String> {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => flag,
    }
}

/// Resolve a duration setting from env var, then flag, then default.
pub fn duration_setting(
    var: &str,
    flag: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match env_or(var, flag) {
        Some(raw) => parse_duration(&raw),
        None => Ok(default),
    }
}

/// Parse `500ms`, `5s`, `2m`, `1h` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::InvalidDuration(raw.to_string()));
    }

    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(raw.to_string()))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(ConfigError::UnknownUnit(other.to_string())),
    }
}
