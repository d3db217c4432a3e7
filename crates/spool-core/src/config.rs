//! QueueConfig - キューの設定値
//!
//! serde の per-field default で JSON/TOML から読めるほか、
//! `from_env()` で `SPOOL_*` 環境変数を上書き適用できます。

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SpoolError;
use crate::queue::RetryPolicy;

/// Queue configuration.
///
/// | Env Var                        | Default  |
/// |--------------------------------|----------|
/// | `SPOOL_CONCURRENCY_CAP`        | `1`      |
/// | `SPOOL_MAX_RETRIES`            | `3`      |
/// | `SPOOL_TIMEOUT_SECS`           | `3600`   |
/// | `SPOOL_RETRY_BASE_DELAY_MS`    | `1000`   |
/// | `SPOOL_RETRY_MULTIPLIER`       | `2.0`    |
/// | `SPOOL_IDLE_POLL_MS`           | `1000`   |
/// | `SPOOL_STATE_PATH`             | unset (in-memory store) |
/// | `SPOOL_CLEANUP_INTERVAL_SECS`  | `3600` (`off` disables) |
/// | `SPOOL_CLEANUP_MAX_AGE_SECS`   | `86400`  |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Max attempts running at once. Must be >= 1.
    pub concurrency_cap: usize,
    /// Default for tasks submitted without `SubmitOptions::max_retries`.
    pub max_retries: u32,
    /// Default per-attempt timeout.
    pub timeout_secs: u64,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    /// How long the worker waits on an empty queue before an idle tick.
    pub idle_poll_ms: u64,
    /// Snapshot file. `None` keeps state in memory only.
    pub state_path: Option<PathBuf>,
    /// Period of the cleanup loop. `None` disables it.
    pub cleanup_interval_secs: Option<u64>,
    pub cleanup_max_age_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency_cap: 1,
            max_retries: 3,
            timeout_secs: 3600,
            retry_base_delay_ms: 1000,
            retry_multiplier: 2.0,
            idle_poll_ms: 1000,
            state_path: None,
            cleanup_interval_secs: Some(3600),
            cleanup_max_age_secs: 24 * 3600,
        }
    }
}

impl QueueConfig {
    /// Defaults overlaid with `SPOOL_*` environment variables.
    pub fn from_env() -> Result<Self, SpoolError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each `SPOOL_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SpoolError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("SPOOL_CONCURRENCY_CAP") {
            config.concurrency_cap = parse("SPOOL_CONCURRENCY_CAP", &v)?;
        }
        if let Some(v) = get("SPOOL_MAX_RETRIES") {
            config.max_retries = parse("SPOOL_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("SPOOL_TIMEOUT_SECS") {
            config.timeout_secs = parse("SPOOL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("SPOOL_RETRY_BASE_DELAY_MS") {
            config.retry_base_delay_ms = parse("SPOOL_RETRY_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = get("SPOOL_RETRY_MULTIPLIER") {
            config.retry_multiplier = parse("SPOOL_RETRY_MULTIPLIER", &v)?;
        }
        if let Some(v) = get("SPOOL_IDLE_POLL_MS") {
            config.idle_poll_ms = parse("SPOOL_IDLE_POLL_MS", &v)?;
        }
        if let Some(v) = get("SPOOL_STATE_PATH") {
            config.state_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SPOOL_CLEANUP_INTERVAL_SECS") {
            config.cleanup_interval_secs = match v.to_ascii_lowercase().as_str() {
                "off" | "none" | "0" => None,
                _ => Some(parse("SPOOL_CLEANUP_INTERVAL_SECS", &v)?),
            };
        }
        if let Some(v) = get("SPOOL_CLEANUP_MAX_AGE_SECS") {
            config.cleanup_max_age_secs = parse("SPOOL_CLEANUP_MAX_AGE_SECS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SpoolError> {
        if self.concurrency_cap == 0 {
            return Err(config_error("concurrency_cap", "must be at least 1"));
        }
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return Err(config_error("retry_multiplier", "must be a finite number >= 1.0"));
        }
        if self.idle_poll_ms == 0 {
            return Err(config_error("idle_poll_ms", "must be at least 1"));
        }
        if self.cleanup_interval_secs == Some(0) {
            return Err(config_error("cleanup_interval_secs", "use None to disable"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_base_delay_ms),
            self.retry_multiplier,
        )
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        self.cleanup_interval_secs.map(Duration::from_secs)
    }

    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.cleanup_max_age_secs)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, SpoolError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| config_error(key, &format!("{value:?}: {e}")))
}

fn config_error(key: &str, message: &str) -> SpoolError {
    SpoolError::Config {
        key: key.to_string(),
        message: message.to_string(),
    }
}
