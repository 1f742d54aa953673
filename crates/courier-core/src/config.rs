//! Queue configuration
//!
//! 優先順位: defaults < 設定ファイル（JSON / TOML）< `COURIER_*` 環境変数。
//! 最後に validate() を通します。

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Prepended to every `queues:*` key.
    pub prefix: String,
    /// Used when neither the caller nor the job names a queue.
    pub default_queue: String,
    /// Bounded wait of `pop`.
    pub block_for_ms: u64,
    /// Reservation lifetime. `None` keeps reservations until delete/release.
    pub retry_after_secs: Option<u64>,
    /// Applied to jobs that report `max_attempts == 0`.
    pub default_max_attempts: u32,
    /// Max entries moved per migration pass.
    pub migration_batch: usize,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_ms: Option<u64>,
    pub redis_url: Option<String>,
    pub logging: LoggingConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            default_queue: "default".to_string(),
            block_for_ms: 1000,
            retry_after_secs: Some(90),
            default_max_attempts: 3,
            migration_batch: 100,
            backoff_base_ms: 2000,
            backoff_multiplier: 2.0,
            backoff_max_ms: None,
            redis_url: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn block_for(&self) -> Duration {
        Duration::from_millis(self.block_for_ms)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs.map(Duration::from_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::exponential(
            Duration::from_millis(self.backoff_base_ms),
            self.backoff_multiplier,
        );
        match self.backoff_max_ms {
            Some(ms) => policy.with_max_delay(Duration::from_millis(ms)),
            None => policy,
        }
    }

    /// Defaults overridden by the process environment, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Optional config file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Defaults overridden through `lookup` (an environment-like key/value source).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::load_with(None, lookup)
    }

    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_overrides(&lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a `.json` or `.toml` file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());
        match ext.as_deref() {
            Some("toml") => toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string())),
            Some("json") => serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string())),
            other => Err(ConfigError::Parse(format!(
                "unsupported config file extension: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    fn apply_overrides<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("COURIER_PREFIX") {
            self.prefix = v;
        }
        if let Some(v) = lookup("COURIER_DEFAULT_QUEUE") {
            self.default_queue = v;
        }
        if let Some(v) = parse(lookup, "COURIER_BLOCK_FOR_MS")? {
            self.block_for_ms = v;
        }
        // 0 disables reservation expiry
        if let Some(v) = parse::<u64, _>(lookup, "COURIER_RETRY_AFTER_SECS")? {
            self.retry_after_secs = (v > 0).then_some(v);
        }
        if let Some(v) = parse(lookup, "COURIER_MAX_ATTEMPTS")? {
            self.default_max_attempts = v;
        }
        if let Some(v) = lookup("COURIER_REDIS_URL") {
            self.redis_url = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup("COURIER_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("COURIER_LOG_JSON") {
            self.logging.json = parse_bool(&v)
                .ok_or_else(|| ConfigError::Parse(format!("invalid COURIER_LOG_JSON: {v}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_for_ms == 0 {
            return Err(ConfigError::Validation("block_for_ms must be > 0".into()));
        }
        if self.migration_batch == 0 {
            return Err(ConfigError::Validation("migration_batch must be > 0".into()));
        }
        if self.default_max_attempts == 0 {
            return Err(ConfigError::Validation(
                "default_max_attempts must be > 0".into(),
            ));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "backoff_multiplier must be >= 1.0".into(),
            ));
        }
        if self.default_queue.is_empty() {
            return Err(ConfigError::Validation("default_queue must not be empty".into()));
        }
        Ok(())
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {key}: {e}"))),
        None => Ok(None),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
