use crate::migration::retry::{Backoff, RetryPolicy};
use crate::migration::scheduler::SchedulerConfig;
use crate::migration::store::StoreBackend;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Linear,
    Exponential,
    Jittered,
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "linear" => Ok(BackoffKind::Linear),
            "exponential" => Ok(BackoffKind::Exponential),
            "jittered" | "jitter" => Ok(BackoffKind::Jittered),
            other => Err(format!("unknown backoff {other:?}")),
        }
    }
}

/// Service settings. Defaults, then an optional YAML file, then environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    pub port: u16,
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff: BackoffKind,
    pub backoff_ms: u64,
    pub backoff_max_ms: u64,
    pub pause_poll_ms: u64,
    pub store: StoreBackend,
    pub data_dir: PathBuf,
    pub redis_url: Option<String>,
    pub redis_prefix: String,
    pub request_max_bytes: usize,
    pub enable_network: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            concurrency: 3,
            max_retries: 2,
            backoff: BackoffKind::Linear,
            backoff_ms: 500,
            backoff_max_ms: 10_000,
            pause_poll_ms: 300,
            store: StoreBackend::Memory,
            data_dir: PathBuf::from("data"),
            redis_url: None,
            redis_prefix: "migrator".to_string(),
            request_max_bytes: 256 * 1024,
            enable_network: false,
        }
    }
}

impl MigratorConfig {
    /// Reads `MIGRATOR_CONFIG_FILE` when set, then applies the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("MIGRATOR_CONFIG_FILE") {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        Ok(base.apply_env(|key| std::env::var(key).ok()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Overrides fields from `lookup`. Unparseable values are ignored.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(port) = parsed("PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(limit) = parsed("MIGRATOR_CONCURRENCY")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
        {
            self.concurrency = limit;
        }
        if let Some(retries) = parsed("MIGRATOR_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.max_retries = retries;
        }
        if let Some(kind) = parsed("MIGRATOR_BACKOFF").and_then(|v| v.parse().ok()) {
            self.backoff = kind;
        }
        if let Some(ms) = parsed("MIGRATOR_BACKOFF_MS").and_then(|v| v.parse().ok()) {
            self.backoff_ms = ms;
        }
        if let Some(ms) = parsed("MIGRATOR_BACKOFF_MAX_MS").and_then(|v| v.parse().ok()) {
            self.backoff_max_ms = ms;
        }
        if let Some(ms) = parsed("MIGRATOR_PAUSE_POLL_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
        {
            self.pause_poll_ms = ms;
        }
        if let Some(store) = parsed("MIGRATOR_STORE").and_then(|v| v.parse().ok()) {
            self.store = store;
        }
        if let Some(dir) = parsed("MIGRATOR_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = parsed("REDIS_URL") {
            self.redis_url = Some(url);
        }
        if let Some(prefix) = lookup("MIGRATOR_REDIS_PREFIX") {
            self.redis_prefix = prefix.trim().to_string();
        }
        if let Some(bytes) = parsed("REQUEST_MAX_BYTES")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
        {
            self.request_max_bytes = bytes;
        }
        if let Some(flag) = parsed("MARKETPLACE_ENABLE_NETWORK") {
            self.enable_network = matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = match self.backoff {
            BackoffKind::Linear => Backoff::Linear {
                step_ms: self.backoff_ms,
            },
            BackoffKind::Exponential => Backoff::Exponential {
                base_ms: self.backoff_ms,
                max_ms: self.backoff_max_ms.max(self.backoff_ms),
            },
            BackoffKind::Jittered => Backoff::Jittered {
                base_ms: self.backoff_ms,
                max_ms: self.backoff_max_ms.max(self.backoff_ms),
            },
        };
        RetryPolicy {
            max_retries: self.max_retries,
            backoff,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            concurrency_limit: self.concurrency,
            retry: self.retry_policy(),
            pause_poll_interval: Duration::from_millis(self.pause_poll_ms),
        }
    }
}
