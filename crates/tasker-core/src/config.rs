//! Configuration.
//!
//! Load order: defaults, then the TOML file, then `.env`, then `TASKER_*`
//! environment overrides, then validation.
//!
//! Environment keys use `__` between section and field, e.g.
//! `TASKER_CRON__BATCH_SIZE=50` or `TASKER_WORKER__QUEUES=critical=6,default=3,low=1`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broker::RetryPolicy;
use crate::dispatcher::{DispatcherConfig, WeightedQueues};
use crate::domain::QueueName;

pub const ENV_PREFIX: &str = "TASKER_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("bad value for {key}: {reason}")]
    Env { key: String, reason: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tasker.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub path: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tasker-broker.db"),
        }
    }
}

/// Batch job parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    /// Completed todos older than this many days get archived.
    pub archive_days_threshold: u32,
    /// Hard cap on rows scanned per run.
    pub batch_size: usize,
    /// Look-ahead window for due date reminders.
    pub reminder_hours: u32,
    /// Cap for the per-user counts reported in job logs.
    pub max_todos_per_user_notification: usize,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            archive_days_threshold: 30,
            batch_size: 100,
            reminder_hours: 24,
            max_todos_per_user_notification: 10,
        }
    }
}

impl CronConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("cron.batch_size must be at least 1".to_string());
        }
        if self.reminder_hours == 0 {
            return Err("cron.reminder_hours must be at least 1".to_string());
        }
        if self.archive_days_threshold == 0 {
            return Err("cron.archive_days_threshold must be at least 1".to_string());
        }
        if self.max_todos_per_user_notification == 0 {
            return Err("cron.max_todos_per_user_notification must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// queue name → weight
    pub queues: BTreeMap<String, u32>,
    pub lease_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub shutdown_grace_secs: u64,
    pub retry_base_secs: u64,
    pub retry_multiplier: f64,
    pub retry_max_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queues: BTreeMap::from([
                ("critical".to_string(), 6),
                ("default".to_string(), 3),
                ("low".to_string(), 1),
            ]),
            lease_timeout_secs: 120,
            poll_interval_ms: 500,
            shutdown_grace_secs: 8,
            retry_base_secs: 10,
            retry_multiplier: 2.0,
            retry_max_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub cron: CronConfig,
    pub worker: WorkerConfig,
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// `critical=6,default=3` → map
fn parse_queues(key: &str, value: &str) -> Result<BTreeMap<String, u32>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, weight) = pair.split_once('=').ok_or_else(|| ConfigError::Env {
                key: key.to_string(),
                reason: format!("expected name=weight, got {pair:?}"),
            })?;
            Ok((name.trim().to_string(), parse_num(key, weight)?))
        })
        .collect()
}

impl Config {
    /// Defaults → `path` (if any) → `.env` → `TASKER_*` → validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };

        // a missing .env is fine
        if let Ok(dotenv) = dotenvy::dotenv() {
            tracing::debug!(path = %dotenv.display(), "loaded .env");
        }
        config.apply_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `TASKER_<SECTION>__<FIELD>` pairs. Unrelated keys are ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let Some((section, field)) = rest.split_once("__") else {
                continue;
            };

            match (
                section.to_ascii_lowercase().as_str(),
                field.to_ascii_lowercase().as_str(),
            ) {
                ("database", "path") => self.database.path = PathBuf::from(value),
                ("broker", "path") => self.broker.path = PathBuf::from(value),
                ("cron", "archive_days_threshold") => {
                    self.cron.archive_days_threshold = parse_num(key, value)?
                }
                ("cron", "batch_size") => self.cron.batch_size = parse_num(key, value)?,
                ("cron", "reminder_hours") => self.cron.reminder_hours = parse_num(key, value)?,
                ("cron", "max_todos_per_user_notification") => {
                    self.cron.max_todos_per_user_notification = parse_num(key, value)?
                }
                ("worker", "concurrency") => self.worker.concurrency = parse_num(key, value)?,
                ("worker", "queues") => self.worker.queues = parse_queues(key, value)?,
                ("worker", "lease_timeout_secs") => {
                    self.worker.lease_timeout_secs = parse_num(key, value)?
                }
                ("worker", "poll_interval_ms") => {
                    self.worker.poll_interval_ms = parse_num(key, value)?
                }
                ("worker", "shutdown_grace_secs") => {
                    self.worker.shutdown_grace_secs = parse_num(key, value)?
                }
                ("worker", "retry_base_secs") => {
                    self.worker.retry_base_secs = parse_num(key, value)?
                }
                ("worker", "retry_multiplier") => {
                    self.worker.retry_multiplier = parse_num(key, value)?
                }
                ("worker", "retry_max_secs") => self.worker.retry_max_secs = parse_num(key, value)?,
                _ => tracing::warn!(key, "unknown config override ignored"),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cron.validate().map_err(ConfigError::Invalid)?;
        // checks concurrency and queue weights
        self.dispatcher_config()?;
        if self.worker.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "worker.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.worker.lease_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "worker.lease_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn dispatcher_config(&self) -> Result<DispatcherConfig, ConfigError> {
        let w = &self.worker;
        if w.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "worker.concurrency must be at least 1".to_string(),
            ));
        }
        let queues = WeightedQueues::new(
            w.queues
                .iter()
                .map(|(name, weight)| (QueueName::new(name.clone()), *weight)),
        )
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(DispatcherConfig {
            concurrency: w.concurrency,
            queues,
            lease_timeout: Duration::from_secs(w.lease_timeout_secs),
            poll_interval: Duration::from_millis(w.poll_interval_ms),
            shutdown_grace: Duration::from_secs(w.shutdown_grace_secs),
            retry: RetryPolicy::new(
                Duration::from_secs(w.retry_base_secs),
                w.retry_multiplier,
                Duration::from_secs(w.retry_max_secs),
            ),
        })
    }
}
