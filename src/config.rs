//! Configuration types.

use std::time::Duration;

use crate::error::{ConfigError, Result};

const ENV_MAX_TASKS: &str = "TASKTRACK_MAX_TASKS";
const ENV_MAX_PARALLEL_JOBS: &str = "TASKTRACK_MAX_PARALLEL_JOBS";
const ENV_TASK_EXPIRY_SECS: &str = "TASKTRACK_TASK_EXPIRY_SECS";
const ENV_SWEEP_INTERVAL_SECS: &str = "TASKTRACK_SWEEP_INTERVAL_SECS";

/// Task tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Maximum number of running task records the registry accepts.
    pub max_tasks: usize,
    /// Maximum number of parallel jobs.
    pub max_parallel_jobs: usize,
    /// Finished records are pruned after this duration.
    pub task_expiry: Duration,
    /// Expiry check interval.
    pub sweep_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_tasks: 1000,
            max_parallel_jobs: 10,
            task_expiry: Duration::from_secs(3600), // 1 hour
            sweep_interval: Duration::from_secs(60), // 1 minute
        }
    }
}

impl TrackerConfig {
    /// Read the environment and validate the result.
    pub fn load() -> Result<Self> {
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `TASKTRACK_*` environment variables.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key.
    pub fn from_lookup<F>(lookup: F) -> std::result::Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_MAX_TASKS) {
            config.max_tasks = parse_number(ENV_MAX_TASKS, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_PARALLEL_JOBS) {
            config.max_parallel_jobs = parse_number(ENV_MAX_PARALLEL_JOBS, &v)?;
        }
        if let Some(v) = lookup(ENV_TASK_EXPIRY_SECS) {
            config.task_expiry = Duration::from_secs(parse_number(ENV_TASK_EXPIRY_SECS, &v)?);
        }
        if let Some(v) = lookup(ENV_SWEEP_INTERVAL_SECS) {
            config.sweep_interval =
                Duration::from_secs(parse_number(ENV_SWEEP_INTERVAL_SECS, &v)?);
        }

        Ok(config)
    }

    /// Reject values the tracker cannot run with.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_tasks == 0 {
            return Err(invalid(ENV_MAX_TASKS, "must be at least 1"));
        }
        if self.max_parallel_jobs == 0 {
            return Err(invalid(ENV_MAX_PARALLEL_JOBS, "must be at least 1"));
        }
        // tokio::time::interval panics on a zero period
        if self.sweep_interval.is_zero() {
            return Err(invalid(ENV_SWEEP_INTERVAL_SECS, "must be at least 1 second"));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &str,
    value: &str,
) -> std::result::Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, &format!("expected a non-negative integer, got {value:?}")))
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
