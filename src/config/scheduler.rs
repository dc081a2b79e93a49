//! Scheduler configuration: concurrency limits, timeouts, cleanup, and cluster mode.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::pool::{WorkerPoolConfig, DEFAULT_THREAD_STACK_SIZE};

/// Default ceiling on jobs waiting in the shared queue.
pub const DEFAULT_MAX_WAITING_JOBS: usize = 5000;
/// Default idle time of a worker thread, in seconds. Advisory only.
pub const DEFAULT_WORKER_IDLE_TIMEOUT_SECS: u64 = 60;
/// Default hard timeout of a job, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
/// Default time without a status check before a job counts as abandoned, in seconds.
pub const DEFAULT_ABANDONED_TIMEOUT_SECS: u64 = 120;
/// Default interval between old-file cleanups, in seconds.
pub const DEFAULT_OLD_FILE_CLEANUP_INTERVAL_SECS: u64 = 86_400;
/// Default reconciliation interval, in milliseconds.
pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 500;

/// Prefix of the environment variables read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "REPORT_SCHEDULER_";

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads, and so the maximum number of jobs running on this node.
    pub max_running_jobs: usize,
    /// Submissions are rejected once this many jobs wait in the shared queue.
    pub max_waiting_jobs: usize,
    /// Worker idle timeout in seconds. The pool size is fixed, so this is advisory.
    pub worker_idle_timeout_secs: u64,
    /// Jobs running longer than this are cancelled.
    pub timeout_secs: u64,
    /// Jobs whose status nobody checked for this long are cancelled.
    pub abandoned_timeout_secs: u64,
    /// Whether old report files are deleted periodically.
    pub old_file_cleanup: bool,
    /// Seconds between two cleanup runs.
    pub old_file_cleanup_interval_secs: u64,
    /// Pull work from the shared queue instead of executing submissions directly.
    pub clustered: bool,
    /// Milliseconds between two reconciliation passes.
    pub reconcile_interval_ms: u64,
    /// Worker thread stack size in bytes.
    pub thread_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_running_jobs: num_cpus::get(),
            max_waiting_jobs: DEFAULT_MAX_WAITING_JOBS,
            worker_idle_timeout_secs: DEFAULT_WORKER_IDLE_TIMEOUT_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            abandoned_timeout_secs: DEFAULT_ABANDONED_TIMEOUT_SECS,
            old_file_cleanup: true,
            old_file_cleanup_interval_secs: DEFAULT_OLD_FILE_CLEANUP_INTERVAL_SECS,
            clustered: false,
            reconcile_interval_ms: DEFAULT_RECONCILE_INTERVAL_MS,
            thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
        }
    }
}

impl SchedulerConfig {
    /// Defaults for every option.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrently running jobs.
    #[must_use]
    pub const fn with_max_running_jobs(mut self, n: usize) -> Self {
        self.max_running_jobs = n;
        self
    }

    /// Set the waiting-job ceiling.
    #[must_use]
    pub const fn with_max_waiting_jobs(mut self, n: usize) -> Self {
        self.max_waiting_jobs = n;
        self
    }

    /// Set the hard timeout in seconds.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the abandonment timeout in seconds.
    #[must_use]
    pub const fn with_abandoned_timeout_secs(mut self, secs: u64) -> Self {
        self.abandoned_timeout_secs = secs;
        self
    }

    /// Enable or disable periodic old-file cleanup.
    #[must_use]
    pub const fn with_old_file_cleanup(mut self, enabled: bool) -> Self {
        self.old_file_cleanup = enabled;
        self
    }

    /// Set the cleanup interval in seconds.
    #[must_use]
    pub const fn with_old_file_cleanup_interval_secs(mut self, secs: u64) -> Self {
        self.old_file_cleanup_interval_secs = secs;
        self
    }

    /// Enable or disable clustered mode.
    #[must_use]
    pub const fn with_clustered(mut self, clustered: bool) -> Self {
        self.clustered = clustered;
        self
    }

    /// Set the reconciliation interval in milliseconds.
    #[must_use]
    pub const fn with_reconcile_interval_ms(mut self, ms: u64) -> Self {
        self.reconcile_interval_ms = ms;
        self
    }

    /// Hard timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Abandonment timeout.
    #[must_use]
    pub const fn abandoned_timeout(&self) -> Duration {
        Duration::from_secs(self.abandoned_timeout_secs)
    }

    /// Reconciliation interval.
    #[must_use]
    pub const fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    /// Cleanup interval.
    #[must_use]
    pub const fn old_file_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.old_file_cleanup_interval_secs)
    }

    /// Pool sizing derived from this configuration.
    #[must_use]
    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new()
            .with_worker_count(self.max_running_jobs)
            .with_thread_stack_size(self.thread_stack_size)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_running_jobs == 0 {
            return Err("max_running_jobs must be greater than 0".into());
        }
        if self.max_waiting_jobs == 0 {
            return Err("max_waiting_jobs must be greater than 0".into());
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".into());
        }
        if self.abandoned_timeout_secs == 0 {
            return Err("abandoned_timeout_secs must be greater than 0".into());
        }
        if self.reconcile_interval_ms == 0 {
            return Err("reconcile_interval_ms must be greater than 0".into());
        }
        if self.old_file_cleanup && self.old_file_cleanup_interval_secs == 0 {
            return Err("old_file_cleanup_interval_secs must be greater than 0".into());
        }
        self.worker_pool_config().validate()
    }

    /// Both timeouts must be strictly shorter than the shared queue's retention
    /// horizon, or a job record could be purged before its terminal state is seen.
    /// `None` means records are kept forever.
    ///
    /// # Errors
    ///
    /// Returns a description of the violated bound.
    pub fn validate_against_retention(&self, retention_ms: Option<u64>) -> Result<(), String> {
        let Some(retention_ms) = retention_ms else {
            return Ok(());
        };
        let abandoned_ms = self.abandoned_timeout_secs.saturating_mul(1000);
        if abandoned_ms >= retention_ms {
            return Err(format!(
                "abandoned_timeout ({abandoned_ms} ms) must be smaller than the queue retention ({retention_ms} ms)"
            ));
        }
        let timeout_ms = self.timeout_secs.saturating_mul(1000);
        if timeout_ms >= retention_ms {
            return Err(format!(
                "timeout ({timeout_ms} ms) must be smaller than the queue retention ({retention_ms} ms)"
            ));
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `REPORT_SCHEDULER_*` environment variables,
    /// loading a `.env` file first if one exists. Unset variables keep their default.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse, or a validation message.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        if let Some(v) = env_value("MAX_RUNNING_JOBS")? {
            cfg.max_running_jobs = v;
        }
        if let Some(v) = env_value("MAX_WAITING_JOBS")? {
            cfg.max_waiting_jobs = v;
        }
        if let Some(v) = env_value("WORKER_IDLE_TIMEOUT_SECS")? {
            cfg.worker_idle_timeout_secs = v;
        }
        if let Some(v) = env_value("TIMEOUT_SECS")? {
            cfg.timeout_secs = v;
        }
        if let Some(v) = env_value("ABANDONED_TIMEOUT_SECS")? {
            cfg.abandoned_timeout_secs = v;
        }
        if let Some(v) = env_value("OLD_FILE_CLEANUP")? {
            cfg.old_file_cleanup = v;
        }
        if let Some(v) = env_value("OLD_FILE_CLEANUP_INTERVAL_SECS")? {
            cfg.old_file_cleanup_interval_secs = v;
        }
        if let Some(v) = env_value("CLUSTERED")? {
            cfg.clustered = v;
        }
        if let Some(v) = env_value("RECONCILE_INTERVAL_MS")? {
            cfg.reconcile_interval_ms = v;
        }
        if let Some(v) = env_value("THREAD_STACK_SIZE")? {
            cfg.thread_stack_size = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn env_value<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: Display,
{
    let key = format!("{ENV_PREFIX}{name}");
    match std::env::var(&key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{key}: {e}")),
        Err(_) => Ok(None),
    }
}
