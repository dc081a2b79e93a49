//! Error types for scheduler operations.

use std::error::Error as StdError;

use thiserror::Error;

use crate::core::job::JobState;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The shared queue already holds the maximum number of waiting jobs.
    #[error("max. number of waiting jobs exceeded: {waiting} waiting, limit {max}")]
    CapacityExceeded {
        /// Waiting jobs observed at admission time.
        waiting: usize,
        /// Configured ceiling.
        max: usize,
    },
    /// The reference id is unknown to the shared queue or has expired.
    #[error("no such reference: {0}")]
    NoSuchReference(String),
    /// The caller's credential does not match the job's owner token.
    #[error("access denied to job {0}")]
    AccessDenied(String),
    /// The shared queue refused a lifecycle transition.
    #[error("job {reference_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Job the transition was requested for.
        reference_id: String,
        /// Current state.
        from: JobState,
        /// Requested state.
        to: JobState,
    },
    /// Startup configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The worker pool no longer accepts work.
    #[error("worker pool has been shut down")]
    PoolShutdown,
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Failure raised by a job's own work.
///
/// Recorded against the job as an `ERROR` status; never surfaced as a scheduler error.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct JobFailure {
    message: String,
    root_cause: String,
}

impl JobFailure {
    /// Failure with no underlying cause.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            root_cause: message.clone(),
            message,
        }
    }

    /// Failure wrapping an error chain; the innermost error becomes the root cause.
    pub fn with_source(message: impl Into<String>, source: &(dyn StdError + 'static)) -> Self {
        let mut root: &(dyn StdError + 'static) = source;
        while let Some(next) = root.source() {
            root = next;
        }
        Self {
            message: message.into(),
            root_cause: root.to_string(),
        }
    }

    /// Top-level message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Innermost cause, as stored in the shared queue.
    #[must_use]
    pub fn root_cause(&self) -> &str {
        &self.root_cause
    }
}

impl From<anyhow::Error> for JobFailure {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            root_cause: err.root_cause().to_string(),
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
