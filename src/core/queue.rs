//! Contracts of the scheduler's external collaborators.

use crate::core::{AppResult, JobEntry, JobResult, JobStatus, SchedulerError};

/// The shared, possibly cluster-wide registry of job records.
///
/// The scheduler calls it synchronously and treats every call as fallible:
/// `NoSuchReference` for unknown or expired jobs, anything else as a generic
/// backend failure. Implementations provide their own internal consistency;
/// `start_next` and `cancel` in particular must be atomic.
pub trait JobQueue: Send + Sync {
    /// Record a new `WAITING` job.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn add(&self, entry: JobEntry) -> Result<(), SchedulerError>;

    /// Current status. `external` marks a client status check, which resets
    /// the job's abandonment clock.
    ///
    /// # Errors
    ///
    /// `NoSuchReference` for unknown jobs.
    fn get(&self, reference_id: &str, external: bool) -> Result<JobStatus, SchedulerError>;

    /// Move one job from `WAITING` to `RUNNING`.
    ///
    /// # Errors
    ///
    /// `NoSuchReference`, or `InvalidTransition` if the job is no longer waiting.
    fn start(&self, reference_id: &str) -> Result<(), SchedulerError>;

    /// Claim up to `n` waiting jobs, oldest first, moving them to `RUNNING`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn start_next(&self, n: usize) -> Result<Vec<JobStatus>, SchedulerError>;

    /// Record a successful result.
    ///
    /// # Errors
    ///
    /// `NoSuchReference`, or `InvalidTransition` for an already finished job.
    fn done(&self, reference_id: &str, result: JobResult) -> Result<(), SchedulerError>;

    /// Record a failure with its root cause.
    ///
    /// # Errors
    ///
    /// `NoSuchReference`, or `InvalidTransition` for an already finished job.
    fn fail(&self, reference_id: &str, cause: &str) -> Result<(), SchedulerError>;

    /// Request cancellation. With `immediate` the job ends `CANCELED`, otherwise `CANCELING`.
    ///
    /// # Errors
    ///
    /// `NoSuchReference` for unknown jobs.
    fn cancel(&self, reference_id: &str, reason: &str, immediate: bool) -> Result<(), SchedulerError>;

    /// Cancel, cluster-wide, every unfinished job past `timeout_ms` since submission
    /// or `abandoned_ms` since its last status check. Returns how many were cancelled.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn cancel_old(&self, timeout_ms: u64, abandoned_ms: u64, reason: &str) -> Result<usize, SchedulerError>;

    /// Jobs in `CANCELING` that some node still has to stop.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn to_cancel(&self) -> Result<Vec<JobStatus>, SchedulerError>;

    /// Number of `WAITING` jobs.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn waiting_jobs_count(&self) -> Result<usize, SchedulerError>;

    /// Number of jobs that reached a terminal state so far.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn last_completed_count(&self) -> Result<u64, SchedulerError>;

    /// Average execution time of successful jobs, in milliseconds.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn average_duration_ms(&self) -> Result<u64, SchedulerError>;

    /// Milliseconds since the last client status check of `reference_id`.
    ///
    /// # Errors
    ///
    /// `NoSuchReference` for unknown jobs.
    fn time_since_last_status_check_ms(&self, reference_id: &str) -> Result<u64, SchedulerError>;

    /// How long a record is kept after its last access, in milliseconds. `None` keeps records forever.
    fn retention_horizon_ms(&self) -> Option<u64>;
}

/// Periodic deletion of stale report artifacts.
pub trait CleanupTask: Send + Sync {
    /// Run one cleanup pass and return how many artifacts were removed.
    ///
    /// # Errors
    ///
    /// Any I/O failure that stopped the pass.
    fn run(&self) -> AppResult<usize>;
}
