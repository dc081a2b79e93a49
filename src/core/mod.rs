//! Core scheduling abstractions: job model, worker pool, tracker, and reconciliation.

pub mod error;
pub mod executor;
pub mod handle;
pub mod job;
pub mod queue;
mod reconcile;
pub mod scheduler;
pub mod tracker;
pub mod work_queue;
pub mod worker_pool;

pub use error::{AppResult, JobFailure, SchedulerError};
pub use executor::{CancellationToken, JobExecutor};
pub use handle::{HandleOutcome, JobHandle};
pub use job::{JobEntry, JobResult, JobState, JobStatus};
pub use queue::{CleanupTask, JobQueue};
pub use scheduler::{JobScheduler, CANCEL_REASON, TIMEOUT_REASON};
pub use tracker::{InFlightRecord, SubmissionTracker, TrackerGuard};
pub use work_queue::{submission_time_order, JobComparator, PriorityWorkQueue, WorkItem};
pub use worker_pool::{PoolStats, StartHook, WorkerPool};
