//! Builder assembling a [`JobScheduler`] from its collaborators.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::{
    submission_time_order, CleanupTask, JobComparator, JobExecutor, JobQueue, JobScheduler,
    SchedulerError,
};
use crate::infra::InMemoryJobQueue;

/// Collects configuration, queue, executor, comparator and cleanup task, then starts a scheduler.
///
/// Only the executor is mandatory. Without a queue the scheduler uses an
/// [`InMemoryJobQueue`]; without a comparator, jobs run in submission order.
#[derive(Default)]
pub struct SchedulerBuilder {
    config: Option<SchedulerConfig>,
    queue: Option<Arc<dyn JobQueue>>,
    executor: Option<Arc<dyn JobExecutor>>,
    comparator: Option<JobComparator>,
    cleanup: Option<Arc<dyn CleanupTask>>,
}

impl SchedulerBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler configuration (defaults if never set).
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Shared job queue.
    #[must_use]
    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Job executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn JobExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Ordering of queued jobs on the worker pool.
    #[must_use]
    pub fn with_comparator(mut self, comparator: JobComparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Periodic cleanup of old report files, run when `old_file_cleanup` is enabled.
    #[must_use]
    pub fn with_cleanup(mut self, cleanup: Arc<dyn CleanupTask>) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    /// Validate and start the scheduler.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` without an executor, or any error of [`JobScheduler::start`].
    pub fn build(self) -> Result<JobScheduler, SchedulerError> {
        let executor = self
            .executor
            .ok_or_else(|| SchedulerError::InvalidConfig("a job executor is required".into()))?;
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryJobQueue::new()));
        JobScheduler::start(
            self.config.unwrap_or_default(),
            queue,
            executor,
            self.comparator.unwrap_or_else(submission_time_order),
            self.cleanup,
        )
    }
}
