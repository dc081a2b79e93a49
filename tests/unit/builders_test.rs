//! Tests for builder modules

use std::sync::Arc;

use async_trait::async_trait;
use report_scheduler::builders::SchedulerBuilder;
use report_scheduler::config::SchedulerConfig;
use report_scheduler::core::{
    CancellationToken, JobEntry, JobExecutor, JobFailure, JobResult, SchedulerError,
};
use report_scheduler::infra::InMemoryJobQueue;

struct NoopExecutor;

#[async_trait]
impl JobExecutor for NoopExecutor {
    async fn execute(
        &self,
        entry: JobEntry,
        _cancel: CancellationToken,
    ) -> Result<JobResult, JobFailure> {
        Ok(JobResult::new(entry.reference_id, "report.pdf", "application/pdf"))
    }
}

fn small_config() -> SchedulerConfig {
    SchedulerConfig::new()
        .with_max_running_jobs(1)
        .with_old_file_cleanup(false)
}

#[test]
fn test_builder_defaults_to_in_memory_queue() {
    let scheduler = SchedulerBuilder::new()
        .with_config(small_config())
        .with_executor(Arc::new(NoopExecutor))
        .build()
        .unwrap();

    assert_eq!(scheduler.config().max_running_jobs, 1);
    assert_eq!(scheduler.pool_stats().worker_count, 1);
    assert_eq!(scheduler.queue().waiting_jobs_count().unwrap(), 0);
    scheduler.shutdown();
}

#[test]
fn test_builder_rejects_invalid_config() {
    let result = SchedulerBuilder::new()
        .with_config(small_config().with_max_running_jobs(0))
        .with_executor(Arc::new(NoopExecutor))
        .build();
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_builder_accepts_unbounded_retention() {
    let queue = Arc::new(InMemoryJobQueue::new().with_retention(None));
    let scheduler = SchedulerBuilder::new()
        .with_config(small_config().with_timeout_secs(u64::MAX / 2_000))
        .with_queue(queue)
        .with_executor(Arc::new(NoopExecutor))
        .with_comparator(Arc::new(|a: &JobEntry, b: &JobEntry| a.reference_id.cmp(&b.reference_id)))
        .build()
        .unwrap();
    scheduler.shutdown();
}
