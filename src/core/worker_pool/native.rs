//! Native implementation of `WorkerPool` using OS threads.
//!
//! # Design Principles
//!
//! - **No polling**: idle workers park on a Condvar paired with the work queue
//! - **Priority drain**: every worker pops the highest-priority item under the queue lock
//! - **Cooperative cancellation**: a job's future races its handle's cancellation token
//! - **Clean shutdown**: the shutdown flag plus `notify_all` unblocks idle workers

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::work_queue::{Housekeeping, JobComparator, PriorityWorkQueue, WorkItem};
use crate::core::{HandleOutcome, JobEntry, JobExecutor, JobFailure, JobHandle, SchedulerError};

use super::{PoolCounters, PoolStats};

/// Called on the worker thread right before a job starts executing.
pub type StartHook = Arc<dyn Fn(&JobEntry) + Send + Sync>;

/// How long `shutdown` waits for each worker to exit.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct PoolShared {
    queue: Mutex<PriorityWorkQueue>,
    available: Condvar,
    shutdown: AtomicBool,
    counters: PoolCounters,
    executor: Arc<dyn JobExecutor>,
    start_hook: Option<StartHook>,
}

/// Worker pool with a fixed number of dedicated OS threads.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `config.worker_count` workers draining a queue ordered by `comparator`.
    ///
    /// `start_hook`, when given, runs on the worker thread immediately before
    /// each job begins. It must not panic.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a bad configuration, `Backend` if a thread cannot be spawned.
    pub fn new(
        config: WorkerPoolConfig,
        executor: Arc<dyn JobExecutor>,
        comparator: JobComparator,
        start_hook: Option<StartHook>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PriorityWorkQueue::new(comparator)),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            counters: PoolCounters::default(),
            executor,
            start_hook,
        });

        let pool = Self {
            config,
            shared,
            workers: Mutex::new(Vec::new()),
        };

        for worker_id in 0..pool.config.worker_count {
            let worker = spawn_worker(worker_id, &pool.config, Arc::clone(&pool.shared))
                .map_err(|e| {
                    pool.signal_shutdown();
                    SchedulerError::Backend(format!("failed to spawn worker {worker_id}: {e}"))
                })?;
            pool.workers.lock().push(worker);
        }

        info!(
            worker_count = pool.config.worker_count,
            "worker pool started"
        );
        Ok(pool)
    }

    /// Queue a job and return its handle.
    ///
    /// # Errors
    ///
    /// `PoolShutdown` once the pool stopped accepting work.
    pub fn submit(&self, entry: JobEntry) -> Result<JobHandle, SchedulerError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::PoolShutdown);
        }
        let handle = JobHandle::new(entry);
        {
            let mut queue = self.shared.queue.lock();
            queue.push_job(handle.clone());
        }
        self.shared.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
        self.shared.counters.queued_items.fetch_add(1, Ordering::Relaxed);
        self.shared.available.notify_one();
        debug!(reference_id = %handle.reference_id(), "job queued on worker pool");
        Ok(handle)
    }

    /// Queue an internal task. It runs ahead of every queued job.
    ///
    /// # Errors
    ///
    /// `PoolShutdown` once the pool stopped accepting work.
    pub(crate) fn execute_housekeeping<F>(&self, task: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::PoolShutdown);
        }
        self.shared.queue.lock().push_housekeeping(Box::new(task));
        self.shared.counters.queued_items.fetch_add(1, Ordering::Relaxed);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Drop cancelled handles still sitting in the work queue. Returns how many.
    pub fn purge(&self) -> usize {
        purge_queue(&self.shared)
    }

    /// Purge on the next free worker, ahead of every queued job.
    ///
    /// # Errors
    ///
    /// `PoolShutdown` once the pool stopped accepting work.
    pub fn schedule_purge(&self) -> Result<(), SchedulerError> {
        let shared = Arc::downgrade(&self.shared);
        self.execute_housekeeping(move || {
            if let Some(shared) = shared.upgrade() {
                purge_queue(&shared);
            }
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Whether `shutdown` was called or the pool was dropped.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.counters.snapshot(self.config.worker_count)
    }

    /// Shut down the pool gracefully.
    ///
    /// Queued jobs are marked interrupted and never start. Running jobs are left
    /// to finish; each worker gets a bounded time to exit and is detached after that.
    pub fn shutdown(&self) {
        if !self.signal_shutdown() {
            return;
        }

        info!("shutting down worker pool");

        let mut workers = self.workers.lock();
        let worker_count = workers.len();

        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = crossbeam_channel::bounded(1);
            let join_thread = thread::spawn(move || {
                let joined = worker.join().is_ok();
                let _ = tx.send(joined);
            });

            match rx.recv_timeout(WORKER_JOIN_TIMEOUT) {
                Ok(true) => debug!(worker_id = idx, "worker joined"),
                Ok(false) => warn!(worker_id = idx, "worker panicked"),
                Err(_) => {
                    warn!(worker_id = idx, "worker did not exit within timeout, detaching");
                    continue;
                }
            }
            let _ = join_thread.join();
        }

        info!(worker_count, "worker pool shut down");
    }

    /// Flag shutdown, interrupt queued work and wake idle workers.
    /// Returns `false` if shutdown had already been signalled.
    fn signal_shutdown(&self) -> bool {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        let pending = self.shared.queue.lock().drain();
        self.shared.counters.dequeued(pending.len() as u64);
        for item in pending {
            if let WorkItem::Job(handle) = item {
                handle.finish(HandleOutcome::Interrupted);
            }
        }
        self.shared.available.notify_all();
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Don't join here; explicit shutdown() is required for graceful cleanup.
        if self.signal_shutdown() {
            debug!("worker pool dropped without explicit shutdown, workers detached");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.config.worker_count)
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

fn purge_queue(shared: &PoolShared) -> usize {
    let removed = shared.queue.lock().purge();
    if removed > 0 {
        shared.counters.dequeued(removed as u64);
        shared
            .counters
            .cancelled_jobs
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(removed, "purged cancelled jobs from work queue");
    }
    removed
}

fn build_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

/// Spawn a worker thread.
fn spawn_worker(
    worker_id: usize,
    config: &WorkerPoolConfig,
    shared: Arc<PoolShared>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{}{worker_id}", config.thread_name_prefix))
        .stack_size(config.thread_stack_size)
        .spawn(move || worker_loop(worker_id, &shared))
}

fn worker_loop(worker_id: usize, shared: &PoolShared) {
    debug!(worker_id, "worker thread started");

    let mut rt = match build_runtime() {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker_id, error = %e, "failed to create worker runtime");
            return;
        }
    };

    while let Some(item) = next_item(shared) {
        shared.counters.dequeued(1);
        match item {
            WorkItem::Housekeeping(task) => run_housekeeping(worker_id, task),
            WorkItem::Job(handle) => {
                if !run_job(worker_id, shared, &rt, &handle) {
                    // A panic escaped block_on; start over with a fresh runtime.
                    rt = match build_runtime() {
                        Ok(rt) => rt,
                        Err(e) => {
                            error!(worker_id, error = %e, "failed to rebuild worker runtime");
                            return;
                        }
                    };
                }
            }
        }
    }

    debug!(worker_id, "worker thread exiting");
}

/// Block until an item is available. `None` on shutdown.
fn next_item(shared: &PoolShared) -> Option<WorkItem> {
    let mut queue = shared.queue.lock();
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return None;
        }
        if let Some(item) = queue.pop() {
            return Some(item);
        }
        shared.available.wait(&mut queue);
    }
}

fn run_housekeeping(worker_id: usize, task: Housekeeping) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!(worker_id, "housekeeping task panicked");
    }
}

/// Execute one job. Returns `false` if the runtime must be rebuilt.
fn run_job(worker_id: usize, shared: &PoolShared, rt: &Runtime, handle: &JobHandle) -> bool {
    if !handle.begin() {
        debug!(worker_id, reference_id = %handle.reference_id(), "skipping cancelled job");
        shared.counters.cancelled_jobs.fetch_add(1, Ordering::Relaxed);
        return true;
    }

    if let Some(hook) = &shared.start_hook {
        hook(handle.entry());
    }

    shared.counters.active_jobs.fetch_add(1, Ordering::Relaxed);
    debug!(worker_id, reference_id = %handle.reference_id(), "worker executing job");

    let token = handle.cancellation_token();
    let executor = Arc::clone(&shared.executor);
    let entry = handle.entry().clone();

    let run = panic::catch_unwind(AssertUnwindSafe(|| {
        rt.block_on(async {
            tokio::select! {
                biased;
                () = token.cancelled() => None,
                result = executor.execute(entry, token.clone()) => Some(result),
            }
        })
    }));

    shared.counters.active_jobs.fetch_sub(1, Ordering::Relaxed);

    let (outcome, healthy) = match run {
        Ok(Some(Ok(result))) => (HandleOutcome::Completed(result), true),
        Ok(Some(Err(failure))) => (HandleOutcome::Failed(failure), true),
        Ok(None) => (HandleOutcome::Cancelled, true),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(worker_id, reference_id = %handle.reference_id(), panic = %message, "job panicked");
            (
                HandleOutcome::Failed(JobFailure::new(format!("job panicked: {message}"))),
                false,
            )
        }
    };

    let counter = match &outcome {
        HandleOutcome::Completed(_) => &shared.counters.completed_jobs,
        HandleOutcome::Failed(_) => &shared.counters.failed_jobs,
        HandleOutcome::Cancelled | HandleOutcome::Interrupted => &shared.counters.cancelled_jobs,
    };
    counter.fetch_add(1, Ordering::Relaxed);

    if !handle.finish(outcome) {
        debug!(worker_id, reference_id = %handle.reference_id(), "job finished after cancellation");
    }
    debug!(worker_id, reference_id = %handle.reference_id(), "worker completed job");
    healthy
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::work_queue::submission_time_order;
    use crate::core::{CancellationToken, JobResult};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Sleeps for `params.sleep_ms`, fails on `params.fail`, panics on `params.panic`.
    #[derive(Clone, Default)]
    struct TestExecutor {
        execution_count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobExecutor for TestExecutor {
        async fn execute(
            &self,
            entry: JobEntry,
            _cancel: CancellationToken,
        ) -> Result<JobResult, JobFailure> {
            self.execution_count.fetch_add(1, Ordering::Relaxed);
            let sleep_ms = entry.params["sleep_ms"].as_u64().unwrap_or(10);
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            if entry.params["panic"].as_bool().unwrap_or(false) {
                panic!("renderer exploded");
            }
            if entry.params["fail"].as_bool().unwrap_or(false) {
                return Err(JobFailure::new("bad template"));
            }
            Ok(JobResult::new(
                format!("/reports/{}", entry.reference_id),
                "report.pdf",
                "application/pdf",
            ))
        }
    }

    fn entry(id: &str, params: serde_json::Value) -> JobEntry {
        JobEntry::with_reference_id(id, crate::util::clock::now_ms(), params)
    }

    fn pool(workers: usize, executor: TestExecutor, hook: Option<StartHook>) -> WorkerPool {
        WorkerPool::new(
            WorkerPoolConfig::new().with_worker_count(workers),
            Arc::new(executor),
            submission_time_order(),
            hook,
        )
        .unwrap()
    }

    #[test]
    fn test_worker_pool_basic() {
        let executor = TestExecutor::default();
        let pool = pool(2, executor.clone(), None);

        let handle = pool.submit(entry("a", serde_json::json!({}))).unwrap();
        match handle.wait(Duration::from_secs(5)) {
            Some(HandleOutcome::Completed(r)) => assert_eq!(r.report_uri, "/reports/a"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(executor.execution_count.load(Ordering::Relaxed), 1);

        let stats = pool.stats();
        assert_eq!(stats.submitted_jobs, 1);
        assert_eq!(stats.completed_jobs, 1);
        pool.shutdown();
    }

    #[test]
    fn test_failure_and_panic_become_failed_outcomes() {
        let pool = pool(1, TestExecutor::default(), None);
        let failing = pool.submit(entry("f", serde_json::json!({ "fail": true }))).unwrap();
        let panicking = pool.submit(entry("p", serde_json::json!({ "panic": true }))).unwrap();
        let after = pool.submit(entry("ok", serde_json::json!({}))).unwrap();

        assert!(matches!(
            failing.wait(Duration::from_secs(5)),
            Some(HandleOutcome::Failed(f)) if f.root_cause() == "bad template"
        ));
        assert!(matches!(
            panicking.wait(Duration::from_secs(5)),
            Some(HandleOutcome::Failed(f)) if f.message().contains("renderer exploded")
        ));
        // The single worker survives the panic.
        assert!(matches!(
            after.wait(Duration::from_secs(5)),
            Some(HandleOutcome::Completed(_))
        ));
        assert_eq!(pool.stats().failed_jobs, 2);
        pool.shutdown();
    }

    #[test]
    fn test_cancelled_handle_never_starts() {
        let executor = TestExecutor::default();
        let started = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen = Arc::clone(&started);
        let hook: StartHook = Arc::new(move |e: &JobEntry| seen.lock().push(e.reference_id.clone()));
        let pool = pool(1, executor.clone(), Some(hook));

        let blocker = pool.submit(entry("blocker", serde_json::json!({ "sleep_ms": 200 }))).unwrap();
        let victim = pool.submit(entry("victim", serde_json::json!({}))).unwrap();
        assert!(victim.cancel());

        assert!(blocker.wait(Duration::from_secs(5)).is_some());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(*started.lock(), vec!["blocker".to_string()]);
        assert_eq!(executor.execution_count.load(Ordering::Relaxed), 1);
        pool.shutdown();
    }

    #[test]
    fn test_cancel_interrupts_running_job() {
        let pool = pool(1, TestExecutor::default(), None);
        let long = pool.submit(entry("long", serde_json::json!({ "sleep_ms": 60_000 }))).unwrap();
        while !long.is_started() {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(long.cancel());

        // The worker is free again well before the job's own sleep ends.
        let next = pool.submit(entry("next", serde_json::json!({}))).unwrap();
        assert!(matches!(
            next.wait(Duration::from_secs(5)),
            Some(HandleOutcome::Completed(_))
        ));
        pool.shutdown();
    }

    #[test]
    fn test_housekeeping_runs_before_queued_jobs() {
        let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let seen = Arc::clone(&order);
        let hook: StartHook = Arc::new(move |_: &JobEntry| seen.lock().push("job"));
        let pool = pool(1, TestExecutor::default(), Some(hook));

        let _blocker = pool.submit(entry("blocker", serde_json::json!({ "sleep_ms": 100 }))).unwrap();
        while pool.stats().active_jobs == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        let queued = pool.submit(entry("queued", serde_json::json!({}))).unwrap();
        let seen = Arc::clone(&order);
        pool.execute_housekeeping(move || seen.lock().push("housekeeping")).unwrap();

        assert!(queued.wait(Duration::from_secs(5)).is_some());
        assert_eq!(*order.lock(), vec!["job", "housekeeping", "job"]);
        pool.shutdown();
    }

    #[test]
    fn test_scheduled_purge_drops_cancelled_jobs() {
        let started = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen = Arc::clone(&started);
        let hook: StartHook = Arc::new(move |e: &JobEntry| seen.lock().push(e.reference_id.clone()));
        let pool = pool(1, TestExecutor::default(), Some(hook));

        let _blocker = pool.submit(entry("blocker", serde_json::json!({ "sleep_ms": 100 }))).unwrap();
        while pool.stats().active_jobs == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        let first = pool.submit(entry("first", serde_json::json!({}))).unwrap();
        let second = pool.submit(entry("second", serde_json::json!({}))).unwrap();
        assert!(first.cancel());
        assert!(second.cancel());
        pool.schedule_purge().unwrap();
        let after = pool.submit(entry("after", serde_json::json!({}))).unwrap();

        assert!(matches!(
            after.wait(Duration::from_secs(5)),
            Some(HandleOutcome::Completed(_))
        ));
        let stats = pool.stats();
        assert_eq!(stats.cancelled_jobs, 2);
        assert_eq!(stats.queued_items, 0);
        assert_eq!(*started.lock(), vec!["blocker".to_string(), "after".to_string()]);
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_interrupts_queued_jobs() {
        let pool = pool(1, TestExecutor::default(), None);
        let _running = pool.submit(entry("running", serde_json::json!({ "sleep_ms": 100 }))).unwrap();
        let queued = pool.submit(entry("queued", serde_json::json!({}))).unwrap();
        pool.shutdown();

        assert!(matches!(queued.outcome(), Some(HandleOutcome::Interrupted)));
        assert!(matches!(
            pool.submit(entry("late", serde_json::json!({}))),
            Err(SchedulerError::PoolShutdown)
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = WorkerPool::new(
            WorkerPoolConfig::new().with_worker_count(0),
            Arc::new(TestExecutor::default()),
            submission_time_order(),
            None,
        );
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }
}
