//! The job scheduler: admission, local execution, cancellation, status, and background timers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::reconcile;
use crate::core::tracker::TrackerGuard;
use crate::core::work_queue::JobComparator;
use crate::core::worker_pool::{PoolStats, StartHook};
use crate::core::{
    CleanupTask, JobEntry, JobExecutor, JobQueue, JobState, JobStatus, SchedulerError,
    SubmissionTracker, WorkerPool,
};

/// Reason recorded when a client cancels a job.
pub const CANCEL_REASON: &str = "task cancelled";
/// Reason recorded when the scheduler cancels a job for timeout or abandonment.
pub const TIMEOUT_REASON: &str = "task cancelled (timeout)";

const REGISTRY_THREAD_NAME: &str = "report-registry";
const CLEANUP_THREAD_NAME: &str = "report-cleanup";

/// State shared between the public API and the background timers.
pub(crate) struct SchedulerInner {
    pub(crate) config: SchedulerConfig,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) pool: WorkerPool,
    pub(crate) tracker: SubmissionTracker,
    pub(crate) shutdown: AtomicBool,
}

impl SchedulerInner {
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Hand a recorded job to the worker pool and track it.
    pub(crate) fn execute_job(&self, entry: JobEntry) -> Result<(), SchedulerError> {
        let mut tracker = self.tracker.lock();
        self.schedule_locked(&mut tracker, entry)
    }

    pub(crate) fn schedule_locked(
        &self,
        tracker: &mut TrackerGuard<'_>,
        entry: JobEntry,
    ) -> Result<(), SchedulerError> {
        let handle = self.pool.submit(entry)?;
        if let Some(stale) = tracker.insert(handle) {
            warn!(reference_id = %stale.entry().reference_id, "replaced a stale in-flight record");
        }
        Ok(())
    }

    /// If this node holds `reference_id`, cancel its handle, forget it, and
    /// finalize the shared record as `CANCELED`. Returns whether it was held.
    pub(crate) fn cancel_held(
        &self,
        tracker: &mut TrackerGuard<'_>,
        reference_id: &str,
        reason: &str,
    ) -> Result<bool, SchedulerError> {
        let Some(record) = tracker.remove(reference_id) else {
            return Ok(false);
        };
        if !record.handle().cancel() {
            info!(reference_id, "could not cancel job, it had already finished");
        }
        self.queue.cancel(reference_id, reason, true)?;
        Ok(true)
    }
}

/// Accepts report jobs, runs them on a bounded worker pool, and keeps the
/// shared job queue in sync with what actually happened.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use report_scheduler::builders::SchedulerBuilder;
/// use report_scheduler::config::SchedulerConfig;
/// use report_scheduler::core::JobEntry;
/// use report_scheduler::infra::InMemoryJobQueue;
///
/// let scheduler = SchedulerBuilder::new()
///     .with_config(SchedulerConfig::new().with_max_running_jobs(4))
///     .with_queue(Arc::new(InMemoryJobQueue::new()))
///     .with_executor(Arc::new(my_renderer))
///     .build()?;
///
/// let entry = JobEntry::new(serde_json::json!({ "layout": "A4 portrait" })).with_access_token("alice");
/// let id = entry.reference_id.clone();
/// scheduler.submit(entry)?;
/// let status = scheduler.get_status(&id, Some("alice"))?;
/// ```
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
    stop_tx: Mutex<Option<Sender<()>>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Validate the configuration against the queue, start the worker pool,
    /// the reconciliation timer and, if enabled, the cleanup timer.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when a value is invalid or a timeout is not strictly
    /// shorter than the queue's retention horizon; `Backend` if a thread cannot be spawned.
    pub fn start(
        config: SchedulerConfig,
        queue: Arc<dyn JobQueue>,
        executor: Arc<dyn JobExecutor>,
        comparator: JobComparator,
        cleanup: Option<Arc<dyn CleanupTask>>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        config
            .validate_against_retention(queue.retention_horizon_ms())
            .map_err(SchedulerError::InvalidConfig)?;

        let start_hook = if config.clustered {
            None
        } else {
            Some(mark_running_hook(Arc::clone(&queue)))
        };
        let pool = WorkerPool::new(config.worker_pool_config(), executor, comparator, start_hook)?;

        let inner = Arc::new(SchedulerInner {
            config,
            queue,
            pool,
            tracker: SubmissionTracker::new(),
            shutdown: AtomicBool::new(false),
        });

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let mut timers = vec![spawn_registry_timer(Arc::clone(&inner), stop_rx.clone())?];

        if inner.config.old_file_cleanup {
            match cleanup {
                Some(task) => timers.push(spawn_cleanup_timer(
                    task,
                    inner.config.old_file_cleanup_interval(),
                    stop_rx,
                )?),
                None => debug!("old file cleanup enabled but no cleanup task configured"),
            }
        }

        info!(
            max_running_jobs = inner.config.max_running_jobs,
            max_waiting_jobs = inner.config.max_waiting_jobs,
            clustered = inner.config.clustered,
            "job scheduler started"
        );

        Ok(Self {
            inner,
            stop_tx: Mutex::new(Some(stop_tx)),
            timers: Mutex::new(timers),
        })
    }

    /// Record a job in the shared queue and, unless clustered, schedule it locally.
    ///
    /// Nothing is scheduled when admission fails or the job could not be recorded;
    /// a job this node runs always has a shared record to report its outcome to.
    ///
    /// # Errors
    ///
    /// `AccessDenied` for a blank owner token, `CapacityExceeded` when the
    /// waiting-job ceiling is reached, `PoolShutdown` after shutdown, or the
    /// shared queue's error when recording fails.
    pub fn submit(&self, entry: JobEntry) -> Result<(), SchedulerError> {
        if self.inner.is_shutdown() {
            return Err(SchedulerError::PoolShutdown);
        }
        entry.validate_access_token()?;

        let waiting = self.inner.queue.waiting_jobs_count()?;
        let max = self.inner.config.max_waiting_jobs;
        if waiting >= max {
            warn!(
                reference_id = %entry.reference_id,
                waiting,
                max,
                "max. number of waiting jobs exceeded"
            );
            return Err(SchedulerError::CapacityExceeded { waiting, max });
        }

        let reference_id = entry.reference_id.clone();
        self.inner.queue.add(entry.clone())?;
        info!(reference_id = %reference_id, "submitted job");

        if !self.inner.config.clustered {
            if let Err(e) = self.inner.execute_job(entry) {
                // Nobody will ever run it; don't leave a WAITING record behind.
                if let Err(cancel_err) = self.inner.queue.cancel(&reference_id, CANCEL_REASON, true) {
                    warn!(reference_id = %reference_id, error = %cancel_err, "failed to cancel unscheduled job");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Cancel a job.
    ///
    /// The shared record goes to `CANCELING` first. If this node holds the job,
    /// its handle is cancelled and the record is finalized as `CANCELED`;
    /// otherwise whichever node holds it finishes the transition.
    ///
    /// # Errors
    ///
    /// `NoSuchReference` for unknown jobs, `AccessDenied` for a wrong credential.
    pub fn cancel(&self, reference_id: &str, credential: Option<&str>) -> Result<(), SchedulerError> {
        let status = self.inner.queue.get(reference_id, false)?;
        status.entry.assert_access(credential)?;

        let mut tracker = self.inner.tracker.lock();
        if let Some(record) = tracker.get(reference_id) {
            record.entry().assert_access(credential)?;
        }
        self.inner.queue.cancel(reference_id, CANCEL_REASON, false)?;
        if self.inner.cancel_held(&mut tracker, reference_id, CANCEL_REASON)? {
            info!(reference_id, "cancelled job");
        } else {
            info!(reference_id, "job not held by this node, left in CANCELING");
        }
        Ok(())
    }

    /// Current status of a job. Counts as a client status check.
    ///
    /// For a `WAITING` job, `waiting_time_ms` carries an advisory estimate that
    /// assumes uniform job durations and ignores the priority comparator.
    ///
    /// # Errors
    ///
    /// `NoSuchReference` for unknown jobs, `AccessDenied` for a wrong credential.
    pub fn get_status(
        &self,
        reference_id: &str,
        credential: Option<&str>,
    ) -> Result<JobStatus, SchedulerError> {
        let mut status = self.inner.queue.get(reference_id, true)?;
        status.entry.assert_access(credential)?;

        if status.state == JobState::Waiting {
            let finished = self.inner.queue.last_completed_count()?;
            let average_ms = self.inner.queue.average_duration_ms()?;
            status.waiting_time_ms = estimate_wait_ms(
                status.request_count,
                finished,
                self.inner.config.max_running_jobs as u64,
                average_ms,
            );
        }
        Ok(status)
    }

    /// Run one reconciliation pass now, on the calling thread.
    pub fn reconcile_now(&self) {
        reconcile::run_pass(&self.inner);
    }

    /// Jobs this node currently holds.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Worker pool statistics.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// The shared queue this scheduler reports to.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.inner.queue
    }

    /// Whether `shutdown` was called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    /// Stop the timers and the worker pool. Further submissions fail with `PoolShutdown`.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(self.stop_tx.lock().take());
        for timer in self.timers.lock().drain(..) {
            if timer.join().is_err() {
                warn!("scheduler timer thread panicked");
            }
        }
        self.inner.pool.shutdown();
        info!("job scheduler shut down");
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        // Stop the timers without joining; they release the pool on exit.
        if !self.inner.shutdown.swap(true, Ordering::AcqRel) {
            drop(self.stop_tx.get_mut().take());
            debug!("job scheduler dropped without explicit shutdown");
        }
    }
}

/// `max(0, ((requests - finished) - capacity) / capacity * average)`.
pub(crate) fn estimate_wait_ms(
    request_count: u64,
    finished: u64,
    capacity: u64,
    average_ms: u64,
) -> u64 {
    let capacity = capacity.max(1);
    let running_or_queued = request_count.saturating_sub(finished);
    let in_queue = running_or_queued.saturating_sub(capacity);
    (in_queue / capacity).saturating_mul(average_ms)
}

fn mark_running_hook(queue: Arc<dyn JobQueue>) -> StartHook {
    Arc::new(move |entry: &JobEntry| {
        match queue.start(&entry.reference_id) {
            Ok(()) => {}
            Err(SchedulerError::NoSuchReference(_)) => error!(
                reference_id = %entry.reference_id,
                "tried to mark non-existing job as running"
            ),
            Err(e) => error!(
                reference_id = %entry.reference_id,
                error = %e,
                "failed to mark job as running"
            ),
        }
    })
}

fn spawn_registry_timer(
    inner: Arc<SchedulerInner>,
    stop: Receiver<()>,
) -> Result<JoinHandle<()>, SchedulerError> {
    let ticker = crossbeam_channel::tick(inner.config.reconcile_interval());
    thread::Builder::new()
        .name(REGISTRY_THREAD_NAME.into())
        .spawn(move || {
            loop {
                crossbeam_channel::select! {
                    recv(stop) -> _ => break,
                    recv(ticker) -> _ => reconcile::run_pass(&inner),
                }
            }
            debug!("registry timer stopped");
        })
        .map_err(|e| SchedulerError::Backend(format!("failed to spawn registry timer: {e}")))
}

fn spawn_cleanup_timer(
    task: Arc<dyn CleanupTask>,
    interval: Duration,
    stop: Receiver<()>,
) -> Result<JoinHandle<()>, SchedulerError> {
    thread::Builder::new()
        .name(CLEANUP_THREAD_NAME.into())
        .spawn(move || {
            run_cleanup(task.as_ref());
            let ticker = crossbeam_channel::tick(interval);
            loop {
                crossbeam_channel::select! {
                    recv(stop) -> _ => break,
                    recv(ticker) -> _ => run_cleanup(task.as_ref()),
                }
            }
            debug!("cleanup timer stopped");
        })
        .map_err(|e| SchedulerError::Backend(format!("failed to spawn cleanup timer: {e}")))
}

fn run_cleanup(task: &dyn CleanupTask) {
    match task.run() {
        Ok(removed) => info!(removed, "old report files cleaned up"),
        Err(e) => error!(error = %e, "old report file cleanup failed"),
    }
}
