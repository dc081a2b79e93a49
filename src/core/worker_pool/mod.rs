//! Fixed-size worker pool draining the priority work queue.
//!
//! Workers are dedicated OS threads, each with its own single-threaded tokio
//! runtime, so long report renders never block the caller's async runtime.
//! The number of workers is set at construction and never changes.

mod native;

use std::sync::atomic::{AtomicU64, Ordering};

pub use native::{StartHook, WorkerPool};

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Jobs currently executing.
    pub active_jobs: u64,
    /// Items waiting in the work queue.
    pub queued_items: u64,
    /// Jobs that produced a result.
    pub completed_jobs: u64,
    /// Jobs whose work failed or panicked.
    pub failed_jobs: u64,
    /// Jobs cancelled before or during execution.
    pub cancelled_jobs: u64,
    /// Jobs handed to the pool.
    pub submitted_jobs: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_jobs: AtomicU64,
    pub queued_items: AtomicU64,
    pub completed_jobs: AtomicU64,
    pub failed_jobs: AtomicU64,
    pub cancelled_jobs: AtomicU64,
    pub submitted_jobs: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            queued_items: self.queued_items.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            cancelled_jobs: self.cancelled_jobs.load(Ordering::Relaxed),
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
        }
    }

    pub fn dequeued(&self, n: u64) {
        let _ = self
            .queued_items
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |q| Some(q.saturating_sub(n)));
    }
}
