//! Cancellable execution handle returned when a job is scheduled on the worker pool.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

use crate::core::{JobEntry, JobFailure, JobResult};

/// How a handle finished.
#[derive(Debug, Clone)]
pub enum HandleOutcome {
    /// The job produced a result.
    Completed(JobResult),
    /// The job's own work failed.
    Failed(JobFailure),
    /// Cancelled before or during execution.
    Cancelled,
    /// Abandoned by a pool shutdown. Not a terminal job outcome.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Running,
    Finished,
}

struct HandleState {
    phase: Phase,
    started: bool,
    outcome: Option<HandleOutcome>,
}

struct HandleInner {
    entry: JobEntry,
    token: CancellationToken,
    state: Mutex<HandleState>,
    finished: Condvar,
}

/// Shared handle on one scheduled job.
///
/// Cloning is cheap; every clone observes the same state. A handle finishes
/// exactly once: whichever of completion, failure, cancellation or
/// interruption happens first wins and later outcomes are discarded.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<HandleInner>,
}

impl JobHandle {
    pub(crate) fn new(entry: JobEntry) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                entry,
                token: CancellationToken::new(),
                state: Mutex::new(HandleState {
                    phase: Phase::Queued,
                    started: false,
                    outcome: None,
                }),
                finished: Condvar::new(),
            }),
        }
    }

    /// The job this handle runs.
    #[must_use]
    pub fn entry(&self) -> &JobEntry {
        &self.inner.entry
    }

    /// Reference id of the job.
    #[must_use]
    pub fn reference_id(&self) -> &str {
        &self.inner.entry.reference_id
    }

    /// Request cooperative cancellation.
    ///
    /// A queued handle will never start; a running one is signalled through its
    /// token and reported as cancelled immediately, even though the worker may
    /// keep running until the job reaches its next await point.
    /// Returns `false` if the handle had already finished.
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Finished {
            return false;
        }
        self.inner.token.cancel();
        state.phase = Phase::Finished;
        state.outcome = Some(HandleOutcome::Cancelled);
        self.inner.finished.notify_all();
        true
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Whether a worker picked the handle up.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.state.lock().started
    }

    /// Whether an outcome is available.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().phase == Phase::Finished
    }

    /// The outcome, once finished.
    #[must_use]
    pub fn outcome(&self) -> Option<HandleOutcome> {
        self.inner.state.lock().outcome.clone()
    }

    /// Block until the handle finishes or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Option<HandleOutcome> {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Finished {
            let _ = self
                .inner
                .finished
                .wait_while_for(&mut state, |s| s.phase != Phase::Finished, timeout);
        }
        state.outcome.clone()
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Move from queued to running. `false` if the handle was cancelled first.
    pub(crate) fn begin(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Queued || self.inner.token.is_cancelled() {
            return false;
        }
        state.phase = Phase::Running;
        state.started = true;
        true
    }

    /// Record the outcome unless one was already recorded.
    pub(crate) fn finish(&self, outcome: HandleOutcome) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Finished {
            return false;
        }
        state.phase = Phase::Finished;
        state.outcome = Some(outcome);
        self.inner.finished.notify_all();
        true
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("JobHandle")
            .field("reference_id", &self.inner.entry.reference_id)
            .field("phase", &state.phase)
            .field("cancelled", &self.inner.token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> JobHandle {
        JobHandle::new(JobEntry::with_reference_id("ref-1", 0, serde_json::Value::Null))
    }

    #[test]
    fn test_cancel_before_start_prevents_begin() {
        let h = handle();
        assert!(h.cancel());
        assert!(!h.begin());
        assert!(h.is_finished());
        assert!(!h.is_started());
        assert!(matches!(h.outcome(), Some(HandleOutcome::Cancelled)));
    }

    #[test]
    fn test_started_survives_finish() {
        let h = handle();
        assert!(!h.is_started());
        assert!(h.begin());
        assert!(h.finish(HandleOutcome::Completed(JobResult::new("u", "f", "m"))));
        assert!(h.is_started());
        assert!(!h.begin());
    }

    #[test]
    fn test_cancel_running_wins_over_late_result() {
        let h = handle();
        assert!(h.begin());
        assert!(h.cancel());
        assert!(h.cancellation_token().is_cancelled());
        assert!(!h.finish(HandleOutcome::Completed(JobResult::new("u", "f", "m"))));
        assert!(matches!(h.outcome(), Some(HandleOutcome::Cancelled)));
    }

    #[test]
    fn test_cancel_after_finish_is_refused() {
        let h = handle();
        assert!(h.begin());
        assert!(h.finish(HandleOutcome::Failed(JobFailure::new("boom"))));
        assert!(!h.cancel());
        assert!(!h.is_cancelled());
    }

    #[test]
    fn test_wait_times_out_while_running() {
        let h = handle();
        assert!(h.begin());
        assert!(h.wait(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_wait_wakes_on_finish() {
        let h = handle();
        let worker = h.clone();
        let t = std::thread::spawn(move || {
            assert!(worker.begin());
            std::thread::sleep(Duration::from_millis(20));
            worker.finish(HandleOutcome::Completed(JobResult::new("u", "f", "m")));
        });
        assert!(matches!(
            h.wait(Duration::from_secs(5)),
            Some(HandleOutcome::Completed(_))
        ));
        t.join().unwrap();
    }
}
