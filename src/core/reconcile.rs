//! Periodic reconciliation between in-flight handles and the shared job queue.
//!
//! One pass runs with the tracker lock held:
//!
//! 1. Cancel local jobs past the hard timeout or abandoned by their client.
//! 2. Report finished handles to the shared queue and forget them.
//! 3. In clustered mode, cancel old jobs cluster-wide, stop jobs other nodes
//!    asked to cancel, and claim waiting jobs up to the free capacity.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::core::scheduler::{SchedulerInner, CANCEL_REASON, TIMEOUT_REASON};
use crate::core::tracker::TrackerGuard;
use crate::core::{HandleOutcome, JobEntry, SchedulerError};

/// Run one full pass. Failures and panics are logged, never propagated,
/// so the timer keeps firing.
pub(crate) fn run_pass(inner: &SchedulerInner) {
    if inner.is_shutdown() {
        return;
    }
    let pass = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut tracker = inner.tracker.lock();
        update_registry(inner, &mut tracker);
        if inner.config.clustered {
            cancel_old(inner)?;
            poll_registry(inner, &mut tracker)?;
        }
        Ok::<(), SchedulerError>(())
    }));
    match pass {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "error while polling/updating registry"),
        Err(_) => error!("reconciliation pass panicked"),
    }
}

pub(crate) fn update_registry(inner: &SchedulerInner, tracker: &mut TrackerGuard<'_>) {
    let mut finished = Vec::new();
    let mut cancelled_any = false;

    for record in tracker.records() {
        let handle = record.handle();
        if !handle.is_finished() && (is_timed_out(inner, record.entry()) || is_abandoned(inner, record.entry())) {
            if handle.cancel() {
                cancelled_any = true;
            } else {
                info!(reference_id = %handle.reference_id(), "could not cancel job after timeout");
            }
        }
        if handle.is_finished() {
            finished.push(handle.reference_id().to_string());
        }
    }

    if cancelled_any {
        if let Err(e) = inner.pool.schedule_purge() {
            debug!(error = %e, "could not schedule worker queue purge");
        }
    }

    for reference_id in finished {
        let Some(record) = tracker.remove(&reference_id) else {
            continue;
        };
        let reported = match record.handle().outcome() {
            Some(HandleOutcome::Completed(result)) => {
                debug!(reference_id = %reference_id, "job completed");
                inner.queue.done(&reference_id, result)
            }
            Some(HandleOutcome::Failed(failure)) => {
                info!(reference_id = %reference_id, error = %failure, "job failed");
                inner.queue.fail(&reference_id, failure.root_cause())
            }
            Some(HandleOutcome::Cancelled) => {
                inner.queue.cancel(&reference_id, TIMEOUT_REASON, true)
            }
            Some(HandleOutcome::Interrupted) | None => {
                debug!(reference_id = %reference_id, "job interrupted, no outcome reported");
                Ok(())
            }
        };
        if let Err(e) = reported {
            warn!(
                reference_id = %reference_id,
                error = %e,
                "registry inconsistency while reporting job outcome"
            );
        }
    }
}

fn is_timed_out(inner: &SchedulerInner, entry: &JobEntry) -> bool {
    let timed_out = exceeds(entry.time_since_start_ms(), inner.config.timeout());
    if timed_out {
        info!(
            reference_id = %entry.reference_id,
            timeout_secs = inner.config.timeout_secs,
            "job timed out, cancelling"
        );
    }
    timed_out
}

fn is_abandoned(inner: &SchedulerInner, entry: &JobEntry) -> bool {
    match inner.queue.time_since_last_status_check_ms(&entry.reference_id) {
        Ok(since_check_ms) => {
            let abandoned = exceeds(since_check_ms, inner.config.abandoned_timeout());
            if abandoned {
                info!(
                    reference_id = %entry.reference_id,
                    abandoned_timeout_secs = inner.config.abandoned_timeout_secs,
                    "job abandoned (no status check within the limit), cancelling"
                );
            }
            abandoned
        }
        Err(e) => {
            debug!(reference_id = %entry.reference_id, error = %e, "no status check time for job");
            false
        }
    }
}

pub(crate) fn exceeds(elapsed_ms: u64, limit: Duration) -> bool {
    u128::from(elapsed_ms) > limit.as_millis()
}

fn cancel_old(inner: &SchedulerInner) -> Result<(), SchedulerError> {
    let timeout_ms = inner.config.timeout_secs.saturating_mul(1000);
    let abandoned_ms = inner.config.abandoned_timeout_secs.saturating_mul(1000);
    let cancelled = inner.queue.cancel_old(timeout_ms, abandoned_ms, TIMEOUT_REASON)?;
    if cancelled > 0 {
        info!(cancelled, "cancelled old jobs in the shared queue");
    }
    Ok(())
}

fn poll_registry(inner: &SchedulerInner, tracker: &mut TrackerGuard<'_>) -> Result<(), SchedulerError> {
    for status in inner.queue.to_cancel()? {
        let reference_id = status.reference_id();
        match inner.cancel_held(tracker, reference_id, CANCEL_REASON) {
            Ok(true) => info!(reference_id, "cancelled job requested by the shared queue"),
            Ok(false) if status.started_at_ms.is_none() => {
                // Never claimed by any node, so nobody else will finish it.
                if let Err(e) = inner.queue.cancel(reference_id, CANCEL_REASON, true) {
                    warn!(reference_id, error = %e, "failed to finalize unclaimed cancellation");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(reference_id, error = %e, "failed to cancel job"),
        }
    }

    let capacity = inner.config.max_running_jobs;
    let held = tracker.len();
    if held >= capacity {
        return Ok(());
    }
    for status in inner.queue.start_next(capacity - held)? {
        let reference_id = status.entry.reference_id.clone();
        inner.schedule_locked(tracker, status.entry)?;
        info!(reference_id = %reference_id, "claimed job from the shared queue");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_exclusive() {
        let limit = Duration::from_secs(1);
        assert!(!exceeds(999, limit));
        assert!(!exceeds(1_000, limit));
        assert!(exceeds(1_001, limit));
    }

    #[test]
    fn test_large_elapsed_does_not_overflow() {
        assert!(exceeds(u64::MAX, Duration::from_secs(u64::MAX / 1_000 - 1)));
    }
}
