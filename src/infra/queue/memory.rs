//! In-memory shared job queue for single-node deployments and tests.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::{JobEntry, JobQueue, JobResult, JobState, JobStatus, SchedulerError};
use crate::util::clock::{elapsed_ms, now_ms};

/// Default time a finished record is kept after its last access.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 60);

struct JobRecord {
    status: JobStatus,
    last_check_ms: u64,
    history: Vec<JobState>,
}

impl JobRecord {
    fn transition(&mut self, next: JobState) -> Result<(), SchedulerError> {
        let from = self.status.state;
        if !from.can_transition_to(next) {
            return Err(SchedulerError::InvalidTransition {
                reference_id: self.status.entry.reference_id.clone(),
                from,
                to: next,
            });
        }
        self.status.state = next;
        self.history.push(next);
        Ok(())
    }

    fn last_access_ms(&self) -> u64 {
        self.status
            .completed_at_ms
            .map_or(self.last_check_ms, |done| done.max(self.last_check_ms))
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<String, JobRecord>,
    request_counter: u64,
    completed_count: u64,
    done_count: u64,
    done_duration_ms: u64,
}

impl Registry {
    fn record_mut(&mut self, reference_id: &str) -> Result<&mut JobRecord, SchedulerError> {
        self.jobs
            .get_mut(reference_id)
            .ok_or_else(|| SchedulerError::NoSuchReference(reference_id.to_string()))
    }

    /// Stamp the terminal transition and update the completion statistics.
    fn finished(&mut self, reference_id: &str) {
        let now = now_ms();
        let Some(record) = self.jobs.get_mut(reference_id) else {
            return;
        };
        record.status.completed_at_ms = Some(now);
        self.completed_count += 1;
        if record.status.state == JobState::Done {
            let started = record
                .status
                .started_at_ms
                .unwrap_or(record.status.entry.start_time_ms);
            self.done_count += 1;
            self.done_duration_ms = self.done_duration_ms.saturating_add(now.saturating_sub(started));
        }
    }

    fn cancel(&mut self, reference_id: &str, reason: &str, immediate: bool) -> Result<(), SchedulerError> {
        let record = self.record_mut(reference_id)?;
        match record.status.state {
            state if state.is_terminal() => return Ok(()),
            JobState::Waiting | JobState::Running => {
                record.transition(JobState::Canceling)?;
                record.status.error = Some(reason.to_string());
            }
            _ => {}
        }
        if immediate {
            record.transition(JobState::Canceled)?;
            self.finished(reference_id);
        }
        Ok(())
    }

    /// Drive a job to `DONE` or `ERROR`. A job that is `CANCELING` ends `CANCELED` instead.
    fn complete(&mut self, reference_id: &str, outcome: JobState) -> Result<(), SchedulerError> {
        let record = self.record_mut(reference_id)?;
        match record.status.state {
            JobState::Canceling => record.transition(JobState::Canceled)?,
            JobState::Waiting => {
                record.transition(JobState::Running)?;
                record.status.started_at_ms = Some(now_ms());
                record.transition(outcome)?;
            }
            _ => record.transition(outcome)?,
        }
        self.finished(reference_id);
        Ok(())
    }

    fn purge_expired(&mut self, retention_ms: u64) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, record| {
            !record.status.is_done() || elapsed_ms(record.last_access_ms()) <= retention_ms
        });
        before - self.jobs.len()
    }
}

/// Lock-guarded in-process implementation of [`JobQueue`].
///
/// Keeps the full state history of every job, a global request counter, and
/// completion statistics. Finished records are dropped once they were not
/// accessed for the retention period, checked lazily on `add`, `cancel_old`
/// and `to_cancel`.
pub struct InMemoryJobQueue {
    registry: Mutex<Registry>,
    retention: Option<Duration>,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueue {
    /// Empty queue with the default retention.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            retention: Some(DEFAULT_RETENTION),
        }
    }

    /// Set the retention of finished records. `None` keeps them forever.
    #[must_use]
    pub const fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }

    /// Every state the job went through, starting with `WAITING`.
    #[must_use]
    pub fn history(&self, reference_id: &str) -> Option<Vec<JobState>> {
        self.registry
            .lock()
            .jobs
            .get(reference_id)
            .map(|record| record.history.clone())
    }

    /// Drop finished records not accessed within the retention period.
    pub fn purge_expired(&self) -> usize {
        let Some(retention_ms) = self.retention_horizon_ms() else {
            return 0;
        };
        let purged = self.registry.lock().purge_expired(retention_ms);
        if purged > 0 {
            debug!(purged, "purged expired job records");
        }
        purged
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.lock().jobs.len()
    }

    /// Whether no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.lock().jobs.is_empty()
    }
}

impl JobQueue for InMemoryJobQueue {
    fn add(&self, entry: JobEntry) -> Result<(), SchedulerError> {
        self.purge_expired();
        let mut registry = self.registry.lock();
        if registry.jobs.contains_key(&entry.reference_id) {
            return Err(SchedulerError::Backend(format!(
                "duplicate reference id {}",
                entry.reference_id
            )));
        }
        registry.request_counter += 1;
        let reference_id = entry.reference_id.clone();
        let record = JobRecord {
            status: JobStatus::waiting(entry, registry.request_counter),
            last_check_ms: now_ms(),
            history: vec![JobState::Waiting],
        };
        registry.jobs.insert(reference_id, record);
        Ok(())
    }

    fn get(&self, reference_id: &str, external: bool) -> Result<JobStatus, SchedulerError> {
        let mut registry = self.registry.lock();
        let record = registry.record_mut(reference_id)?;
        if external {
            record.last_check_ms = now_ms();
        }
        Ok(record.status.clone())
    }

    fn start(&self, reference_id: &str) -> Result<(), SchedulerError> {
        let mut registry = self.registry.lock();
        let record = registry.record_mut(reference_id)?;
        record.transition(JobState::Running)?;
        record.status.started_at_ms = Some(now_ms());
        Ok(())
    }

    fn start_next(&self, n: usize) -> Result<Vec<JobStatus>, SchedulerError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut registry = self.registry.lock();
        let mut waiting: Vec<(u64, String)> = registry
            .jobs
            .values()
            .filter(|record| record.status.state == JobState::Waiting)
            .map(|record| (record.status.entry.start_time_ms, record.status.entry.reference_id.clone()))
            .collect();
        waiting.sort_unstable();

        let now = now_ms();
        let mut claimed = Vec::with_capacity(n.min(waiting.len()));
        for (_, reference_id) in waiting.into_iter().take(n) {
            let record = registry.record_mut(&reference_id)?;
            record.transition(JobState::Running)?;
            record.status.started_at_ms = Some(now);
            claimed.push(record.status.clone());
        }
        Ok(claimed)
    }

    fn done(&self, reference_id: &str, result: JobResult) -> Result<(), SchedulerError> {
        let mut registry = self.registry.lock();
        registry.complete(reference_id, JobState::Done)?;
        let record = registry.record_mut(reference_id)?;
        if record.status.state == JobState::Done {
            record.status.result = Some(result);
        }
        Ok(())
    }

    fn fail(&self, reference_id: &str, cause: &str) -> Result<(), SchedulerError> {
        let mut registry = self.registry.lock();
        registry.complete(reference_id, JobState::Error)?;
        let record = registry.record_mut(reference_id)?;
        if record.status.state == JobState::Error {
            record.status.error = Some(cause.to_string());
        }
        Ok(())
    }

    fn cancel(&self, reference_id: &str, reason: &str, immediate: bool) -> Result<(), SchedulerError> {
        self.registry.lock().cancel(reference_id, reason, immediate)
    }

    fn cancel_old(&self, timeout_ms: u64, abandoned_ms: u64, reason: &str) -> Result<usize, SchedulerError> {
        self.purge_expired();
        let mut registry = self.registry.lock();
        let old: Vec<String> = registry
            .jobs
            .values()
            .filter(|record| !record.status.is_done())
            .filter(|record| {
                record.status.entry.time_since_start_ms() > timeout_ms
                    || elapsed_ms(record.last_check_ms) > abandoned_ms
            })
            .map(|record| record.status.entry.reference_id.clone())
            .collect();
        for reference_id in &old {
            registry.cancel(reference_id, reason, true)?;
        }
        Ok(old.len())
    }

    fn to_cancel(&self) -> Result<Vec<JobStatus>, SchedulerError> {
        self.purge_expired();
        Ok(self
            .registry
            .lock()
            .jobs
            .values()
            .filter(|record| record.status.state == JobState::Canceling)
            .map(|record| record.status.clone())
            .collect())
    }

    fn waiting_jobs_count(&self) -> Result<usize, SchedulerError> {
        Ok(self
            .registry
            .lock()
            .jobs
            .values()
            .filter(|record| record.status.state == JobState::Waiting)
            .count())
    }

    fn last_completed_count(&self) -> Result<u64, SchedulerError> {
        Ok(self.registry.lock().completed_count)
    }

    fn average_duration_ms(&self) -> Result<u64, SchedulerError> {
        let registry = self.registry.lock();
        Ok(registry
            .done_duration_ms
            .checked_div(registry.done_count)
            .unwrap_or(0))
    }

    fn time_since_last_status_check_ms(&self, reference_id: &str) -> Result<u64, SchedulerError> {
        let mut registry = self.registry.lock();
        Ok(elapsed_ms(registry.record_mut(reference_id)?.last_check_ms))
    }

    fn retention_horizon_ms(&self) -> Option<u64> {
        self.retention
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}
