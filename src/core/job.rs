//! Job records: identity, lifecycle state, and the status snapshot read from the shared queue.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::SchedulerError;
use crate::util::clock::{elapsed_ms, now_ms};

/// Identity and submission metadata for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEntry {
    /// Opaque client-visible identifier.
    pub reference_id: String,
    /// Submission timestamp in milliseconds since epoch.
    pub start_time_ms: u64,
    /// Owner token required for status and cancel calls. `None` means unrestricted.
    pub access_token: Option<String>,
    /// Job-specific parameters, opaque to the scheduler.
    pub params: serde_json::Value,
}

impl JobEntry {
    /// New entry with a random reference id, stamped with the current time.
    #[must_use]
    pub fn new(params: serde_json::Value) -> Self {
        Self::with_reference_id(Uuid::new_v4().to_string(), now_ms(), params)
    }

    /// Entry with an explicit reference id and submission time.
    pub fn with_reference_id(
        reference_id: impl Into<String>,
        start_time_ms: u64,
        params: serde_json::Value,
    ) -> Self {
        Self {
            reference_id: reference_id.into(),
            start_time_ms,
            access_token: None,
            params,
        }
    }

    /// Restrict status and cancel calls to holders of `token`.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Milliseconds since the job was submitted.
    #[must_use]
    pub fn time_since_start_ms(&self) -> u64 {
        elapsed_ms(self.start_time_ms)
    }

    /// Check that the owner token itself is usable. A present but blank token is rejected.
    ///
    /// # Errors
    ///
    /// `SchedulerError::AccessDenied` for a blank token.
    pub fn validate_access_token(&self) -> Result<(), SchedulerError> {
        match &self.access_token {
            Some(token) if token.trim().is_empty() => {
                Err(SchedulerError::AccessDenied(self.reference_id.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Check a caller credential against the owner token.
    ///
    /// # Errors
    ///
    /// `SchedulerError::AccessDenied` when the entry has a token and `credential` differs.
    pub fn assert_access(&self, credential: Option<&str>) -> Result<(), SchedulerError> {
        match self.access_token.as_deref() {
            None => Ok(()),
            Some(token) if credential == Some(token) => Ok(()),
            Some(_) => Err(SchedulerError::AccessDenied(self.reference_id.clone())),
        }
    }
}

/// Lifecycle state of a job in the shared queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Recorded, not yet claimed by a worker.
    Waiting,
    /// Claimed and executing on some node.
    Running,
    /// Cancellation requested, not yet confirmed.
    Canceling,
    /// Cancelled.
    Canceled,
    /// Finished successfully.
    Done,
    /// The job's own work failed.
    Error,
}

impl JobState {
    /// `DONE`, `ERROR` or `CANCELED`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Canceled)
    }

    /// Whether `next` is a legal successor of this state.
    ///
    /// `WAITING -> RUNNING -> {DONE, ERROR}` and `{WAITING, RUNNING} -> CANCELING -> CANCELED`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Running | Self::Canceling)
                | (Self::Running, Self::Done | Self::Error | Self::Canceling)
                | (Self::Canceling, Self::Canceled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "WAITING",
            Self::Running => "RUNNING",
            Self::Canceling => "CANCELING",
            Self::Canceled => "CANCELED",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Output of a successfully rendered report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Where the finished report can be fetched.
    pub report_uri: String,
    /// File name offered to the client.
    pub file_name: String,
    /// MIME type of the report.
    pub mime_type: String,
}

impl JobResult {
    /// Build a result.
    pub fn new(
        report_uri: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            report_uri: report_uri.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Snapshot of one job as held by the shared queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// The job's entry.
    pub entry: JobEntry,
    /// Current lifecycle state.
    pub state: JobState,
    /// Global request counter value when the job was recorded.
    pub request_count: u64,
    /// When the job moved to `RUNNING`, if it ever did.
    pub started_at_ms: Option<u64>,
    /// When the job reached a terminal state.
    pub completed_at_ms: Option<u64>,
    /// Result of a `DONE` job.
    pub result: Option<JobResult>,
    /// Root cause of an `ERROR` job, or the reason of a cancellation.
    pub error: Option<String>,
    /// Estimated wait before a `WAITING` job starts, in milliseconds. Advisory.
    pub waiting_time_ms: u64,
}

impl JobStatus {
    /// Fresh `WAITING` status for a newly recorded entry.
    #[must_use]
    pub const fn waiting(entry: JobEntry, request_count: u64) -> Self {
        Self {
            entry,
            state: JobState::Waiting,
            request_count,
            started_at_ms: None,
            completed_at_ms: None,
            result: None,
            error: None,
            waiting_time_ms: 0,
        }
    }

    /// Reference id of the job.
    #[must_use]
    pub fn reference_id(&self) -> &str {
        &self.entry.reference_id
    }

    /// Whether the job reached a terminal state.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.state.is_terminal()
    }
}
