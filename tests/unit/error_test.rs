//! Tests for error types

use report_scheduler::core::{JobFailure, JobState, SchedulerError};

#[test]
fn test_no_such_reference_error() {
    let err = SchedulerError::NoSuchReference("abc".to_string());
    assert_eq!(format!("{}", err), "no such reference: abc");
}

#[test]
fn test_access_denied_error() {
    let err = SchedulerError::AccessDenied("abc".to_string());
    assert_eq!(format!("{}", err), "access denied to job abc");
}

#[test]
fn test_invalid_transition_error() {
    let err = SchedulerError::InvalidTransition {
        reference_id: "abc".to_string(),
        from: JobState::Done,
        to: JobState::Running,
    };
    assert_eq!(format!("{}", err), "job abc cannot move from DONE to RUNNING");
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("connection failed".to_string());
    assert_eq!(format!("{}", err), "backend error: connection failed");
}

#[test]
fn test_pool_shutdown_error() {
    assert_eq!(
        format!("{}", SchedulerError::PoolShutdown),
        "worker pool has been shut down"
    );
}

#[test]
fn test_job_failure_keeps_innermost_cause() {
    let failure: JobFailure = anyhow::anyhow!("font not found")
        .context("rendering legend")
        .context("rendering page 1")
        .into();
    assert_eq!(failure.message(), "rendering page 1");
    assert_eq!(failure.root_cause(), "font not found");
}
