//! Tests for the in-memory shared job queue

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use report_scheduler::core::{JobEntry, JobQueue, JobState, SchedulerError};
use report_scheduler::infra::InMemoryJobQueue;

fn entry(id: &str, start_time_ms: u64) -> JobEntry {
    JobEntry::with_reference_id(id, start_time_ms, serde_json::Value::Null)
}

#[test]
fn test_concurrent_claims_never_overlap() {
    let queue = Arc::new(InMemoryJobQueue::new());
    for i in 0..200 {
        queue.add(entry(&format!("job-{i:03}"), i)).unwrap();
    }

    let claimers: Vec<_> = (0..8)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut claimed = Vec::new();
                loop {
                    let batch = queue.start_next(3).unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    claimed.extend(batch.into_iter().map(|s| s.entry.reference_id));
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for claimer in claimers {
        for id in claimer.join().unwrap() {
            assert!(seen.insert(id), "job claimed twice");
        }
    }
    assert_eq!(seen.len(), 200);
    assert_eq!(queue.waiting_jobs_count().unwrap(), 0);
}

#[test]
fn test_trait_object_reports_unknown_jobs() {
    let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
    assert!(matches!(
        queue.get("nope", true),
        Err(SchedulerError::NoSuchReference(_))
    ));
    assert!(matches!(
        queue.cancel("nope", "task cancelled", true),
        Err(SchedulerError::NoSuchReference(_))
    ));
    assert!(matches!(
        queue.time_since_last_status_check_ms("nope"),
        Err(SchedulerError::NoSuchReference(_))
    ));
}

#[test]
fn test_cancel_old_skips_finished_jobs() {
    let queue = InMemoryJobQueue::new();
    queue.add(entry("finished", 0)).unwrap();
    queue.add(entry("running", 0)).unwrap();
    queue.add(entry("canceling", 0)).unwrap();
    queue.cancel("finished", "task cancelled", true).unwrap();
    queue.start("running").unwrap();
    queue.cancel("canceling", "task cancelled", false).unwrap();

    let cancelled = queue.cancel_old(1_000, 1_000_000, "task cancelled (timeout)").unwrap();

    assert_eq!(cancelled, 2);
    assert_eq!(queue.get("running", false).unwrap().state, JobState::Canceled);
    assert_eq!(queue.get("canceling", false).unwrap().state, JobState::Canceled);
    assert_eq!(
        queue.get("finished", false).unwrap().error.as_deref(),
        Some("task cancelled")
    );
    assert_eq!(queue.last_completed_count().unwrap(), 3);
}
