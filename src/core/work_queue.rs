//! In-process priority queue feeding the worker pool.
//!
//! Every queued item carries an explicit `(kind, key)` pair: housekeeping
//! tasks always drain ahead of jobs, jobs are ordered by a pluggable
//! [`JobComparator`], and insertion order breaks remaining ties. The
//! comparator therefore only ever sees two job entries.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

use crate::core::{JobEntry, JobHandle};

/// Orders two jobs; `Ordering::Less` means the first one runs earlier.
pub type JobComparator = Arc<dyn Fn(&JobEntry, &JobEntry) -> Ordering + Send + Sync>;

/// Default ordering: oldest submission first.
#[must_use]
pub fn submission_time_order() -> JobComparator {
    Arc::new(|a: &JobEntry, b: &JobEntry| a.start_time_ms.cmp(&b.start_time_ms))
}

/// Internal task that is not a job.
pub type Housekeeping = Box<dyn FnOnce() + Send + 'static>;

/// An item handed to the worker pool.
pub enum WorkItem {
    /// A scheduled job.
    Job(JobHandle),
    /// Internal pool housekeeping.
    Housekeeping(Housekeeping),
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job(handle) => f.debug_tuple("Job").field(handle).finish(),
            Self::Housekeeping(_) => f.write_str("Housekeeping"),
        }
    }
}

/// Primary sort key of a queued item. Declaration order is drain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ItemKind {
    /// Drained first.
    Housekeeping,
    /// Drained after all housekeeping.
    Job,
}

struct Queued {
    kind: ItemKind,
    seq: u64,
    item: WorkItem,
    comparator: JobComparator,
}

impl Queued {
    /// Ascending "runs earlier" order.
    fn run_order(&self, other: &Self) -> Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| match (&self.item, &other.item) {
                (WorkItem::Job(a), WorkItem::Job(b)) => (self.comparator)(a.entry(), b.entry()),
                _ => Ordering::Equal,
            })
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; the item that runs earliest must compare greatest.
        other.run_order(self)
    }
}

/// Unbounded priority queue of pending work.
///
/// Admission control happens against the shared queue before anything lands
/// here, so this structure never rejects an item.
pub struct PriorityWorkQueue {
    comparator: JobComparator,
    items: BinaryHeap<Queued>,
    next_seq: u64,
}

impl PriorityWorkQueue {
    /// Create an empty queue ordering jobs with `comparator`.
    #[must_use]
    pub fn new(comparator: JobComparator) -> Self {
        Self {
            comparator,
            items: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Enqueue a job handle.
    pub fn push_job(&mut self, handle: JobHandle) {
        self.push(ItemKind::Job, WorkItem::Job(handle));
    }

    /// Enqueue a housekeeping task.
    pub fn push_housekeeping(&mut self, task: Housekeeping) {
        self.push(ItemKind::Housekeeping, WorkItem::Housekeeping(task));
    }

    fn push(&mut self, kind: ItemKind, item: WorkItem) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push(Queued {
            kind,
            seq,
            item,
            comparator: Arc::clone(&self.comparator),
        });
    }

    /// Remove the item that should run next.
    pub fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop().map(|q| q.item)
    }

    /// Drop job handles that already finished (cancelled while queued). Returns how many.
    pub fn purge(&mut self) -> usize {
        let before = self.items.len();
        self.items
            .retain(|q| !matches!(&q.item, WorkItem::Job(handle) if handle.is_finished()));
        before - self.items.len()
    }

    /// Take every pending item, in no particular order.
    pub fn drain(&mut self) -> Vec<WorkItem> {
        self.items.drain().map(|q| q.item).collect()
    }

    /// Number of pending items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Debug for PriorityWorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityWorkQueue")
            .field("len", &self.items.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    fn job(id: &str, start_time_ms: u64) -> JobHandle {
        JobHandle::new(JobEntry::with_reference_id(id, start_time_ms, serde_json::Value::Null))
    }

    fn pop_id(q: &mut PriorityWorkQueue) -> String {
        match q.pop() {
            Some(WorkItem::Job(h)) => h.reference_id().to_string(),
            other => panic!("expected a job, got {other:?}"),
        }
    }

    #[test]
    fn test_oldest_submission_first() {
        let mut q = PriorityWorkQueue::new(submission_time_order());
        let mut jobs: Vec<_> = (0..20u64).map(|i| job(&format!("j{i:02}"), 1_000 + i)).collect();
        jobs.shuffle(&mut rand::rng());
        for h in jobs {
            q.push_job(h);
        }
        for i in 0..20u64 {
            assert_eq!(pop_id(&mut q), format!("j{i:02}"));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut q = PriorityWorkQueue::new(submission_time_order());
        q.push_job(job("b", 5));
        q.push_job(job("a", 5));
        q.push_job(job("c", 5));
        assert_eq!(pop_id(&mut q), "b");
        assert_eq!(pop_id(&mut q), "a");
        assert_eq!(pop_id(&mut q), "c");
    }

    #[test]
    fn test_custom_comparator() {
        let by_vip: JobComparator = Arc::new(|a: &JobEntry, b: &JobEntry| {
            let vip = |e: &JobEntry| e.params.get("vip").and_then(serde_json::Value::as_bool).unwrap_or(false);
            vip(b).cmp(&vip(a)).then(a.start_time_ms.cmp(&b.start_time_ms))
        });
        let mut q = PriorityWorkQueue::new(by_vip);
        q.push_job(job("plain-old", 1));
        q.push_job(JobHandle::new(JobEntry::with_reference_id(
            "vip-new",
            9,
            serde_json::json!({ "vip": true }),
        )));
        assert_eq!(pop_id(&mut q), "vip-new");
        assert_eq!(pop_id(&mut q), "plain-old");
    }

    #[test]
    fn test_housekeeping_drains_before_jobs() {
        let mut q = PriorityWorkQueue::new(submission_time_order());
        q.push_job(job("j", 0));
        q.push_housekeeping(Box::new(|| {}));
        assert!(matches!(q.pop(), Some(WorkItem::Housekeeping(_))));
        assert_eq!(pop_id(&mut q), "j");
    }

    #[test]
    fn test_purge_removes_cancelled_handles() {
        let mut q = PriorityWorkQueue::new(submission_time_order());
        let keep = job("keep", 2);
        let drop = job("drop", 1);
        q.push_job(keep);
        q.push_job(drop.clone());
        q.push_housekeeping(Box::new(|| {}));
        drop.cancel();
        assert_eq!(q.purge(), 1);
        assert_eq!(q.len(), 2);
        assert!(matches!(q.pop(), Some(WorkItem::Housekeeping(_))));
        assert_eq!(pop_id(&mut q), "keep");
    }
}
