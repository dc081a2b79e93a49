//! Submission tracker: the node-local map of jobs handed to the worker pool.

use std::collections::hash_map::Values;
use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};

use crate::core::{JobEntry, JobHandle};

/// A job this node scheduled and has not yet reconciled.
#[derive(Debug, Clone)]
pub struct InFlightRecord {
    handle: JobHandle,
}

impl InFlightRecord {
    /// The job's entry.
    #[must_use]
    pub fn entry(&self) -> &JobEntry {
        self.handle.entry()
    }

    /// The cancellable execution handle.
    #[must_use]
    pub const fn handle(&self) -> &JobHandle {
        &self.handle
    }
}

/// Lock-guarded map from reference id to in-flight record.
///
/// Every read or mutation goes through [`SubmissionTracker::lock`], so a
/// cancel request and a reconciliation pass never interleave on one record.
#[derive(Debug, Default)]
pub struct SubmissionTracker {
    records: Mutex<HashMap<String, InFlightRecord>>,
}

impl SubmissionTracker {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the tracker lock.
    pub fn lock(&self) -> TrackerGuard<'_> {
        TrackerGuard {
            records: self.records.lock(),
        }
    }

    /// Number of in-flight records (briefly takes the lock).
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing is in flight (briefly takes the lock).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

/// Exclusive access to the in-flight records.
pub struct TrackerGuard<'a> {
    records: MutexGuard<'a, HashMap<String, InFlightRecord>>,
}

impl TrackerGuard<'_> {
    /// Track a freshly scheduled handle, replacing any stale record for the same id.
    pub fn insert(&mut self, handle: JobHandle) -> Option<InFlightRecord> {
        let id = handle.reference_id().to_string();
        self.records.insert(id, InFlightRecord { handle })
    }

    /// Stop tracking `reference_id`.
    pub fn remove(&mut self, reference_id: &str) -> Option<InFlightRecord> {
        self.records.remove(reference_id)
    }

    /// Record for `reference_id`, if this node holds it.
    #[must_use]
    pub fn get(&self, reference_id: &str) -> Option<&InFlightRecord> {
        self.records.get(reference_id)
    }

    /// Whether this node holds `reference_id`.
    #[must_use]
    pub fn contains(&self, reference_id: &str) -> bool {
        self.records.contains_key(reference_id)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over all records.
    pub fn records(&self) -> Values<'_, String, InFlightRecord> {
        self.records.values()
    }
}
