//! Deletion of report files older than a maximum age.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tracing::{debug, warn};

use crate::core::{AppResult, CleanupTask};

/// Removes regular files in one directory whose last modification is older than `max_age`.
///
/// Subdirectories are left alone. A missing directory counts as nothing to clean.
#[derive(Debug, Clone)]
pub struct OldFileCleanup {
    dir: PathBuf,
    max_age: Duration,
}

impl OldFileCleanup {
    /// Clean `dir` of files older than `max_age`.
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_age,
        }
    }

    /// Directory being cleaned.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_expired(&self, path: &Path, now: SystemTime) -> AppResult<bool> {
        let meta = fs::metadata(path).with_context(|| format!("reading metadata of {}", path.display()))?;
        if !meta.is_file() {
            return Ok(false);
        }
        let modified = meta
            .modified()
            .with_context(|| format!("reading modification time of {}", path.display()))?;
        Ok(now
            .duration_since(modified)
            .is_ok_and(|age| age > self.max_age))
    }
}

impl CleanupTask for OldFileCleanup {
    fn run(&self) -> AppResult<usize> {
        if !self.dir.exists() {
            debug!(dir = %self.dir.display(), "report directory does not exist, nothing to clean");
            return Ok(0);
        }
        let now = SystemTime::now();
        let mut removed = 0;
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("listing {}", self.dir.display()))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("listing {}", self.dir.display()))?
                .path();
            if !self.is_expired(&path, now)? {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to delete old report file"),
            }
        }
        Ok(removed)
    }
}
