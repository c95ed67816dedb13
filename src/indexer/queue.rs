use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use super::progress::progress_percent;

/// Extraction attempts allowed after the first failure
pub const MAX_RETRIES: u32 = 3;

/// What happened to a path whose extraction failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back at the tail of the queue; carries the retry number
    Requeued(u32),
    /// Out of retries
    Abandoned,
}

/// Pending work plus the counters that describe the current run.
///
/// The queue and its membership set always change together, so a path is
/// never pending twice.
#[derive(Debug, Default)]
pub struct IndexQueue {
    pending: VecDeque<PathBuf>,
    members: HashSet<PathBuf>,
    retries: HashMap<PathBuf, u32>,
    total: usize,
    processed: usize,
}

impl IndexQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a path. Returns false if it was already pending.
    pub fn push(&mut self, path: PathBuf) -> bool {
        if !self.members.insert(path.clone()) {
            return false;
        }
        self.pending.push_back(path);
        self.total += 1;
        true
    }

    /// Take up to `max` paths from the front
    pub fn pop_batch(&mut self, max: usize) -> Vec<PathBuf> {
        let count = max.min(self.pending.len());
        let batch: Vec<PathBuf> = self.pending.drain(..count).collect();
        for path in &batch {
            self.members.remove(path);
        }
        batch
    }

    /// Count a failure and requeue the path unless it is out of retries.
    /// A requeued path does not grow `total`.
    pub fn record_failure(&mut self, path: &Path) -> RetryDecision {
        let count = self.retries.entry(path.to_path_buf()).or_insert(0);
        if *count >= MAX_RETRIES {
            return RetryDecision::Abandoned;
        }
        *count += 1;
        let attempt = *count;

        if self.members.insert(path.to_path_buf()) {
            self.pending.push_back(path.to_path_buf());
        }
        RetryDecision::Requeued(attempt)
    }

    pub fn clear_retry(&mut self, path: &Path) {
        self.retries.remove(path);
    }

    pub fn retry_count(&self, path: &Path) -> u32 {
        self.retries.get(path).copied().unwrap_or(0)
    }

    pub fn mark_processed(&mut self, count: usize) {
        self.processed += count;
    }

    pub fn progress(&self) -> u8 {
        progress_percent(self.processed, self.total)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn reset_progress(&mut self) {
        self.total = 0;
        self.processed = 0;
    }

    /// Drop pending work and progress. Retry counters survive.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.members.clear();
        self.reset_progress();
    }

    pub fn clear_retries(&mut self) {
        self.retries.clear();
    }
}
