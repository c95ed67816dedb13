//! Warm-start reconciliation between the disk and the store

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;

use super::worker::{mtime_millis, UNKNOWN_MTIME};
use crate::symbol_index::FileEntry;

/// Work needed to bring the store in line with the disk
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    /// New files and files whose mtime drifted past the tolerance
    pub to_index: Vec<PathBuf>,
    /// Stored files that no longer exist
    pub to_delete: Vec<PathBuf>,
}

/// Diff live mtimes against stored ones. Both outputs are sorted.
/// A live file without an mtime, or one stored without one, is always
/// scheduled.
pub fn plan_sync(
    live: &HashMap<PathBuf, Option<i64>>,
    stored: &HashMap<PathBuf, FileEntry>,
    tolerance_ms: i64,
) -> SyncPlan {
    let mut to_index: Vec<PathBuf> = live
        .iter()
        .filter(|(path, live_mtime)| match (stored.get(*path), **live_mtime) {
            (Some(entry), Some(live_mtime)) if entry.mtime != UNKNOWN_MTIME => {
                live_mtime.abs_diff(entry.mtime) > tolerance_ms.unsigned_abs()
            }
            _ => true,
        })
        .map(|(path, _)| path.clone())
        .collect();

    let mut to_delete: Vec<PathBuf> = stored
        .keys()
        .filter(|path| !live.contains_key(*path))
        .cloned()
        .collect();

    to_index.sort();
    to_delete.sort();
    SyncPlan {
        to_index,
        to_delete,
    }
}

/// Stat `paths` with at most `concurrency` calls in flight.
/// Anything that cannot be stat'ed is left out; files the platform gives
/// no mtime for map to `None`.
pub async fn stat_files(
    paths: Vec<PathBuf>,
    concurrency: usize,
) -> HashMap<PathBuf, Option<i64>> {
    stream::iter(paths)
        .map(|path| async move {
            match tokio::fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => Some((path, mtime_millis(&metadata))),
                _ => None,
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|entry| async move { entry })
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(entries: &[(&str, i64)]) -> HashMap<PathBuf, FileEntry> {
        entries
            .iter()
            .map(|(p, m)| (PathBuf::from(p), FileEntry { mtime: *m }))
            .collect()
    }

    fn live(entries: &[(&str, i64)]) -> HashMap<PathBuf, Option<i64>> {
        entries.iter().map(|(p, m)| (PathBuf::from(p), Some(*m))).collect()
    }

    #[test]
    fn test_plan_schedules_only_new_and_changed() {
        let plan = plan_sync(
            &live(&[("A", 100_000), ("B", 500_000), ("C", 7)]),
            &stored(&[("A", 100_000), ("B", 100_000)]),
            1000,
        );
        assert_eq!(plan.to_index, vec![PathBuf::from("B"), PathBuf::from("C")]);
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn test_plan_tolerates_small_drift_both_ways() {
        let plan = plan_sync(
            &live(&[("A", 10_000), ("B", 10_000), ("C", 10_000)]),
            &stored(&[("A", 10_999), ("B", 9_000), ("C", 8_999)]),
            1000,
        );
        assert_eq!(plan.to_index, vec![PathBuf::from("C")]);
    }

    #[test]
    fn test_plan_deletes_missing_files() {
        let plan = plan_sync(
            &live(&[("A", 1)]),
            &stored(&[("A", 1), ("Z", 1), ("Y", 1)]),
            1000,
        );
        assert!(plan.to_index.is_empty());
        assert_eq!(plan.to_delete, vec![PathBuf::from("Y"), PathBuf::from("Z")]);
    }

    #[test]
    fn test_plan_always_schedules_unknown_mtimes() {
        let mut live = live(&[("A", 100_000), ("B", 100_000)]);
        live.insert(PathBuf::from("C"), None);
        let plan = plan_sync(
            &live,
            &stored(&[("A", 100_000), ("B", UNKNOWN_MTIME), ("C", 100_000)]),
            1000,
        );
        assert_eq!(plan.to_index, vec![PathBuf::from("B"), PathBuf::from("C")]);
        assert!(plan.to_delete.is_empty());
    }

    #[tokio::test]
    async fn test_stat_files_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.rs");
        std::fs::write(&present, "").unwrap();

        let stats = stat_files(
            vec![present.clone(), dir.path().join("gone.rs"), dir.path().to_path_buf()],
            2,
        )
        .await;

        assert_eq!(stats.len(), 1);
        assert!(stats[&present].is_some_and(|ms| ms > 0));
    }
}
