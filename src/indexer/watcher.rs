use ignore::WalkBuilder;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::SymbolIndexer;
use super::IndexError;
use crate::config::get_data_dir;

/// A filesystem change as the indexer sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    /// Created or modified
    Changed(PathBuf),
    Removed(PathBuf),
}

/// Reduce a raw notify event to changes. Renames become a removal of the
/// old path and a change of the new one.
pub fn classify_event(event: &Event) -> Vec<FileChange> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                changes.push(FileChange::Removed(from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                changes.push(FileChange::Changed(to.clone()));
            }
            changes
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => event
            .paths
            .iter()
            .cloned()
            .map(FileChange::Removed)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .cloned()
            .map(FileChange::Changed)
            .collect(),
        // Half-known renames: whatever exists now was the target
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                if p.exists() {
                    FileChange::Changed(p.clone())
                } else {
                    FileChange::Removed(p.clone())
                }
            })
            .collect(),
        EventKind::Create(_) | EventKind::Modify(_) => event
            .paths
            .iter()
            .cloned()
            .map(FileChange::Changed)
            .collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Keeps a recursive watch on the indexer's root alive.
/// Dropping it stops watching.
pub struct IndexWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for IndexWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl SymbolIndexer {
    /// Watch the root and feed changes into the queue. Needs a tokio runtime.
    pub fn start_watching(&self) -> Result<IndexWatcher, IndexError> {
        let runtime = Handle::try_current()
            .map_err(|e| notify::Error::generic(&format!("no async runtime: {e}")))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => warn!(error = %e, "Watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(self.root(), RecursiveMode::Recursive)?;
        info!(root = %self.root().display(), "Watching for changes");

        let indexer = self.clone();
        let task = runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                for change in classify_event(&event) {
                    indexer.apply_change(change);
                }
            }
        });

        Ok(IndexWatcher {
            _watcher: watcher,
            task,
        })
    }

    /// React to one change: reload ignore rules, queue, or delete
    pub fn apply_change(&self, change: FileChange) {
        let path = match &change {
            FileChange::Changed(p) | FileChange::Removed(p) => p,
        };

        if *path == self.ignore_policy().ignore_file() {
            debug!("Ignore file changed; reloading rules");
            self.ignore_policy().reload();
            return;
        }

        match change {
            FileChange::Changed(path) if path.is_dir() => {
                if self.skips_change(&path) {
                    return;
                }
                let files = files_under(&path);
                debug!(path = %path.display(), count = files.len(), "Directory changed");
                for file in files {
                    if !self.skips_change(&file) {
                        self.enqueue(file);
                    }
                }
            }
            FileChange::Changed(path) => {
                if self.skips_change(&path) || !path.is_file() {
                    return;
                }
                debug!(path = %path.display(), "Queued changed file");
                self.enqueue(path);
            }
            FileChange::Removed(path) => self.remove_path(&path),
        }
    }

    fn skips_change(&self, path: &Path) -> bool {
        path.starts_with(get_data_dir(self.root())) || self.ignore_policy().is_fast_ignored(path)
    }
}

/// Every file below `dir`, sorted. Ignore files are left to the caller.
fn files_under(dir: &Path) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(dir)
        .standard_filters(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    let mut files: Vec<PathBuf> = walker
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexSettings;
    use crate::enumerator::WalkEnumerator;
    use crate::lsp::{DocumentSymbol, LspError, SymbolProvider};
    use crate::symbol_index::SymbolStore;
    use async_trait::async_trait;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct EmptyProvider;

    #[async_trait]
    impl SymbolProvider for EmptyProvider {
        async fn document_symbols(&self, _path: &Path) -> Result<Vec<DocumentSymbol>, LspError> {
            Ok(vec![])
        }
    }

    fn indexer(root: &Path) -> SymbolIndexer {
        SymbolIndexer::builder(root, Arc::new(SymbolStore::in_memory().unwrap()))
            .settings(IndexSettings {
                debounce_ms: 60_000,
                ..IndexSettings::default()
            })
            .provider(Arc::new(EmptyProvider))
            .enumerator(Arc::new(WalkEnumerator))
            .build()
    }

    #[test]
    fn test_classify_rename_splits_into_remove_and_change() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/p/old.rs"))
            .add_path(PathBuf::from("/p/new.rs"));

        assert_eq!(
            classify_event(&event),
            vec![
                FileChange::Removed(PathBuf::from("/p/old.rs")),
                FileChange::Changed(PathBuf::from("/p/new.rs")),
            ]
        );
    }

    #[test]
    fn test_classify_basic_kinds() {
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("a"));
        let modified = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("b"));
        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("c"));
        let accessed = Event::new(EventKind::Access(notify::event::AccessKind::Read))
            .add_path(PathBuf::from("d"));

        assert_eq!(classify_event(&created), vec![FileChange::Changed(PathBuf::from("a"))]);
        assert_eq!(classify_event(&modified), vec![FileChange::Changed(PathBuf::from("b"))]);
        assert_eq!(classify_event(&removed), vec![FileChange::Removed(PathBuf::from("c"))]);
        assert!(classify_event(&accessed).is_empty());
    }

    #[tokio::test]
    async fn test_changes_are_filtered_before_queueing() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("node_modules")).unwrap();
        fs::create_dir_all(root.join(".symdex")).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("node_modules/x.js"), "").unwrap();
        fs::write(root.join(".symdex/index.db"), "").unwrap();
        fs::write(root.join("src/lib.rs"), "").unwrap();

        let indexer = indexer(root);
        indexer.apply_change(FileChange::Changed(root.join("node_modules/x.js")));
        indexer.apply_change(FileChange::Changed(root.join(".symdex/index.db")));
        indexer.apply_change(FileChange::Changed(root.join("node_modules")));
        indexer.apply_change(FileChange::Changed(root.join(".symdex")));
        assert_eq!(indexer.queued_len(), 0);

        indexer.apply_change(FileChange::Changed(root.join("src/lib.rs")));
        indexer.apply_change(FileChange::Changed(root.join("src/lib.rs")));
        assert_eq!(indexer.queued_len(), 1);
    }

    #[tokio::test]
    async fn test_directory_rename_moves_its_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("old/deep")).unwrap();
        fs::write(root.join("old/a.rs"), "").unwrap();
        fs::write(root.join("old/deep/b.rs"), "").unwrap();
        fs::write(root.join("old_notes.rs"), "").unwrap();

        let indexer = indexer(root);
        for file in ["old/a.rs", "old/deep/b.rs", "old_notes.rs"] {
            indexer
                .store()
                .upsert_file_and_symbols(&root.join(file).to_string_lossy(), 1, &[])
                .unwrap();
        }

        fs::rename(root.join("old"), root.join("new")).unwrap();
        fs::create_dir_all(root.join("new/node_modules")).unwrap();
        fs::write(root.join("new/node_modules/dep.js"), "").unwrap();

        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(root.join("old"))
            .add_path(root.join("new"));
        for change in classify_event(&event) {
            indexer.apply_change(change);
        }

        let stored: Vec<PathBuf> = indexer.store().get_files().unwrap().into_keys().collect();
        assert_eq!(stored, vec![root.join("old_notes.rs")]);

        assert_eq!(indexer.queued_len(), 2);
        indexer.resume().await;
        let mut indexed: Vec<PathBuf> = indexer.store().get_files().unwrap().into_keys().collect();
        indexed.sort();
        assert_eq!(
            indexed,
            vec![root.join("new/a.rs"), root.join("new/deep/b.rs"), root.join("old_notes.rs")]
        );
    }

    #[tokio::test]
    async fn test_directory_removal_deletes_its_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let indexer = indexer(root);
        for file in ["gone/a.rs", "gone/sub/b.rs", "kept/c.rs"] {
            indexer
                .store()
                .upsert_file_and_symbols(&root.join(file).to_string_lossy(), 1, &[])
                .unwrap();
        }

        indexer.apply_change(FileChange::Removed(root.join("gone")));

        let stored: Vec<PathBuf> = indexer.store().get_files().unwrap().into_keys().collect();
        assert_eq!(stored, vec![root.join("kept/c.rs")]);
    }

    #[tokio::test]
    async fn test_ignore_file_change_reloads_rules() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("build/out.rs"), "").unwrap();

        let indexer = indexer(root);
        fs::write(root.join(".gitignore"), "build/\n").unwrap();
        indexer.apply_change(FileChange::Changed(root.join(".gitignore")));
        assert_eq!(indexer.queued_len(), 0);

        indexer.apply_change(FileChange::Changed(root.join("build/out.rs")));
        assert_eq!(indexer.queued_len(), 0);

        fs::remove_file(root.join(".gitignore")).unwrap();
        indexer.apply_change(FileChange::Removed(root.join(".gitignore")));
        indexer.apply_change(FileChange::Changed(root.join("build/out.rs")));
        assert_eq!(indexer.queued_len(), 1);
    }

    #[tokio::test]
    async fn test_removal_deletes_from_store() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let file = root.join("gone.rs");

        let indexer = indexer(root);
        indexer
            .store()
            .upsert_file_and_symbols(&file.to_string_lossy(), 1, &[])
            .unwrap();

        indexer.apply_change(FileChange::Removed(file.clone()));
        assert_eq!(indexer.store().get_file_mtime(&file.to_string_lossy()).unwrap(), None);
    }

    #[tokio::test]
    async fn test_watcher_queues_new_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let indexer = indexer(&root);

        let _watcher = indexer.start_watching().unwrap();
        fs::write(root.join("new.rs"), "fn new() {}").unwrap();

        for _ in 0..50 {
            if indexer.queued_len() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(indexer.queued_len(), 1);
    }
}
