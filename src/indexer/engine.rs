use futures::future::join_all;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::progress::{IndexObserver, NoopObserver};
use super::queue::{IndexQueue, RetryDecision};
use super::reconciler::{plan_sync, stat_files};
use super::worker::{WorkOutcome, Worker};
use super::IndexError;
use crate::config::IndexSettings;
use crate::enumerator::{FileEnumerator, RipgrepEnumerator};
use crate::ignore_policy::{IgnoreChecker, IgnorePolicy};
use crate::lsp::{LspSymbolProvider, SymbolProvider};
use crate::symbol_index::SymbolStore;

/// Counts from one warm-start reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Live files that passed the ignore rules
    pub live: usize,
    /// Files sent to the queue
    pub scheduled: usize,
    /// Stored files removed because they are gone from disk
    pub deleted: usize,
}

struct Inner {
    root: PathBuf,
    settings: IndexSettings,
    store: Arc<SymbolStore>,
    enumerator: Arc<dyn FileEnumerator>,
    ignore: IgnorePolicy,
    observer: Arc<dyn IndexObserver>,
    queue: Arc<Mutex<IndexQueue>>,
    worker: Worker,
    paused: AtomicBool,
    processing: AtomicBool,
    debounce: Mutex<Option<JoinHandle<()>>>,
}

/// Resets the processing flag however a drain ends
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to an incremental indexer.
///
/// Clones share the same queue, store and observer. Independent indexers
/// (even over the same root) share nothing. Starts paused.
#[derive(Clone)]
pub struct SymbolIndexer {
    inner: Arc<Inner>,
}

/// Collects the collaborators of a `SymbolIndexer`
pub struct SymbolIndexerBuilder {
    root: PathBuf,
    store: Arc<SymbolStore>,
    settings: IndexSettings,
    provider: Option<Arc<dyn SymbolProvider>>,
    enumerator: Option<Arc<dyn FileEnumerator>>,
    ignore_checker: Option<Arc<dyn IgnoreChecker>>,
    observer: Arc<dyn IndexObserver>,
}

impl SymbolIndexerBuilder {
    pub fn settings(mut self, settings: IndexSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn SymbolProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn enumerator(mut self, enumerator: Arc<dyn FileEnumerator>) -> Self {
        self.enumerator = Some(enumerator);
        self
    }

    pub fn ignore_checker(mut self, checker: Arc<dyn IgnoreChecker>) -> Self {
        self.ignore_checker = Some(checker);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn IndexObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Fill in language servers, ripgrep and git for anything not supplied
    pub fn build(self) -> SymbolIndexer {
        let settings = self.settings;
        let root = self.root;

        let provider = self.provider.unwrap_or_else(|| {
            Arc::new(
                LspSymbolProvider::new(&root, settings.servers.clone())
                    .with_request_timeout(settings.extraction_timeout()),
            )
        });
        let enumerator = self.enumerator.unwrap_or_else(|| {
            Arc::new(RipgrepEnumerator::new(
                settings.include.clone(),
                settings.exclude.clone(),
            ))
        });
        let mut ignore = IgnorePolicy::new(&root, &settings);
        if let Some(checker) = self.ignore_checker {
            ignore = ignore.with_checker(checker);
        }

        let queue = Arc::new(Mutex::new(IndexQueue::new()));
        let worker = Worker::new(
            self.store.clone(),
            provider,
            queue.clone(),
            settings.extraction_timeout(),
        );

        SymbolIndexer {
            inner: Arc::new(Inner {
                root,
                settings,
                store: self.store,
                enumerator,
                ignore,
                observer: self.observer,
                queue,
                worker,
                paused: AtomicBool::new(true),
                processing: AtomicBool::new(false),
                debounce: Mutex::new(None),
            }),
        }
    }
}

impl SymbolIndexer {
    pub fn builder(root: &Path, store: Arc<SymbolStore>) -> SymbolIndexerBuilder {
        SymbolIndexerBuilder {
            root: root.to_path_buf(),
            store,
            settings: IndexSettings::default(),
            provider: None,
            enumerator: None,
            ignore_checker: None,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Open the store configured for `root`
    pub fn open_store(root: &Path, settings: &IndexSettings) -> Result<Arc<SymbolStore>, IndexError> {
        let path = settings.database_path(root);
        match SymbolStore::open(&path) {
            Ok(store) => {
                info!(path = %path.display(), "Opened symbol store");
                Ok(Arc::new(store))
            }
            Err(source) => {
                error!(path = %path.display(), error = %source, "Symbol store unavailable");
                Err(IndexError::StoreUnavailable { path, source })
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn store(&self) -> &Arc<SymbolStore> {
        &self.inner.store
    }

    pub fn ignore_policy(&self) -> &IgnorePolicy {
        &self.inner.ignore
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    pub fn queued_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn retry_count(&self, path: &Path) -> u32 {
        self.inner.queue.lock().retry_count(path)
    }

    /// Queue a path and (re)arm the debounced drain.
    /// Already-pending paths are left where they are.
    pub fn enqueue(&self, path: PathBuf) {
        if !self.inner.queue.lock().push(path) {
            return;
        }
        self.schedule_drain();
    }

    fn schedule_drain(&self) {
        let Ok(runtime) = Handle::try_current() else {
            debug!("No runtime; drain must be triggered manually");
            return;
        };

        let this = self.clone();
        let delay = self.inner.settings.debounce();
        // The timer only spawns the drain, so aborting it never interrupts one.
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(async move { this.drain().await });
        });

        if let Some(previous) = self.inner.debounce.lock().replace(handle) {
            previous.abort();
        }
    }

    fn cancel_debounce(&self) {
        if let Some(handle) = self.inner.debounce.lock().take() {
            handle.abort();
        }
    }

    /// Stop starting new batches. The batch in flight finishes.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
        info!("Indexing paused");
    }

    /// Unpause and drain. Returns once the queue is empty or paused again.
    pub async fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
        info!("Indexing resumed");
        self.drain().await;
    }

    /// Process queued paths in batches until the queue is empty or the
    /// indexer is paused. Returns at once if another drain is running.
    pub async fn drain(&self) {
        self.cancel_debounce();
        loop {
            if self.inner.processing.swap(true, Ordering::AcqRel) {
                return;
            }
            let finished = {
                let _guard = ProcessingGuard(&self.inner.processing);
                self.drain_batches().await
            };

            // Pick up anything that slipped in after the last batch
            if !finished || self.is_paused() || self.inner.queue.lock().is_empty() {
                return;
            }
        }
    }

    /// Returns true when the queue ran dry
    async fn drain_batches(&self) -> bool {
        let batch_size = self.inner.settings.effective_batch_size();
        let mut ran = false;

        loop {
            if self.is_paused() {
                return false;
            }

            let batch = {
                let mut queue = self.inner.queue.lock();
                let batch = queue.pop_batch(batch_size);
                if batch.is_empty() {
                    queue.reset_progress();
                }
                batch
            };
            if batch.is_empty() {
                break;
            }
            ran = true;

            let percent = self.process_batch(batch).await;
            self.inner.observer.on_progress(percent);
            tokio::task::yield_now().await;
        }

        if ran {
            self.inner.observer.on_progress(100);
            self.inner.observer.on_complete();
            info!(
                files = self.inner.store.file_count().unwrap_or_default(),
                "Indexing complete"
            );
        }
        true
    }

    async fn process_batch(&self, batch: Vec<PathBuf>) -> u8 {
        let popped = batch.len();
        let survivors = self.inner.ignore.filter_ignored(batch).await;
        let mut processed = popped - survivors.len();

        let outcomes = join_all(
            survivors
                .iter()
                .map(|path| self.inner.worker.index_file(path)),
        )
        .await;

        for (path, outcome) in survivors.iter().zip(outcomes) {
            match outcome {
                Ok(WorkOutcome::Failed(reason)) => {
                    let decision = self.inner.queue.lock().record_failure(path);
                    match decision {
                        RetryDecision::Requeued(attempt) => {
                            debug!(path = %path.display(), attempt, %reason, "Retrying extraction");
                        }
                        RetryDecision::Abandoned => {
                            warn!(path = %path.display(), %reason, "Giving up on file after repeated failures");
                            processed += 1;
                        }
                    }
                }
                Ok(_) => processed += 1,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to store symbols");
                    processed += 1;
                }
            }
        }

        let mut queue = self.inner.queue.lock();
        queue.mark_processed(processed);
        queue.progress()
    }

    /// Report an empty run, or queue `paths` and drain them
    async fn run(&self, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            self.inner.observer.on_progress(100);
            self.inner.observer.on_complete();
            return;
        }
        {
            let mut queue = self.inner.queue.lock();
            for path in paths {
                queue.push(path);
            }
        }
        self.drain().await;
    }

    async fn live_files(&self) -> Result<Vec<PathBuf>, IndexError> {
        let files = self.inner.enumerator.list_files(&self.inner.root).await?;
        Ok(self.inner.ignore.filter_ignored(files).await)
    }

    /// Warm start: index what changed since the store was last written and
    /// drop what disappeared.
    pub async fn sync_index(&self) -> Result<SyncReport, IndexError> {
        let files = self.live_files().await?;
        let live = stat_files(files, self.inner.settings.effective_batch_size()).await;
        let stored = self.inner.store.get_files()?;
        let plan = plan_sync(&live, &stored, self.inner.settings.mtime_tolerance_ms);

        let mut deleted = 0;
        for path in &plan.to_delete {
            match self.inner.store.delete_file(&path.to_string_lossy()) {
                Ok(_) => deleted += 1,
                Err(e) => error!(path = %path.display(), error = %e, "Failed to delete stale file"),
            }
        }

        let report = SyncReport {
            live: live.len(),
            scheduled: plan.to_index.len(),
            deleted,
        };
        info!(
            live = report.live,
            scheduled = report.scheduled,
            deleted = report.deleted,
            "Reconciled index with disk"
        );

        if !plan.to_index.is_empty() && !self.inner.processing.load(Ordering::Acquire) {
            self.inner.queue.lock().reset_progress();
        }
        self.run(plan.to_index).await;
        Ok(report)
    }

    /// Re-queue every live file against the existing store. Unchanged
    /// files are skipped by the worker.
    pub async fn rebuild_index_incremental(&self) -> Result<usize, IndexError> {
        {
            let mut queue = self.inner.queue.lock();
            queue.clear();
            queue.clear_retries();
        }

        let files = self.live_files().await?;
        let count = files.len();
        info!(files = count, "Incremental rebuild");
        self.run(files).await;
        Ok(count)
    }

    /// Wipe the store and index every live file from scratch
    pub async fn rebuild_index_full(&self) -> Result<usize, IndexError> {
        self.inner.observer.on_rebuild_starting();
        {
            let mut queue = self.inner.queue.lock();
            queue.clear();
            queue.clear_retries();
        }
        self.inner.store.clear()?;

        let files = self.live_files().await?;
        let count = files.len();
        info!(files = count, "Full rebuild");
        self.run(files).await;
        Ok(count)
    }

    /// Drop a removed path from the store right away. The path may have
    /// been a file or a whole directory.
    pub fn remove_path(&self, path: &Path) {
        let key = path.to_string_lossy();
        match self.inner.store.delete_file(&key) {
            Ok(true) => debug!(path = %path.display(), "Removed file from index"),
            Ok(false) => {}
            Err(e) => error!(path = %path.display(), error = %e, "Failed to remove file from index"),
        }
        match self.inner.store.delete_files_under(&key) {
            Ok(0) => {}
            Ok(count) => debug!(path = %path.display(), count, "Removed directory from index"),
            Err(e) => error!(path = %path.display(), error = %e, "Failed to remove directory from index"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerator::WalkEnumerator;
    use crate::ignore_policy::IgnoreCheckError;
    use crate::indexer::progress::{ChannelObserver, IndexEvent};
    use crate::indexer::queue::MAX_RETRIES;
    use crate::lsp::{DocumentSymbol, LspError, Position, Range};
    use async_trait::async_trait;
    use std::collections::{BTreeSet, HashMap, HashSet};
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// One symbol per file, named after the file stem. Files whose name
    /// starts with "bad" always fail; "slow" ones hang.
    #[derive(Default)]
    struct FakeProvider {
        calls: parking_lot::Mutex<HashMap<PathBuf, usize>>,
    }

    impl FakeProvider {
        fn calls(&self, path: &Path) -> usize {
            self.calls.lock().get(path).copied().unwrap_or(0)
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().values().sum()
        }
    }

    #[async_trait]
    impl SymbolProvider for FakeProvider {
        async fn document_symbols(&self, path: &Path) -> Result<Vec<DocumentSymbol>, LspError> {
            *self.calls.lock().entry(path.to_path_buf()).or_insert(0) += 1;

            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if stem.starts_with("bad") {
                return Err(LspError::RpcError {
                    code: -32603,
                    message: "internal error".to_string(),
                });
            }
            if stem.starts_with("slow") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if path.extension().map_or(false, |e| e == "txt") {
                return Ok(vec![]);
            }

            let range = Range::new(Position::new(0, 0), Position::new(3, 1));
            Ok(vec![DocumentSymbol {
                name: stem,
                kind: 12,
                range,
                selection_range: range,
                detail: None,
                children: vec![],
                container_name: None,
            }])
        }
    }

    /// Pauses its indexer from inside the first extraction
    #[derive(Default)]
    struct PausingProvider {
        indexer: std::sync::OnceLock<SymbolIndexer>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SymbolProvider for PausingProvider {
        async fn document_symbols(&self, _path: &Path) -> Result<Vec<DocumentSymbol>, LspError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Some(indexer) = self.indexer.get() {
                    indexer.pause();
                }
            }
            Ok(vec![])
        }
    }

    struct FixedChecker(HashSet<String>);

    #[async_trait]
    impl IgnoreChecker for FixedChecker {
        async fn ignored(
            &self,
            _root: &Path,
            relative_paths: &[String],
        ) -> Result<HashSet<String>, IgnoreCheckError> {
            Ok(relative_paths
                .iter()
                .filter(|p| self.0.contains(*p))
                .cloned()
                .collect())
        }
    }

    struct Fixture {
        dir: TempDir,
        provider: Arc<FakeProvider>,
        indexer: SymbolIndexer,
        events: UnboundedReceiver<IndexEvent>,
    }

    fn settings() -> IndexSettings {
        IndexSettings {
            batch_size: 2,
            debounce_ms: 60_000,
            extraction_timeout_ms: 100,
            ..IndexSettings::default()
        }
    }

    fn fixture_with(files: &[&str], ignored: &[&str]) -> Fixture {
        let dir = TempDir::new().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("// {file}")).unwrap();
        }

        let provider = Arc::new(FakeProvider::default());
        let (observer, events) = ChannelObserver::new();
        let store = Arc::new(SymbolStore::in_memory().unwrap());
        let indexer = SymbolIndexer::builder(dir.path(), store)
            .settings(settings())
            .provider(provider.clone())
            .enumerator(Arc::new(WalkEnumerator))
            .ignore_checker(Arc::new(FixedChecker(
                ignored.iter().map(|s| s.to_string()).collect(),
            )))
            .observer(Arc::new(observer))
            .build();

        Fixture {
            dir,
            provider,
            indexer,
            events,
        }
    }

    fn fixture(files: &[&str]) -> Fixture {
        fixture_with(files, &[])
    }

    fn drain_events(rx: &mut UnboundedReceiver<IndexEvent>) -> Vec<IndexEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn snapshot(indexer: &SymbolIndexer) -> BTreeSet<(String, String)> {
        indexer
            .store()
            .get_files()
            .unwrap()
            .keys()
            .flat_map(|path| {
                indexer
                    .store()
                    .get_symbols_for_file(&path.to_string_lossy())
                    .unwrap()
            })
            .map(|s| (s.file_path, s.symbol.name))
            .collect()
    }

    fn assert_completed_once(events: &[IndexEvent]) {
        let completions = events.iter().filter(|e| **e == IndexEvent::Completed).count();
        assert_eq!(completions, 1, "events: {events:?}");
        assert_eq!(
            &events[events.len() - 2..],
            &[IndexEvent::Progress(100), IndexEvent::Completed]
        );
    }

    #[tokio::test]
    async fn test_sync_from_empty_indexes_everything() {
        let mut f = fixture(&["a.rs", "b.rs", "src/c.rs", "notes.txt", ".symdex/index.db"]);
        f.indexer.resume().await;

        let report = f.indexer.sync_index().await.unwrap();
        assert_eq!(report.scheduled, 4);
        assert_eq!(report.deleted, 0);
        assert_eq!(f.indexer.store().file_count().unwrap(), 4);
        // The text file is recorded with no symbols
        assert_eq!(f.indexer.store().symbol_count().unwrap(), 3);
        assert_eq!(f.indexer.queued_len(), 0);

        assert_completed_once(&drain_events(&mut f.events));
    }

    #[tokio::test]
    async fn test_second_sync_does_no_work() {
        let mut f = fixture(&["a.rs", "b.rs", "c.rs"]);
        f.indexer.resume().await;
        f.indexer.sync_index().await.unwrap();
        drain_events(&mut f.events);

        let report = f.indexer.sync_index().await.unwrap();
        assert_eq!(report.scheduled, 0);
        assert_eq!(f.provider.total_calls(), 3);
        assert_eq!(
            drain_events(&mut f.events),
            vec![IndexEvent::Progress(100), IndexEvent::Completed]
        );
    }

    #[tokio::test]
    async fn test_sync_deletes_vanished_files() {
        let f = fixture(&["keep.rs", "drop.rs"]);
        f.indexer.resume().await;
        f.indexer.sync_index().await.unwrap();

        fs::remove_file(f.dir.path().join("drop.rs")).unwrap();
        let report = f.indexer.sync_index().await.unwrap();

        assert_eq!(report.deleted, 1);
        let files = f.indexer.store().get_files().unwrap();
        assert!(files.contains_key(&f.dir.path().join("keep.rs")));
        assert!(!files.contains_key(&f.dir.path().join("drop.rs")));
    }

    #[tokio::test]
    async fn test_ignored_files_are_not_indexed() {
        let f = fixture_with(&["main.rs", "gen/out.rs", "node_modules/x.js"], &["gen/out.rs"]);
        f.indexer.resume().await;
        f.indexer.sync_index().await.unwrap();

        let files = f.indexer.store().get_files().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files.contains_key(&f.dir.path().join("main.rs")));
        assert_eq!(f.provider.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_file_is_retried_then_abandoned() {
        let mut f = fixture(&["bad.rs", "good.rs"]);
        f.indexer.resume().await;
        f.indexer.sync_index().await.unwrap();

        let bad = f.dir.path().join("bad.rs");
        assert_eq!(f.provider.calls(&bad), 1 + MAX_RETRIES as usize);
        assert_eq!(f.indexer.retry_count(&bad), MAX_RETRIES);
        assert_eq!(f.indexer.store().get_file_mtime(&bad.to_string_lossy()).unwrap(), None);
        assert_eq!(f.indexer.store().file_count().unwrap(), 1);
        assert_completed_once(&drain_events(&mut f.events));

        // Stays poisoned across incremental work
        f.indexer.enqueue(bad.clone());
        f.indexer.drain().await;
        assert_eq!(f.provider.calls(&bad), 2 + MAX_RETRIES as usize);
        assert_eq!(f.indexer.retry_count(&bad), MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_timeouts_count_as_failures() {
        let f = fixture(&["slow.rs"]);
        f.indexer.resume().await;
        f.indexer.sync_index().await.unwrap();

        let slow = f.dir.path().join("slow.rs");
        assert_eq!(f.provider.calls(&slow), 1 + MAX_RETRIES as usize);
        assert_eq!(f.indexer.retry_count(&slow), MAX_RETRIES);
        assert_eq!(f.indexer.store().file_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_write_failure_is_not_retried() {
        let mut f = fixture(&["a.rs", "b.txt"]);
        f.indexer
            .store()
            .execute_batch(
                "CREATE TRIGGER reject_symbols BEFORE INSERT ON symbols
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();
        f.indexer.resume().await;
        f.indexer.sync_index().await.unwrap();

        let a = f.dir.path().join("a.rs");
        assert_eq!(f.provider.calls(&a), 1);
        assert_eq!(f.indexer.retry_count(&a), 0);
        assert_eq!(f.indexer.queued_len(), 0);
        assert_eq!(f.indexer.store().get_file_mtime(&a.to_string_lossy()).unwrap(), None);
        // A file with no symbols never hits the trigger
        assert_eq!(f.indexer.store().file_count().unwrap(), 1);
        assert_completed_once(&drain_events(&mut f.events));
    }

    #[tokio::test]
    async fn test_pause_lets_the_batch_in_flight_finish() {
        let dir = TempDir::new().unwrap();
        for name in ["a.rs", "b.rs", "c.rs", "d.rs", "e.rs"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let provider = Arc::new(PausingProvider::default());
        let (observer, mut events) = ChannelObserver::new();
        let indexer = SymbolIndexer::builder(dir.path(), Arc::new(SymbolStore::in_memory().unwrap()))
            .settings(settings())
            .provider(provider.clone())
            .enumerator(Arc::new(WalkEnumerator))
            .ignore_checker(Arc::new(FixedChecker(HashSet::new())))
            .observer(Arc::new(observer))
            .build();
        assert!(provider.indexer.set(indexer.clone()).is_ok());

        indexer.resume().await;
        indexer.sync_index().await.unwrap();

        assert!(indexer.is_paused());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(indexer.store().file_count().unwrap(), 2);
        assert_eq!(indexer.queued_len(), 3);
        let drained = drain_events(&mut events);
        assert!(!drained.contains(&IndexEvent::Completed), "events: {drained:?}");

        indexer.resume().await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 5);
        assert_eq!(indexer.store().file_count().unwrap(), 5);
        assert_eq!(indexer.queued_len(), 0);
        assert_completed_once(&drain_events(&mut events));
    }

    #[tokio::test]
    async fn test_full_rebuild_matches_sync_from_empty() {
        let mut f = fixture(&["a.rs", "b.rs", "nested/c.rs", "d.txt"]);
        f.indexer.resume().await;
        f.indexer.sync_index().await.unwrap();
        let synced = snapshot(&f.indexer);
        drain_events(&mut f.events);

        let count = f.indexer.rebuild_index_full().await.unwrap();
        assert_eq!(count, 4);
        assert_eq!(snapshot(&f.indexer), synced);
        assert_eq!(f.provider.total_calls(), 8);

        let events = drain_events(&mut f.events);
        assert_eq!(events.first(), Some(&IndexEvent::RebuildStarting));
        assert_completed_once(&events);
    }

    #[tokio::test]
    async fn test_full_rebuild_clears_poisoned_paths() {
        let f = fixture(&["bad.rs"]);
        f.indexer.resume().await;
        f.indexer.sync_index().await.unwrap();
        let bad = f.dir.path().join("bad.rs");
        assert_eq!(f.indexer.retry_count(&bad), MAX_RETRIES);

        f.indexer.rebuild_index_full().await.unwrap();
        assert_eq!(f.provider.calls(&bad), 2 * (1 + MAX_RETRIES as usize));
    }

    #[tokio::test]
    async fn test_incremental_rebuild_skips_unchanged_files() {
        let f = fixture(&["a.rs", "b.rs"]);
        f.indexer.resume().await;
        f.indexer.sync_index().await.unwrap();

        let count = f.indexer.rebuild_index_incremental().await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(f.provider.total_calls(), 2);
        assert_eq!(f.indexer.store().file_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_enqueue_dedups_and_waits_while_paused() {
        let f = fixture(&["a.rs"]);
        let path = f.dir.path().join("a.rs");
        assert!(f.indexer.is_paused());

        for _ in 0..3 {
            f.indexer.enqueue(path.clone());
        }
        assert_eq!(f.indexer.queued_len(), 1);

        f.indexer.drain().await;
        assert_eq!(f.indexer.queued_len(), 1);
        assert_eq!(f.provider.total_calls(), 0);

        f.indexer.resume().await;
        assert_eq!(f.indexer.queued_len(), 0);
        assert_eq!(f.provider.calls(&path), 1);
    }

    #[tokio::test]
    async fn test_debounced_drain_runs_after_quiet_period() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.rs");
        fs::write(&file, "fn a() {}").unwrap();

        let provider = Arc::new(FakeProvider::default());
        let indexer = SymbolIndexer::builder(dir.path(), Arc::new(SymbolStore::in_memory().unwrap()))
            .settings(IndexSettings {
                debounce_ms: 20,
                ..settings()
            })
            .provider(provider.clone())
            .enumerator(Arc::new(WalkEnumerator))
            .ignore_checker(Arc::new(FixedChecker(HashSet::new())))
            .build();
        indexer.inner.paused.store(false, Ordering::Release);

        indexer.enqueue(file.clone());
        for _ in 0..100 {
            if provider.calls(&file) > 0 && indexer.queued_len() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(provider.calls(&file), 1);
        assert_eq!(indexer.store().file_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_independent_indexers_share_nothing() {
        let a = fixture(&["a.rs"]);
        let b = fixture(&["b.rs"]);
        a.indexer.resume().await;
        a.indexer.sync_index().await.unwrap();

        assert_eq!(a.indexer.store().file_count().unwrap(), 1);
        assert_eq!(b.indexer.store().file_count().unwrap(), 0);
        assert!(b.indexer.is_paused());
    }

    #[tokio::test]
    async fn test_open_store_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let settings = IndexSettings {
            database_path: Some(blocker.join("index.db")),
            ..IndexSettings::default()
        };

        let result = SymbolIndexer::open_store(dir.path(), &settings);
        assert!(matches!(result, Err(IndexError::StoreUnavailable { .. })));
    }
}
