//! Incremental indexing
//!
//! Keeps a `SymbolStore` in step with the files under a project root:
//! a warm-start reconciler schedules what changed while we were away, a
//! watcher schedules what changes while we run, and a debounced queue
//! feeds batches to the worker.

mod engine;
mod progress;
mod queue;
mod reconciler;
mod watcher;
mod worker;

use std::path::PathBuf;

use crate::symbol_index::StoreError;

pub use engine::{SymbolIndexer, SymbolIndexerBuilder, SyncReport};
pub use progress::{progress_percent, ChannelObserver, IndexEvent, IndexObserver, NoopObserver};
pub use queue::{IndexQueue, RetryDecision, MAX_RETRIES};
pub use reconciler::{plan_sync, stat_files, SyncPlan};
pub use watcher::{classify_event, FileChange, IndexWatcher};
pub use worker::{mtime_millis, WorkOutcome, Worker, UNKNOWN_MTIME};

/// Indexing errors
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Symbol store unavailable at {path}: {source}")]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
    #[error("Symbol store error: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to enumerate files: {0}")]
    Enumeration(String),
    #[error("Failed to watch files: {0}")]
    Watch(#[from] notify::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
