use parking_lot::Mutex;
use std::fs::Metadata;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tracing::debug;

use super::queue::IndexQueue;
use super::IndexError;
use crate::lsp::SymbolProvider;
use crate::symbol_index::{flatten_symbols, SymbolStore};

/// Result of indexing a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The file is gone or unreadable
    Vanished,
    /// The stored copy is at least as new as the file
    Unchanged,
    /// Extraction timed out or errored; the store was not touched
    Failed(String),
    /// Symbols were written
    Indexed { symbols: usize },
}

/// Stored for files whose mtime the platform cannot report. It is older
/// than any real mtime, so such files never look current.
pub const UNKNOWN_MTIME: i64 = i64::MIN;

/// Modification time in milliseconds since the epoch, negative before it.
/// `None` when the platform has no mtime for the file.
pub fn mtime_millis(metadata: &Metadata) -> Option<i64> {
    let modified = metadata.modified().ok()?;
    match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).ok(),
        Err(e) => i64::try_from(e.duration().as_millis()).ok().map(|ms| -ms),
    }
}

/// Whether a stored copy can stand in for the live file.
/// An unknown mtime on either side always means reindex.
fn is_current(stored: Option<i64>, live: Option<i64>) -> bool {
    match (stored, live) {
        (Some(stored), Some(live)) => stored != UNKNOWN_MTIME && stored >= live,
        _ => false,
    }
}

/// Indexes one file at a time against a shared store and provider
pub struct Worker {
    store: Arc<SymbolStore>,
    provider: Arc<dyn SymbolProvider>,
    queue: Arc<Mutex<IndexQueue>>,
    timeout: Duration,
}

impl Worker {
    pub fn new(
        store: Arc<SymbolStore>,
        provider: Arc<dyn SymbolProvider>,
        queue: Arc<Mutex<IndexQueue>>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            queue,
            timeout,
        }
    }

    /// Bring the stored symbols of `path` up to date.
    ///
    /// Only a store write failure is an error; everything else is an outcome.
    pub async fn index_file(&self, path: &Path) -> Result<WorkOutcome, IndexError> {
        let live_mtime = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => mtime_millis(&metadata),
            _ => return Ok(WorkOutcome::Vanished),
        };
        if live_mtime.is_none() {
            debug!(path = %path.display(), "No mtime available, reindexing");
        }

        let key = path.to_string_lossy();
        if is_current(self.store.get_file_mtime(&key)?, live_mtime) {
            debug!(path = %path.display(), "Skipping unchanged file");
            return Ok(WorkOutcome::Unchanged);
        }

        let tree = match tokio::time::timeout(self.timeout, self.provider.document_symbols(path)).await
        {
            Ok(Ok(tree)) => tree,
            Ok(Err(e)) => return Ok(WorkOutcome::Failed(e.to_string())),
            Err(_) => {
                return Ok(WorkOutcome::Failed(format!(
                    "extraction timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        };

        let symbols = flatten_symbols(&tree);
        self.queue.lock().clear_retry(path);
        self.store
            .upsert_file_and_symbols(&key, live_mtime.unwrap_or(UNKNOWN_MTIME), &symbols)?;

        debug!(path = %path.display(), symbols = symbols.len(), "Indexed file");
        Ok(WorkOutcome::Indexed {
            symbols: symbols.len(),
        })
    }
}
