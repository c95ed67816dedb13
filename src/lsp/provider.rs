//! Symbol providers
//!
//! The indexer only needs one thing from the outside world: the symbol
//! tree of a file. `SymbolProvider` is that seam; `LspSymbolProvider`
//! answers it with language servers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::manager::{LspManager, LspServerConfig};
use super::types::{DocumentSymbol, LspError};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of (possibly nested) symbol trees for files
#[async_trait]
pub trait SymbolProvider: Send + Sync {
    /// Symbols declared in `path`. An empty list is a valid answer.
    async fn document_symbols(&self, path: &Path) -> Result<Vec<DocumentSymbol>, LspError>;
}

/// Symbol provider backed by stdio language servers.
///
/// Server I/O is blocking, so each request runs on tokio's blocking pool.
/// Files with no configured (or no working) server yield no symbols
/// without touching any server. A request that times out, or whose caller
/// gives up on it, kills its language's server.
pub struct LspSymbolProvider {
    manager: Arc<LspManager>,
    request_timeout: Duration,
}

impl LspSymbolProvider {
    pub fn new(workspace_root: &Path, servers: HashMap<String, LspServerConfig>) -> Self {
        let manager = LspManager::new(workspace_root.to_string_lossy().as_ref(), servers);
        Self {
            manager: Arc::new(manager),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Evicts a language's server unless disarmed before it drops
struct EvictOnDrop<'a> {
    manager: &'a LspManager,
    language: &'a str,
    armed: bool,
}

impl Drop for EvictOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.manager.evict(self.language);
        }
    }
}

#[async_trait]
impl SymbolProvider for LspSymbolProvider {
    async fn document_symbols(&self, path: &Path) -> Result<Vec<DocumentSymbol>, LspError> {
        let path_str = path.to_string_lossy().into_owned();
        let Some(language) = self.manager.language_for_file(&path_str) else {
            return Ok(vec![]);
        };
        if self.manager.is_failed(&language) {
            return Ok(vec![]);
        }

        let bytes = tokio::fs::read(path).await?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        let manager = Arc::clone(&self.manager);
        let path: PathBuf = path.to_path_buf();

        let mut eviction = EvictOnDrop {
            manager: &self.manager,
            language: &language,
            armed: true,
        };
        let task = tokio::task::spawn_blocking(move || {
            manager.document_symbols(path.to_string_lossy().as_ref(), &content)
        });

        let result = match tokio::time::timeout(self.request_timeout, task).await {
            Ok(joined) => {
                eviction.armed = false;
                joined.map_err(|e| LspError::IoError(e.to_string()))?
            }
            Err(_) => return Err(LspError::Timeout),
        };

        match result {
            Err(LspError::UnsupportedLanguage(_)) => Ok(vec![]),
            other => other,
        }
    }
}
