//! LSP Server Manager
//!
//! Manages lifecycle and configuration of multiple language servers.
//! Each language can have its own server with specific configuration.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::client::{LspClient, ProcessHandle};
use super::types::{DocumentSymbol, LspError};

/// Configuration for spawning a language server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LspServerConfig {
    /// Command to run (e.g., "typescript-language-server")
    pub command: String,
    /// Command line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Language ID for textDocument/didOpen
    pub language_id: String,
    /// File extensions this server handles
    pub extensions: Vec<String>,
}

impl LspServerConfig {
    /// Create config for TypeScript/JavaScript
    pub fn typescript() -> Self {
        Self {
            command: "typescript-language-server".to_string(),
            args: vec!["--stdio".to_string()],
            language_id: "typescript".to_string(),
            extensions: vec![
                "ts".to_string(),
                "tsx".to_string(),
                "js".to_string(),
                "jsx".to_string(),
            ],
        }
    }

    /// Create config for Python (pylsp)
    pub fn python() -> Self {
        Self {
            command: "pylsp".to_string(),
            args: vec![],
            language_id: "python".to_string(),
            extensions: vec!["py".to_string()],
        }
    }

    /// Create config for Rust (rust-analyzer)
    pub fn rust() -> Self {
        Self {
            command: "rust-analyzer".to_string(),
            args: vec![],
            language_id: "rust".to_string(),
            extensions: vec!["rs".to_string()],
        }
    }

    /// The servers registered when settings name none
    pub fn defaults() -> HashMap<String, LspServerConfig> {
        HashMap::from([
            ("typescript".to_string(), Self::typescript()),
            ("python".to_string(), Self::python()),
            ("rust".to_string(), Self::rust()),
        ])
    }
}

/// One language's server slot.
///
/// `client` is held for the whole of a request, so requests to one
/// language are serialized. `process` is only ever held briefly, which
/// lets another thread kill a server whose request hangs.
#[derive(Default)]
struct LanguageServer {
    client: Mutex<Option<LspClient>>,
    process: Mutex<Option<ProcessHandle>>,
    /// Set once the server answered `initialize`
    ready: AtomicBool,
}

/// Language server manager
///
/// Starts servers lazily, one per language, and routes each file to the
/// server registered for its extension. A server that fails to start is
/// remembered and its language is treated as unsupported from then on.
/// Languages never wait on each other.
pub struct LspManager {
    /// Server configurations
    configs: HashMap<String, LspServerConfig>,
    /// Extension to language mapping
    extension_map: HashMap<String, String>,
    /// Live server slots by language
    servers: Mutex<HashMap<String, Arc<LanguageServer>>>,
    /// Languages whose server could not be started
    failed: Mutex<HashSet<String>>,
    /// Workspace root URI
    workspace_root: String,
}

impl LspManager {
    /// Create a new LSP manager for a workspace
    pub fn new(workspace_root: &str, configs: HashMap<String, LspServerConfig>) -> Self {
        let mut manager = Self {
            configs: HashMap::new(),
            extension_map: HashMap::new(),
            servers: Mutex::new(HashMap::new()),
            failed: Mutex::new(HashSet::new()),
            workspace_root: path_to_uri(workspace_root),
        };

        for (language, config) in configs {
            manager.register_config(&language, config);
        }

        manager
    }

    /// Register a server configuration
    pub fn register_config(&mut self, language: &str, config: LspServerConfig) {
        for ext in &config.extensions {
            self.extension_map.insert(ext.clone(), language.to_string());
        }
        self.configs.insert(language.to_string(), config);
    }

    /// Get the language for a file path
    pub fn language_for_file(&self, file_path: &str) -> Option<String> {
        let ext = Path::new(file_path).extension().and_then(|e| e.to_str())?;
        self.extension_map.get(ext).cloned()
    }

    /// Whether the language's server could not be started
    pub fn is_failed(&self, language: &str) -> bool {
        self.failed.lock().contains(language)
    }

    /// Check if a server slot exists for the language
    pub fn is_running(&self, language: &str) -> bool {
        self.servers.lock().contains_key(language)
    }

    fn slot(&self, language: &str) -> Result<Arc<LanguageServer>, LspError> {
        if self.is_failed(language) || !self.configs.contains_key(language) {
            return Err(LspError::UnsupportedLanguage(language.to_string()));
        }
        let mut servers = self.servers.lock();
        Ok(Arc::clone(servers.entry(language.to_string()).or_default()))
    }

    fn mark_failed(&self, language: &str, server: &Arc<LanguageServer>, error: &LspError) {
        warn!(language, error = %error, "Language server unavailable; files of this language index empty");
        self.failed.lock().insert(language.to_string());
        self.remove_slot(language, server);
    }

    /// Drop the slot if it is still the current one for the language
    fn remove_slot(&self, language: &str, server: &Arc<LanguageServer>) {
        let mut servers = self.servers.lock();
        if servers.get(language).is_some_and(|s| Arc::ptr_eq(s, server)) {
            servers.remove(language);
        }
    }

    fn start(&self, language: &str, server: &LanguageServer) -> Result<LspClient, LspError> {
        let config = self
            .configs
            .get(language)
            .ok_or_else(|| LspError::UnsupportedLanguage(language.to_string()))?;

        info!(language, command = %config.command, "Starting language server");

        let args: Vec<&str> = config.args.iter().map(|s| s.as_str()).collect();
        let mut client = LspClient::new(
            &config.command,
            &args,
            &self.workspace_root,
            &config.language_id,
        )?;
        // Registered before initialize so a hung handshake can be killed too
        *server.process.lock() = Some(client.process_handle());

        client.initialize()?;
        server.ready.store(true, Ordering::Release);
        info!(language, "Language server initialized");
        Ok(client)
    }

    /// Open the file, request its symbols and close it again.
    ///
    /// Blocks while another request to the same language is in flight.
    pub fn document_symbols(
        &self,
        file_path: &str,
        content: &str,
    ) -> Result<Vec<DocumentSymbol>, LspError> {
        let language = self
            .language_for_file(file_path)
            .ok_or_else(|| LspError::UnsupportedLanguage(file_path.to_string()))?;

        let server = self.slot(&language)?;
        let mut guard = server.client.lock();

        if guard.is_none() {
            match self.start(&language, &server) {
                Ok(client) => *guard = Some(client),
                Err(e) => {
                    self.mark_failed(&language, &server, &e);
                    return Err(LspError::UnsupportedLanguage(language));
                }
            }
        }
        let client = guard
            .as_mut()
            .ok_or_else(|| LspError::ServerNotFound(language.clone()))?;

        let uri = path_to_uri(file_path);
        let symbols = client
            .did_open(&uri, content)
            .and_then(|()| client.document_symbols(&uri));
        let _ = client.did_close(&uri);

        if matches!(symbols, Err(LspError::ServerShutdown | LspError::IoError(_))) {
            // Dead or killed; the next request starts a fresh server
            self.remove_slot(&language, &server);
        }
        symbols
    }

    /// Kill a language's server without waiting for its request lock.
    ///
    /// The next request starts a new server, unless this one never finished
    /// starting, in which case the language is marked failed.
    pub fn evict(&self, language: &str) {
        let Some(server) = self.servers.lock().remove(language) else {
            return;
        };

        if !server.ready.load(Ordering::Acquire) {
            self.failed.lock().insert(language.to_string());
        }
        if let Some(process) = server.process.lock().take() {
            let _ = process.lock().kill();
        }
        warn!(language, "Evicted unresponsive language server");
    }

    /// Stop a language server
    pub fn stop_server(&self, language: &str) -> Result<(), LspError> {
        let Some(server) = self.servers.lock().remove(language) else {
            return Ok(());
        };
        if let Some(mut client) = server.client.lock().take() {
            client.shutdown()?;
            info!(language, "Language server stopped");
        }
        Ok(())
    }

    /// Stop all servers
    pub fn stop_all(&self) {
        let languages: Vec<_> = self.servers.lock().keys().cloned().collect();
        for lang in languages {
            let _ = self.stop_server(&lang);
        }
    }
}

impl Drop for LspManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Convert a file path to a file:// URI
fn path_to_uri(path: &str) -> String {
    if path.starts_with("file://") {
        path.to_string()
    } else {
        format!("file://{}", path)
    }
}
