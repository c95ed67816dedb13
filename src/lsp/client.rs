//! LSP JSON-RPC client
//!
//! Handles low-level JSON-RPC 2.0 communication with language servers
//! via stdin/stdout pipes.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::types::{parse_document_symbols, DocumentSymbol, LspError, ServerCapabilities};

/// JSON-RPC request ID type
pub type RequestId = i64;

/// Shared handle to a server process, usable while a request is blocked
pub type ProcessHandle = Arc<Mutex<Child>>;

/// LSP Client for communicating with a language server
pub struct LspClient {
    /// Server process
    process: ProcessHandle,
    /// Stdin for sending requests
    stdin: ChildStdin,
    /// Buffered stdout; kept across requests so no bytes are dropped
    stdout: BufReader<ChildStdout>,
    /// Server capabilities after initialization
    pub capabilities: ServerCapabilities,
    /// Next request ID
    next_id: AtomicI64,
    /// Root URI of the workspace
    root_uri: String,
    /// Language ID (e.g., "typescript", "python")
    language_id: String,
}

impl LspClient {
    /// Create a new LSP client by spawning a language server
    pub fn new(
        command: &str,
        args: &[&str],
        root_uri: &str,
        language_id: &str,
    ) -> Result<Self, LspError> {
        let mut process = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| LspError::SpawnFailed(format!("{}: {}", command, e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| LspError::SpawnFailed("Failed to open stdin".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| LspError::SpawnFailed("Failed to open stdout".to_string()))?;

        Ok(Self {
            process: Arc::new(Mutex::new(process)),
            stdin,
            stdout: BufReader::new(stdout),
            capabilities: ServerCapabilities::default(),
            next_id: AtomicI64::new(1),
            root_uri: root_uri.to_string(),
            language_id: language_id.to_string(),
        })
    }

    /// Handle that can kill the server from another thread. A request
    /// blocked on the killed server fails with `ServerShutdown`.
    pub fn process_handle(&self) -> ProcessHandle {
        Arc::clone(&self.process)
    }

    /// Initialize the LSP server (must be called before any other requests)
    pub fn initialize(&mut self) -> Result<(), LspError> {
        let params = json!({
            "processId": std::process::id(),
            "rootUri": self.root_uri,
            "capabilities": {
                "textDocument": {
                    "documentSymbol": {
                        "hierarchicalDocumentSymbolSupport": true
                    },
                    "synchronization": {
                        "didSave": false
                    }
                },
                "workspace": {
                    "workspaceFolders": true
                }
            },
            "workspaceFolders": [{
                "uri": self.root_uri,
                "name": "workspace"
            }]
        });

        let response = self
            .send_request_sync("initialize", params)
            .map_err(|e| LspError::InitializationFailed(e.to_string()))?;
        self.capabilities = ServerCapabilities::from_initialize_result(&response);

        self.send_notification("initialized", json!({}))?;

        Ok(())
    }

    /// Send a request and block until its response arrives
    pub fn send_request_sync(&mut self, method: &str, params: Value) -> Result<Value, LspError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });

        self.write_message(&request)?;
        self.read_response_sync(id)
    }

    /// Send a notification (no response expected)
    pub fn send_notification(&mut self, method: &str, params: Value) -> Result<(), LspError> {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });

        self.write_message(&notification)
    }

    /// Open a text document
    pub fn did_open(&mut self, uri: &str, content: &str) -> Result<(), LspError> {
        let language_id = self.language_id.clone();
        self.send_notification(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": language_id,
                    "version": 1,
                    "text": content
                }
            }),
        )
    }

    /// Close a text document
    pub fn did_close(&mut self, uri: &str) -> Result<(), LspError> {
        self.send_notification(
            "textDocument/didClose",
            json!({
                "textDocument": {
                    "uri": uri
                }
            }),
        )
    }

    /// Get document symbols
    pub fn document_symbols(&mut self, uri: &str) -> Result<Vec<DocumentSymbol>, LspError> {
        if !self.capabilities.document_symbol {
            return Ok(vec![]);
        }

        let params = json!({
            "textDocument": { "uri": uri }
        });

        let response = self.send_request_sync("textDocument/documentSymbol", params)?;
        parse_document_symbols(response)
    }

    /// Shutdown the server gracefully
    pub fn shutdown(&mut self) -> Result<(), LspError> {
        let _ = self.send_request_sync("shutdown", Value::Null);
        let _ = self.send_notification("exit", Value::Null);
        let _ = self.process.lock().wait();
        Ok(())
    }

    /// Write a JSON-RPC message to the server
    fn write_message(&mut self, message: &Value) -> Result<(), LspError> {
        let content = serde_json::to_string(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", content.len());

        self.stdin.write_all(header.as_bytes())?;
        self.stdin.write_all(content.as_bytes())?;
        self.stdin.flush()?;

        Ok(())
    }

    /// Read messages until the response for `expected_id` arrives
    fn read_response_sync(&mut self, expected_id: RequestId) -> Result<Value, LspError> {
        loop {
            let message = read_message(&mut self.stdout)?;

            if let Some(id) = message.get("id").and_then(|v| v.as_i64()) {
                if id == expected_id && message.get("method").is_none() {
                    if let Some(error) = message.get("error") {
                        let code = error.get("code").and_then(|v| v.as_i64()).unwrap_or(-1) as i32;
                        let msg = error
                            .get("message")
                            .and_then(|v| v.as_str())
                            .unwrap_or("Unknown error")
                            .to_string();
                        return Err(LspError::RpcError { code, message: msg });
                    }

                    return Ok(message.get("result").cloned().unwrap_or(Value::Null));
                }

                // Server-to-client request (e.g. workDoneProgress/create): acknowledge it
                if message.get("method").is_some() {
                    let reply = json!({ "jsonrpc": "2.0", "id": id, "result": Value::Null });
                    self.write_message(&reply)?;
                }
                continue;
            }

            if let Some(method) = message.get("method").and_then(|v| v.as_str()) {
                trace!(method, "LSP notification");
            }
        }
    }
}

/// Read one `Content-Length` framed message
fn read_message<R: BufRead>(reader: &mut R) -> Result<Value, LspError> {
    let mut content_length = 0;
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            return Err(LspError::ServerShutdown);
        }
        let line = line.trim();

        if line.is_empty() {
            break;
        }

        if let Some(len_str) = line.strip_prefix("Content-Length: ") {
            content_length = len_str
                .parse()
                .map_err(|_| LspError::ParseError("Invalid Content-Length".to_string()))?;
        }
    }

    if content_length == 0 {
        return Err(LspError::ParseError("Missing Content-Length".to_string()));
    }

    let mut content = vec![0u8; content_length];
    reader.read_exact(&mut content)?;

    Ok(serde_json::from_slice(&content)?)
}

impl Drop for LspClient {
    fn drop(&mut self) {
        debug!(language = %self.language_id, "Shutting down language server");
        let _ = self.shutdown();
    }
}
