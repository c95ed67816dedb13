//! LSP type definitions and conversions
//!
//! Wire types for the subset of the protocol the indexer consumes, plus
//! the error type shared by every symbol provider.

use serde::{Deserialize, Serialize};

/// Error types for LSP operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LspError {
    /// Server not found or not running
    #[error("LSP server not found for: {0}")]
    ServerNotFound(String),
    /// Failed to spawn server process
    #[error("Failed to spawn LSP server: {0}")]
    SpawnFailed(String),
    /// Server initialization failed
    #[error("LSP initialization failed: {0}")]
    InitializationFailed(String),
    /// Request timed out
    #[error("LSP request timed out")]
    Timeout,
    /// JSON-RPC error from server
    #[error("LSP RPC error {code}: {message}")]
    RpcError { code: i32, message: String },
    /// Failed to parse response
    #[error("Failed to parse LSP response: {0}")]
    ParseError(String),
    /// Server shut down unexpectedly
    #[error("LSP server shut down unexpectedly")]
    ServerShutdown,
    /// IO error during communication
    #[error("LSP IO error: {0}")]
    IoError(String),
    /// No server is configured for this file type
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
}

impl From<std::io::Error> for LspError {
    fn from(err: std::io::Error) -> Self {
        LspError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for LspError {
    fn from(err: serde_json::Error) -> Self {
        LspError::ParseError(err.to_string())
    }
}

/// Tracked server capabilities
#[derive(Debug, Clone, Default)]
pub struct ServerCapabilities {
    /// Server supports textDocument/documentSymbol
    pub document_symbol: bool,
}

impl ServerCapabilities {
    /// Create capabilities from LSP InitializeResult
    pub fn from_initialize_result(result: &serde_json::Value) -> Self {
        let caps = result.get("capabilities").unwrap_or(result);

        Self {
            document_symbol: caps
                .get("documentSymbolProvider")
                .map(|v| match v {
                    serde_json::Value::Bool(b) => *b,
                    serde_json::Value::Null => false,
                    _ => true,
                })
                .unwrap_or(false),
        }
    }
}

/// LSP Position (0-indexed line and character)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// LSP Range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// LSP Location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

/// LSP DocumentSymbol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSymbol {
    pub name: String,
    pub kind: i32,
    pub range: Range,
    pub selection_range: Range,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DocumentSymbol>,
    /// Only set for symbols converted from the flat result shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

/// LSP SymbolInformation (the flat, older documentSymbol result shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInformation {
    pub name: String,
    pub kind: i32,
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

impl From<SymbolInformation> for DocumentSymbol {
    fn from(info: SymbolInformation) -> Self {
        Self {
            name: info.name,
            kind: info.kind,
            range: info.location.range,
            selection_range: info.location.range,
            detail: None,
            children: Vec::new(),
            container_name: info.container_name.filter(|c| !c.is_empty()),
        }
    }
}

/// Decode a `textDocument/documentSymbol` result.
///
/// Servers answer with either `DocumentSymbol[]` or `SymbolInformation[]`;
/// the flat form is converted to childless document symbols.
pub fn parse_document_symbols(value: serde_json::Value) -> Result<Vec<DocumentSymbol>, LspError> {
    let Some(items) = value.as_array() else {
        return Ok(vec![]);
    };

    let is_flat = items.first().is_some_and(|v| v.get("location").is_some());
    if is_flat {
        let infos: Vec<SymbolInformation> = serde_json::from_value(value)?;
        Ok(infos.into_iter().map(DocumentSymbol::from).collect())
    } else {
        serde_json::from_value(value).map_err(LspError::from)
    }
}
