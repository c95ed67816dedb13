//! LSP (Language Server Protocol) integration
//!
//! Language servers are the external symbol-analysis service: the indexer
//! asks them for the symbol tree of each file through `SymbolProvider`.
//! All LSP traffic is direct stdin/stdout IPC with the server process.

mod client;
mod manager;
mod provider;
pub mod types;

pub use client::LspClient;
pub use manager::{LspManager, LspServerConfig};
pub use provider::{LspSymbolProvider, SymbolProvider};
pub use types::{DocumentSymbol, Location, LspError, Position, Range, SymbolInformation};
