//! Symbol Index
//!
//! Persistent storage and point queries for code symbols extracted by a
//! language server. Uses SQLite with a cascading file → symbols relation.
//!
//! Query shapes served:
//! - enclosing symbol of a (file, line)
//! - symbols by exact name, in bounded batches
//! - symbols by name prefix

pub mod store;
mod symbol;

pub use store::{FileEntry, StoreError, SymbolStore, NAME_QUERY_CHUNK};
pub use symbol::{flatten_symbols, IndexedSymbol, StoredSymbol, SymbolKind};
