pub mod config;
pub mod enumerator;
pub mod ignore_policy;
pub mod indexer;
pub mod logging;
pub mod lsp;
pub mod symbol_index;

pub use config::IndexSettings;
pub use indexer::{IndexError, IndexEvent, IndexObserver, SymbolIndexer};
pub use symbol_index::{StoredSymbol, SymbolStore};
