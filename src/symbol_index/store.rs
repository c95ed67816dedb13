//! Symbol storage using SQLite
//!
//! Two tables: `files`, one row per indexed path, and `symbols`, owned by
//! a file row through an `ON DELETE CASCADE` foreign key. Every mutation
//! of a file's symbol set happens inside a single transaction.

use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::symbol::{IndexedSymbol, StoredSymbol};
use crate::lsp::{Position, Range};

/// Upper bound on bound parameters in a single name lookup statement.
///
/// Kept well below SQLite's historical limit of 999 host parameters.
pub const NAME_QUERY_CHUNK: usize = 400;

const SYMBOL_COLUMNS: &str = r#"
    s.id, f.path, s.name, s.detail, s.kind,
    s.range_start_line, s.range_start_col, s.range_end_line, s.range_end_col,
    s.sel_start_line, s.sel_start_col, s.sel_end_line, s.sel_end_col,
    s.container_name
"#;

/// Stored state of one file, as needed by the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry {
    /// Modification time recorded at the last successful index (ms)
    pub mtime: i64,
}

/// SQLite-backed symbol store
pub struct SymbolStore {
    conn: Mutex<Connection>,
}

impl SymbolStore {
    /// Open (or create) a symbol store at the given path
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// Create an in-memory symbol store (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                mtime INTEGER NOT NULL,
                indexed_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS symbols (
                id INTEGER PRIMARY KEY,
                file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                detail TEXT NOT NULL,
                kind INTEGER NOT NULL,
                range_start_line INTEGER NOT NULL,
                range_start_col INTEGER NOT NULL,
                range_end_line INTEGER NOT NULL,
                range_end_col INTEGER NOT NULL,
                sel_start_line INTEGER NOT NULL,
                sel_start_col INTEGER NOT NULL,
                sel_end_line INTEGER NOT NULL,
                sel_end_col INTEGER NOT NULL,
                container_name TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
            CREATE INDEX IF NOT EXISTS idx_symbols_file_lines
                ON symbols(file_id, range_start_line, range_end_line);
            "#,
        )?;

        Ok(())
    }

    /// Replace the symbol set of a file and record its mtime, atomically
    pub fn upsert_file_and_symbols(
        &self,
        path: &str,
        mtime: i64,
        symbols: &[IndexedSymbol],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let now = chrono::Utc::now().timestamp_millis();

        // ON CONFLICT keeps the row id; REPLACE would cascade-delete first.
        let file_id: i64 = tx.query_row(
            r#"
            INSERT INTO files (path, mtime, indexed_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(path) DO UPDATE SET mtime = excluded.mtime, indexed_at = excluded.indexed_at
            RETURNING id
            "#,
            params![path, mtime, now],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM symbols WHERE file_id = ?1", params![file_id])?;

        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO symbols
                (file_id, name, detail, kind,
                 range_start_line, range_start_col, range_end_line, range_end_col,
                 sel_start_line, sel_start_col, sel_end_line, sel_end_col,
                 container_name)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )?;

            for symbol in symbols {
                stmt.execute(params![
                    file_id,
                    symbol.name,
                    symbol.detail,
                    symbol.kind,
                    symbol.range.start.line,
                    symbol.range.start.character,
                    symbol.range.end.line,
                    symbol.range.end.character,
                    symbol.selection_range.start.line,
                    symbol.selection_range.start.character,
                    symbol.selection_range.end.line,
                    symbol.selection_range.end.character,
                    symbol.container_name,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Modification time recorded for a file, if it has been indexed
    pub fn get_file_mtime(&self, path: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.conn.lock();
        let mtime = conn
            .query_row(
                "SELECT mtime FROM files WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(mtime)
    }

    /// Remove a file; its symbols go with it through the cascade.
    ///
    /// Returns whether a row was removed.
    pub fn delete_file(&self, path: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let count = conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(count > 0)
    }

    /// Remove every file below directory `dir`, at any depth.
    ///
    /// `dir` itself is not removed. Returns the number of file rows deleted.
    pub fn delete_files_under(&self, dir: &str) -> Result<usize, StoreError> {
        let prefix = format!(
            "{}{}",
            dir.trim_end_matches(std::path::MAIN_SEPARATOR),
            std::path::MAIN_SEPARATOR
        );
        let pattern = format!("{}%", escape_like(&prefix));
        let conn = self.conn.lock();
        // LIKE folds ASCII case, so the prefix is compared exactly as well
        let count = conn.execute(
            r#"DELETE FROM files
               WHERE path LIKE ?1 ESCAPE '\'
                 AND substr(path, 1, ?2) = ?3"#,
            params![pattern, prefix.chars().count() as i64, prefix],
        )?;
        Ok(count)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    /// All symbols of a file, in no particular order
    pub fn get_symbols_for_file(&self, path: &str) -> Result<Vec<StoredSymbol>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM symbols s JOIN files f ON f.id = s.file_id WHERE f.path = ?1",
            SYMBOL_COLUMNS
        ))?;

        let symbols = stmt
            .query_map(params![path], row_to_symbol)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(symbols)
    }

    /// Symbols whose name is exactly one of `names`
    pub fn find_symbols_by_names(&self, names: &[String]) -> Result<Vec<StoredSymbol>, StoreError> {
        self.find_symbols_by_names_chunked(names, NAME_QUERY_CHUNK)
    }

    /// Like [`find_symbols_by_names`](Self::find_symbols_by_names) with an
    /// explicit number of names per statement.
    pub fn find_symbols_by_names_chunked(
        &self,
        names: &[String],
        chunk_size: usize,
    ) -> Result<Vec<StoredSymbol>, StoreError> {
        let chunk_size = chunk_size.clamp(1, NAME_QUERY_CHUNK);

        let mut seen = HashSet::new();
        let unique: Vec<&String> = names.iter().filter(|n| seen.insert(n.as_str())).collect();

        let conn = self.conn.lock();
        let mut results = Vec::new();
        let mut seen_ids = HashSet::new();

        for chunk in unique.chunks(chunk_size) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM symbols s JOIN files f ON f.id = s.file_id WHERE s.name IN ({})",
                SYMBOL_COLUMNS, placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), row_to_symbol)?;
            for row in rows {
                let symbol = row?;
                if seen_ids.insert(symbol.id) {
                    results.push(symbol);
                }
            }
        }

        Ok(results)
    }

    /// Symbols whose name starts with `prefix`
    pub fn search_by_name_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<StoredSymbol>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            r#"
            SELECT {} FROM symbols s JOIN files f ON f.id = s.file_id
            WHERE s.name LIKE ?1 ESCAPE '\'
            ORDER BY s.name
            LIMIT ?2
            "#,
            SYMBOL_COLUMNS
        ))?;

        let pattern = format!("{}%", escape_like(prefix));
        let symbols = stmt
            .query_map(params![pattern, limit as i64], row_to_symbol)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(symbols)
    }

    /// Innermost symbol whose full range covers `line`.
    ///
    /// The smallest line span wins; equal spans fall back to the smaller
    /// column span, then to the later start.
    pub fn find_enclosing_symbol(
        &self,
        path: &str,
        line: u32,
    ) -> Result<Option<StoredSymbol>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            r#"
            SELECT {} FROM symbols s JOIN files f ON f.id = s.file_id
            WHERE f.path = ?1
              AND s.range_start_line <= ?2 AND s.range_end_line >= ?2
            ORDER BY (s.range_end_line - s.range_start_line),
                     (s.range_end_col - s.range_start_col),
                     s.range_start_line DESC, s.range_start_col DESC
            LIMIT 1
            "#,
            SYMBOL_COLUMNS
        ))?;

        let symbol = stmt
            .query_row(params![path, line], row_to_symbol)
            .optional()?;
        Ok(symbol)
    }

    /// Snapshot of every indexed file and its recorded mtime
    pub fn get_files(&self) -> Result<HashMap<PathBuf, FileEntry>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT path, mtime FROM files")?;
        let files = stmt
            .query_map([], |row| {
                let path: String = row.get(0)?;
                let mtime: i64 = row.get(1)?;
                Ok((PathBuf::from(path), FileEntry { mtime }))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(files)
    }

    /// Delete all files and symbols
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM symbols", [])?;
        tx.execute("DELETE FROM files", [])?;
        tx.commit()?;
        Ok(())
    }

    /// Get total symbol count
    pub fn symbol_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM symbols", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Get count of indexed files
    pub fn file_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Convert a database row to a StoredSymbol
fn row_to_symbol(row: &rusqlite::Row) -> rusqlite::Result<StoredSymbol> {
    let pos = |line: usize, col: usize| -> rusqlite::Result<Position> {
        Ok(Position::new(row.get::<_, u32>(line)?, row.get::<_, u32>(col)?))
    };

    Ok(StoredSymbol {
        id: row.get(0)?,
        file_path: row.get(1)?,
        symbol: IndexedSymbol {
            name: row.get(2)?,
            detail: row.get(3)?,
            kind: row.get(4)?,
            range: Range::new(pos(5, 6)?, pos(7, 8)?),
            selection_range: Range::new(pos(9, 10)?, pos(11, 12)?),
            container_name: row.get(13)?,
        },
    })
}

/// Error type for symbol store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
