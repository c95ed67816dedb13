use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::lsp::LspServerConfig;

/// Hard ceiling on paths dispatched to the symbol provider at once
pub const MAX_BATCH_SIZE: usize = 50;

/// Name of the per-project data directory
pub const DATA_DIR: &str = ".symdex";

/// Indexer settings stored in .symdex/settings.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Paths sent to the symbol provider concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Glob patterns a file must match to be indexed
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    /// Glob patterns that exclude a file from indexing
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Quiet period after the last enqueue before draining
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Budget for one symbol extraction call
    #[serde(default = "default_extraction_timeout_ms")]
    pub extraction_timeout_ms: u64,
    /// Allowed mtime drift before a warm start re-indexes a file
    #[serde(default = "default_mtime_tolerance_ms")]
    pub mtime_tolerance_ms: i64,
    /// Override for the index database location
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Language servers by language name
    #[serde(default = "LspServerConfig::defaults")]
    pub servers: HashMap<String, LspServerConfig>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            include: default_include(),
            exclude: Vec::new(),
            debounce_ms: default_debounce_ms(),
            extraction_timeout_ms: default_extraction_timeout_ms(),
            mtime_tolerance_ms: default_mtime_tolerance_ms(),
            database_path: None,
            servers: LspServerConfig::defaults(),
        }
    }
}

impl IndexSettings {
    /// Batch size clamped to `1..=MAX_BATCH_SIZE`
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms)
    }

    /// Database location for a project root
    pub fn database_path(&self, project_path: &Path) -> PathBuf {
        match &self.database_path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => project_path.join(p),
            None => get_data_dir(project_path).join("index.db"),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_include() -> Vec<String> {
    vec!["**/*".to_string()]
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_extraction_timeout_ms() -> u64 {
    5000
}

fn default_mtime_tolerance_ms() -> i64 {
    1000
}

/// Errors while reading or writing settings
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Settings file does not exist: {0}")]
    Missing(PathBuf),
    #[error("Failed to access settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Get the .symdex directory path for a project
pub fn get_data_dir(project_path: &Path) -> PathBuf {
    project_path.join(DATA_DIR)
}

/// Get the settings file path for a project
pub fn get_settings_path(project_path: &Path) -> PathBuf {
    get_data_dir(project_path).join("settings.json")
}

/// Create the .symdex directory, keeping its contents out of version control
pub fn init_data_dir(project_path: &Path) -> Result<(), ConfigError> {
    let data_dir = get_data_dir(project_path);
    fs::create_dir_all(&data_dir)?;

    let gitignore_path = data_dir.join(".gitignore");
    if !gitignore_path.exists() {
        fs::write(&gitignore_path, "# symdex local data\n*\n")?;
    }

    Ok(())
}

/// Load settings from disk.
/// Returns an error if the settings file doesn't exist.
pub fn load_settings(project_path: &Path) -> Result<IndexSettings, ConfigError> {
    let settings_path = get_settings_path(project_path);

    if !settings_path.exists() {
        return Err(ConfigError::Missing(settings_path));
    }

    let content = fs::read_to_string(&settings_path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Load settings from disk, returning defaults if missing or unreadable
pub fn load_settings_or_default(project_path: &Path) -> IndexSettings {
    match load_settings(project_path) {
        Ok(settings) => settings,
        Err(ConfigError::Missing(_)) => IndexSettings::default(),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unreadable settings; using defaults");
            IndexSettings::default()
        }
    }
}

/// Save settings to disk
pub fn save_settings(project_path: &Path, settings: &IndexSettings) -> Result<(), ConfigError> {
    init_data_dir(project_path)?;

    let settings_path = get_settings_path(project_path);
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(&settings_path, json)?;

    info!(path = %settings_path.display(), "Saved settings");
    Ok(())
}
