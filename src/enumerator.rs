//! Listing the files under a project root

use async_trait::async_trait;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::DATA_DIR;
use crate::indexer::IndexError;

/// Produces the candidate files of a project
#[async_trait]
pub trait FileEnumerator: Send + Sync {
    /// Absolute paths of the files under `root`, sorted
    async fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, IndexError>;
}

/// Enumerates with `rg --files`, falling back to an in-process walk when
/// ripgrep is not installed or fails.
#[derive(Debug, Clone, Default)]
pub struct RipgrepEnumerator {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl RipgrepEnumerator {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--files".to_string(),
            "--hidden".to_string(),
            "--no-require-git".to_string(),
            "--glob".to_string(),
            "!.git".to_string(),
            "--glob".to_string(),
            format!("!{DATA_DIR}"),
        ];
        for pattern in &self.include {
            args.push("--glob".to_string());
            args.push(pattern.clone());
        }
        for pattern in &self.exclude {
            args.push("--glob".to_string());
            args.push(format!("!{pattern}"));
        }
        args
    }
}

#[async_trait]
impl FileEnumerator for RipgrepEnumerator {
    async fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, IndexError> {
        let output = Command::new("rg")
            .args(self.args())
            .current_dir(root)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                debug!(error = %e, "ripgrep unavailable; walking the tree instead");
                return WalkEnumerator.list_files(root).await;
            }
        };

        match output.status.code() {
            // 1 means "no files matched"
            Some(0) | Some(1) => {
                let mut files: Vec<PathBuf> = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .filter(|line| !line.is_empty())
                    .map(|line| root.join(line.strip_prefix("./").unwrap_or(line)))
                    .collect();
                files.sort();
                debug!(count = files.len(), "Enumerated files with ripgrep");
                Ok(files)
            }
            code => {
                warn!(
                    ?code,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "ripgrep failed; walking the tree instead"
                );
                WalkEnumerator.list_files(root).await
            }
        }
    }
}

/// Gitignore-aware directory walk
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkEnumerator;

#[async_trait]
impl FileEnumerator for WalkEnumerator {
    async fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, IndexError> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || walk(&root))
            .await
            .map_err(|e| IndexError::Enumeration(e.to_string()))?
    }
}

fn walk(root: &Path) -> Result<Vec<PathBuf>, IndexError> {
    if !root.is_dir() {
        return Err(IndexError::Enumeration(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .require_git(false)
        .filter_entry(|entry| {
            let name = entry.file_name();
            name != ".git" && !(entry.depth() == 1 && name == DATA_DIR)
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) => {
                if entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                    files.push(entry.into_path());
                }
            }
            Err(e) => debug!(error = %e, "Skipping unreadable entry"),
        }
    }

    files.sort();
    debug!(count = files.len(), "Enumerated files by walking");
    Ok(files)
}
