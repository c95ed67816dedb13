//! Ignore rules for the indexer
//!
//! Two tiers. The fast path answers from plain names read out of the root
//! `.gitignore` (no globs, no nested paths) and is cheap enough to run on
//! every watcher event. The authoritative check applies the configured
//! include/exclude globs and then asks git itself which candidates are
//! ignored; it fails open when git cannot answer.

use async_trait::async_trait;
use glob::Pattern;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{IndexSettings, DATA_DIR};

/// Ignore file consulted by the fast path, relative to the root
pub const IGNORE_FILE: &str = ".gitignore";

/// Names ignored at any depth even without an ignore file
const DEFAULT_IGNORED_ANYWHERE: &[&str] = &[".git", "node_modules"];

/// Names ignored directly under the root even without an ignore file
const DEFAULT_IGNORED_AT_ROOT: &[&str] = &[DATA_DIR];

/// Error from a VCS ignore-check utility
#[derive(Debug, thiserror::Error)]
pub enum IgnoreCheckError {
    #[error("ignore check could not run: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("ignore check exited with status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
}

/// Answers which root-relative paths version control ignores
#[async_trait]
pub trait IgnoreChecker: Send + Sync {
    async fn ignored(
        &self,
        root: &Path,
        relative_paths: &[String],
    ) -> Result<HashSet<String>, IgnoreCheckError>;
}

/// `git check-ignore --stdin -z`
#[derive(Debug, Default, Clone, Copy)]
pub struct GitCheckIgnore;

#[async_trait]
impl IgnoreChecker for GitCheckIgnore {
    async fn ignored(
        &self,
        root: &Path,
        relative_paths: &[String],
    ) -> Result<HashSet<String>, IgnoreCheckError> {
        if relative_paths.is_empty() {
            return Ok(HashSet::new());
        }

        let mut child = Command::new("git")
            .args(["check-ignore", "--stdin", "-z"])
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut input = Vec::new();
        for path in relative_paths {
            input.extend_from_slice(path.as_bytes());
            input.push(0);
        }

        // Feed stdin from its own task so a full stdout pipe cannot stall us.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            })
        });

        let output = child.wait_with_output().await?;
        if let Some(writer) = writer {
            let _ = writer.await;
        }

        match output.status.code() {
            // 1 means "none of the paths are ignored"
            Some(0) | Some(1) => Ok(output
                .stdout
                .split(|b| *b == 0)
                .filter(|s| !s.is_empty())
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect()),
            code => Err(IgnoreCheckError::Failed {
                code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }
}

#[derive(Debug, Default)]
struct FastRules {
    /// Matched against the first path segment only
    root_only: HashSet<String>,
    /// Matched against every path segment
    anywhere: HashSet<String>,
}

impl FastRules {
    fn defaults() -> Self {
        Self {
            root_only: DEFAULT_IGNORED_AT_ROOT.iter().map(|s| s.to_string()).collect(),
            anywhere: DEFAULT_IGNORED_ANYWHERE.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Add the plain-name lines of an ignore file; anything fancier is
    /// left to the authoritative check.
    fn add_ignore_file(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let line = line.strip_suffix('/').unwrap_or(line);
            let (name, root_only) = match line.strip_prefix('/') {
                Some(rest) => (rest, true),
                None => (line, false),
            };

            if name.is_empty() || name.contains(['*', '?', '[', ']', '{', '}', '/', '\\']) {
                continue;
            }

            if root_only {
                self.root_only.insert(name.to_string());
            } else {
                self.anywhere.insert(name.to_string());
            }
        }
    }

    fn matches(&self, relative: &Path) -> bool {
        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .enumerate()
            .any(|(depth, segment)| {
                (depth == 0 && self.root_only.contains(segment)) || self.anywhere.contains(segment)
            })
    }
}

/// Decides which paths under a root are kept out of the index
pub struct IgnorePolicy {
    root: PathBuf,
    rules: RwLock<FastRules>,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    checker: Arc<dyn IgnoreChecker>,
}

impl IgnorePolicy {
    /// Build a policy for `root`, loading its ignore file and compiling
    /// the glob settings. Invalid globs are logged and skipped.
    pub fn new(root: &Path, settings: &IndexSettings) -> Self {
        let policy = Self {
            root: root.to_path_buf(),
            rules: RwLock::new(FastRules::defaults()),
            include: compile_globs(&settings.include),
            exclude: compile_globs(&settings.exclude),
            checker: Arc::new(GitCheckIgnore),
        };
        policy.reload();
        policy
    }

    /// Replace the VCS ignore-check utility
    pub fn with_checker(mut self, checker: Arc<dyn IgnoreChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the ignore file the fast path reads
    pub fn ignore_file(&self) -> PathBuf {
        self.root.join(IGNORE_FILE)
    }

    /// Reset to the defaults, then re-read the ignore file if present
    pub fn reload(&self) {
        let mut rules = FastRules::defaults();
        match std::fs::read_to_string(self.ignore_file()) {
            Ok(content) => rules.add_ignore_file(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "Failed to read ignore file; using defaults"),
        }
        debug!(
            root_only = rules.root_only.len(),
            anywhere = rules.anywhere.len(),
            "Loaded fast ignore rules"
        );
        *self.rules.write() = rules;
    }

    /// Fast approximate check. Paths outside the root are never ignored.
    pub fn is_fast_ignored(&self, path: &Path) -> bool {
        let Some(relative) = self.relative(path) else {
            return false;
        };
        self.rules.read().matches(relative)
    }

    /// Whether a root-relative path passes the include/exclude globs
    pub fn matches_globs(&self, relative: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(relative));
        included && !self.exclude.iter().any(|p| p.matches(relative))
    }

    /// Authoritative check: keep only the paths that should be indexed.
    ///
    /// Order of the survivors is preserved. If the ignore-check utility
    /// fails, everything that passed the globs is kept.
    pub async fn filter_ignored(&self, paths: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut kept: Vec<(PathBuf, Option<String>)> = Vec::with_capacity(paths.len());
        for path in paths {
            match self.relative(&path).map(to_slash) {
                Some(rel) => {
                    if !self.is_fast_ignored(&path) && self.matches_globs(&rel) {
                        kept.push((path, Some(rel)));
                    }
                }
                None => kept.push((path, None)),
            }
        }

        let candidates: Vec<String> = kept.iter().filter_map(|(_, rel)| rel.clone()).collect();
        if candidates.is_empty() {
            return kept.into_iter().map(|(p, _)| p).collect();
        }

        match self.checker.ignored(&self.root, &candidates).await {
            Ok(ignored) => kept
                .into_iter()
                .filter(|(_, rel)| rel.as_ref().map_or(true, |r| !ignored.contains(r)))
                .map(|(p, _)| p)
                .collect(),
            Err(e) => {
                warn!(error = %e, "Ignore check unavailable; keeping all candidates");
                kept.into_iter().map(|(p, _)| p).collect()
            }
        }
    }

    fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        if path.is_absolute() {
            path.strip_prefix(&self.root).ok()
        } else {
            Some(path)
        }
    }
}

fn compile_globs(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Skipping invalid glob");
                None
            }
        })
        .collect()
}

fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
