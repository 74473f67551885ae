//! Directory walker producing indexing candidates
//!
//! The scanner only stats; it never opens files. Each candidate carries the
//! cheap metadata (size, mtime) the indexer compares against path history to
//! decide whether the content must be hashed again.
//!
//! # Policy
//!
//! - Sequential walk with `ignore::WalkBuilder`, all ignore-file handling off
//! - Symlinks are not followed by default and symlink entries are skipped
//! - Hidden entries are included by default
//! - Directories named in `exclude_dir_names` are pruned
//! - Zero-byte files are never yielded; their paths are reported separately
//! - Explicitly skipped files (the index database and its sidecars) are never yielded

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::root::index_key;

/// Default directory exclusions
pub const DEFAULT_EXCLUDE_DIR_NAMES: &[&str] = &[".git"];

/// SQLite writes these next to the database file.
const SQLITE_SIDECAR_SUFFIXES: &[&str] = &["-wal", "-shm", "-journal"];

/// Configuration for walking an index root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Whether to include hidden files/directories
    pub include_hidden: bool,
    /// Whether to follow symlinks (loops are reported, not detected up front)
    pub follow_symlinks: bool,
    /// Directory names to prune, matched against the name only
    pub exclude_dir_names: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_hidden: true,
            follow_symlinks: false,
            exclude_dir_names: DEFAULT_EXCLUDE_DIR_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// A regular, non-empty file found under the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub abs_path: PathBuf,
    /// Relative to the root, `/` separated
    pub rel_path: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch
    pub mtime: i64,
}

/// A walk problem that did not stop the walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanIssue {
    pub path: String,
    pub message: String,
}

/// Result of one walk
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub files: Vec<ScannedFile>,
    /// Relative paths of zero-byte files
    pub empty: Vec<String>,
    pub dirs_scanned: u64,
    pub issues: Vec<ScanIssue>,
}

/// Walks one root directory.
#[derive(Debug, Clone)]
pub struct PathScanner {
    root: PathBuf,
    config: ScanConfig,
    skip_files: HashSet<PathBuf>,
}

impl PathScanner {
    /// `root` should already be resolved (see [`crate::root::resolve_root`]).
    pub fn new(root: impl Into<PathBuf>, config: ScanConfig) -> Self {
        Self {
            root: root.into(),
            config,
            skip_files: HashSet::new(),
        }
    }

    /// Never yield `db_path` or its SQLite sidecar files.
    pub fn skip_database(mut self, db_path: &Path) -> Self {
        self.skip_files.extend(database_files(db_path));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Walk the whole tree. Blocking; run it off the async executor.
    pub fn scan(&self) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let exclude_dir_names: Arc<[String]> = Arc::from(self.config.exclude_dir_names.clone());
        let follow_symlinks = self.config.follow_symlinks;

        let walker = WalkBuilder::new(&self.root)
            .hidden(!self.config.include_hidden)
            .follow_links(follow_symlinks)
            .parents(false)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .filter_entry(move |entry| {
                if entry.depth() == 0 || !entry.file_type().map_or(false, |ft| ft.is_dir()) {
                    return true;
                }
                let excluded = entry
                    .file_name()
                    .to_str()
                    .map_or(false, |name| exclude_dir_names.iter().any(|ex| ex == name));
                if excluded {
                    debug!(path = %entry.path().display(), "Skipping excluded directory");
                }
                !excluded
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    outcome.issues.push(ScanIssue {
                        path: error_path(&e).unwrap_or_else(|| "unknown".to_string()),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if entry.depth() == 0 {
                continue;
            }

            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                outcome.dirs_scanned += 1;
                continue;
            }
            if !follow_symlinks && entry.path_is_symlink() {
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let file_path = entry.path();
            if self.skip_files.contains(file_path) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    outcome.issues.push(ScanIssue {
                        path: file_path.display().to_string(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let rel_path = file_path
                .strip_prefix(&self.root)
                .map(index_key)
                .unwrap_or_else(|_| index_key(file_path));

            let size = metadata.len();
            if size == 0 {
                outcome.empty.push(rel_path);
                continue;
            }

            outcome.files.push(ScannedFile {
                abs_path: file_path.to_path_buf(),
                rel_path,
                size,
                mtime: mtime_millis(&metadata),
            });
        }

        info!(
            root = %self.root.display(),
            files = outcome.files.len(),
            dirs = outcome.dirs_scanned,
            empty = outcome.empty.len(),
            issues = outcome.issues.len(),
            "Walk complete"
        );

        outcome
    }

    /// Stat a single file the same way the walk would.
    ///
    /// Returns `Ok(None)` for a zero-byte file.
    pub fn stat(&self, abs_path: &Path) -> std::io::Result<Option<ScannedFile>> {
        let metadata = std::fs::metadata(abs_path)?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", abs_path.display()),
            ));
        }
        if metadata.len() == 0 {
            return Ok(None);
        }
        let rel_path = abs_path
            .strip_prefix(&self.root)
            .map(index_key)
            .unwrap_or_else(|_| index_key(abs_path));
        Ok(Some(ScannedFile {
            abs_path: abs_path.to_path_buf(),
            rel_path,
            size: metadata.len(),
            mtime: mtime_millis(&metadata),
        }))
    }
}

/// Modification time in ms since the Unix epoch; 0 when unavailable.
pub fn mtime_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The database file plus every sidecar SQLite may create beside it.
pub fn database_files(db_path: &Path) -> Vec<PathBuf> {
    let mut files = vec![db_path.to_path_buf()];
    let name = db_path.as_os_str().to_string_lossy();
    for suffix in SQLITE_SIDECAR_SUFFIXES {
        files.push(PathBuf::from(format!("{name}{suffix}")));
    }
    files
}

fn error_path(err: &ignore::Error) -> Option<String> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.display().to_string()),
        ignore::Error::WithDepth { err, .. } => error_path(err),
        ignore::Error::Loop { child, .. } => Some(child.display().to_string()),
        _ => None,
    }
}
