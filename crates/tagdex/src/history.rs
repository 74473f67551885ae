//! Path history: what the index last saw at each relative path.

use std::collections::HashMap;
use std::path::Path;
use tagdex_db::{IndexStore, PathRecord};

use crate::error::Result;
use crate::scanner::ScannedFile;

/// Whether a cached record still describes `candidate` without re-hashing.
///
/// Same path, size and mtime. A record flagged missing never matches.
pub fn is_match(candidate: &ScannedFile, cached: &PathRecord) -> bool {
    cached.exists
        && candidate.rel_path == cached.path
        && candidate.size == cached.size
        && candidate.mtime == cached.mtime
}

/// Whether `rel_path` under `root` is currently a non-empty regular file.
///
/// Always hits the filesystem. A file truncated to zero bytes counts as gone.
pub fn is_present(root: &Path, rel_path: &str, follow_symlinks: bool) -> bool {
    let path = root.join(rel_path);
    let metadata = if follow_symlinks {
        std::fs::metadata(&path)
    } else {
        std::fs::symlink_metadata(&path)
    };
    metadata.map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Snapshot of every path record, keyed by relative path.
#[derive(Debug, Default)]
pub struct PathHistory {
    records: HashMap<String, PathRecord>,
}

impl PathHistory {
    /// Load the whole history in one query.
    pub async fn load<S: IndexStore>(store: &S) -> Result<Self> {
        let records = store
            .list_paths()
            .await?
            .into_iter()
            .map(|r| (r.path.clone(), r))
            .collect();
        Ok(Self { records })
    }

    pub fn get(&self, rel_path: &str) -> Option<&PathRecord> {
        self.records.get(rel_path)
    }

    /// True when the cached record for `candidate` is still current.
    pub fn is_unchanged(&self, candidate: &ScannedFile) -> bool {
        self.get(&candidate.rel_path)
            .map_or(false, |cached| is_match(candidate, cached))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;
    use tagdex_db::{BlobId, PathId};
    use tempfile::TempDir;

    fn candidate(path: &str, size: u64, mtime: i64) -> ScannedFile {
        ScannedFile {
            abs_path: PathBuf::from("/root").join(path),
            rel_path: path.to_string(),
            size,
            mtime,
        }
    }

    fn record(path: &str, size: u64, mtime: i64, exists: bool) -> PathRecord {
        PathRecord {
            id: PathId(1),
            path: path.to_string(),
            blob_id: BlobId(1),
            exists,
            verified_at: Utc::now(),
            size,
            mtime,
        }
    }

    #[test]
    fn test_is_match() {
        let cached = record("a.txt", 10, 500, true);
        assert!(is_match(&candidate("a.txt", 10, 500), &cached));
        assert!(!is_match(&candidate("a.txt", 11, 500), &cached));
        assert!(!is_match(&candidate("a.txt", 10, 501), &cached));
        assert!(!is_match(&candidate("b.txt", 10, 500), &cached));
    }

    #[test]
    fn test_missing_record_never_matches() {
        let cached = record("a.txt", 10, 500, false);
        assert!(!is_match(&candidate("a.txt", 10, 500), &cached));
    }

    #[test]
    fn test_is_present() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("dir")).unwrap();
        std::fs::write(tmp.path().join("dir/file.txt"), "x").unwrap();
        std::fs::write(tmp.path().join("dir/empty.txt"), "").unwrap();

        assert!(is_present(tmp.path(), "dir/file.txt", false));
        assert!(!is_present(tmp.path(), "dir/empty.txt", false));
        assert!(!is_present(tmp.path(), "dir", false));
        assert!(!is_present(tmp.path(), "dir/missing.txt", false));
    }
}
