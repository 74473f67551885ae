//! Index root resolution and index keys.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Why a directory cannot serve as an index root.
#[derive(Debug, Error)]
pub enum RootError {
    #[error("{} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("cannot list {}: {source}", path.display())]
    Unlistable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Replace a leading `~` component with the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) if rest.as_os_str().is_empty() => home,
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Canonical form of `path`, or `path` itself when it cannot be resolved.
pub fn canonical_or_self(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Expand `~`, check that `path` is a listable directory, canonicalize it.
pub fn resolve_root(path: &Path) -> Result<PathBuf, RootError> {
    let expanded = expand_home(path);

    let metadata = fs::metadata(&expanded).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => RootError::Missing(expanded.clone()),
        _ => RootError::Unlistable {
            path: expanded.clone(),
            source,
        },
    })?;
    if !metadata.is_dir() {
        return Err(RootError::NotADirectory(expanded));
    }
    if let Err(source) = fs::read_dir(&expanded) {
        return Err(RootError::Unlistable {
            path: expanded,
            source,
        });
    }

    Ok(canonical_or_self(&expanded))
}

/// Key under which a root-relative path is stored: normal components
/// joined with `/` whatever the platform separator.
pub fn index_key(rel: &Path) -> String {
    let mut key = String::new();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(&part.to_string_lossy());
        }
    }
    key
}
