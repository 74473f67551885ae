//! Error types for the indexing engine

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::root::RootError;

/// Indexing error type
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Db(#[from] tagdex_db::DbError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid index root: {0}")]
    Root(#[from] RootError),

    /// The file vanished or could not be read to completion
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported query operator: {0}")]
    UnsupportedOperator(String),

    /// Blob creation kept losing to concurrent writers
    #[error("Could not settle blob for digest {digest} after {attempts} attempts")]
    DedupRace { digest: String, attempts: u32 },

    #[error("Digest {digest} is claimed by {blobs} blobs")]
    ReconciliationAmbiguity { digest: String, blobs: usize },

    #[error("Unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Path is outside the index root: {}", .0.display())]
    OutsideRoot(PathBuf),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IndexError {
    pub fn unreadable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Unreadable {
            path: path.into(),
            source,
        }
    }

    /// Errors local to one file; a sweep records them and moves on.
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::Unreadable { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, IndexError>;
