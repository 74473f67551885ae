//! tagdex - content-addressed file index with tags
//!
//! Walks a directory tree, identifies every file by a digest of its content,
//! and attaches free-form tags to that content rather than to the path. The
//! index follows renames (tags survive a move) and drops what was deleted.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tagdex::{Indexer, IndexerOptions};
//! use tagdex_db::{QueryOp, SqliteStore};
//!
//! let store = SqliteStore::open("/data/photos/_index.db").await?;
//! let indexer = Indexer::new(Path::new("/data/photos"), store, IndexerOptions::default()).await?;
//!
//! indexer.reindex().await?;
//! let beach = indexer.find_all(QueryOp::And, &["beach".into(), "2019".into()]).await?;
//! let report = indexer.resync().await?;
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod hasher;
pub mod history;
pub mod indexer;
pub mod reconcile;
pub mod registry;
pub mod root;
pub mod scanner;
pub mod tags;

pub use config::IndexConfig;
pub use error::{IndexError, Result};
pub use hasher::{ContentHasher, HashOutput, HasherRegistry};
pub use history::PathHistory;
pub use indexer::{
    AddOutcome, CancelToken, Indexer, IndexerOptions, ReindexMode, ReindexSummary, VerifyOutcome,
};
pub use reconcile::{MovedPath, Reconciler, ResyncReport};
pub use registry::BlobRegistry;
pub use scanner::{PathScanner, ScanConfig, ScanIssue, ScannedFile};
pub use tags::{derive_tags, parse_op, TagIndex};
