//! Persistence layer for the tagdex content index
//!
//! This crate owns the on-disk shape of the index: row types, the repository
//! traits the indexer is written against, and their SQLite implementation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tagdex_db::{IndexStore, SqliteStore, StoreTx};
//!
//! let store = SqliteStore::open("/data/photos/_index.db").await?;
//!
//! let tag = store.ensure_tag("holiday").await?;
//! let mut tx = store.begin().await?;
//! tx.attach_tags(blob_id, &[tag.id]).await?;
//! tx.commit().await?;
//! ```

mod error;
mod schema;
mod sqlite;
mod store;
mod types;

pub use error::{DbError, Result};
pub use sqlite::SqliteTx;
pub use store::{IndexStore, StoreTx};
pub use types::*;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// SQLite-backed index store.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create an index database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        info!(path = %path.display(), "Index database opened");

        Ok(store)
    }

    /// Open a private in-memory index.
    ///
    /// Every pooled connection to `:memory:` is its own database, so the pool
    /// holds exactly one connection and never recycles it.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Get the underlying connection pool (escape hatch for diagnostics).
    ///
    /// Prefer the trait methods instead.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl SqliteStore {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Convert milliseconds to DateTime.
    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(chrono::Utc::now)
    }
}
