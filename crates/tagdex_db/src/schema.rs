//! Schema creation for the index tables.
//!
//! All CREATE TABLE statements live here.

use crate::error::Result;
use crate::SqliteStore;
use tracing::info;

/// Note: all timestamps are INTEGER milliseconds since the Unix epoch.
const SCHEMA_SQL: &str = r#"
-- Tag vocabulary. Rows are never deleted while the index lives.
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    text TEXT NOT NULL UNIQUE
);

-- One row per unique content
CREATE TABLE IF NOT EXISTS blobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    size INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

-- Digest -> blob. UNIQUE(algorithm, value) is the dedup contract.
CREATE TABLE IF NOT EXISTS digests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    blob_id INTEGER NOT NULL REFERENCES blobs(id) ON DELETE CASCADE,
    algorithm TEXT NOT NULL,
    value TEXT NOT NULL,
    UNIQUE(algorithm, value)
);

CREATE TABLE IF NOT EXISTS blob_tags (
    blob_id INTEGER NOT NULL REFERENCES blobs(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(id),
    PRIMARY KEY (blob_id, tag_id)
);

-- One row per relative path ever seen
CREATE TABLE IF NOT EXISTS paths (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    blob_id INTEGER NOT NULL REFERENCES blobs(id),
    present INTEGER NOT NULL DEFAULT 1,
    verified_at INTEGER NOT NULL,
    size INTEGER NOT NULL,
    mtime INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_digests_blob ON digests(blob_id);
CREATE INDEX IF NOT EXISTS idx_blob_tags_tag ON blob_tags(tag_id);
CREATE INDEX IF NOT EXISTS idx_paths_blob ON paths(blob_id);
CREATE INDEX IF NOT EXISTS idx_paths_present ON paths(present);
CREATE INDEX IF NOT EXISTS idx_blobs_size ON blobs(size);
"#;

impl SqliteStore {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(self.pool()).await?;

        info!("Index schema verified");
        Ok(())
    }
}
