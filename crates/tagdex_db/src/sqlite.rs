//! SQLite implementation of the index repository traits.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};
use std::collections::HashMap;

use crate::error::{DbError, Result};
use crate::store::{IndexStore, StoreTx};
use crate::types::{
    BlobDetails, BlobEntry, BlobId, DigestEntry, ExportRow, IndexCounts, PathId, PathRecord,
    PathUpsert, QueryOp, Tag, TagId,
};
use crate::SqliteStore;

const PATH_COLUMNS: &str = "p.id, p.path, p.blob_id, p.present, p.verified_at, p.size, p.mtime";

const BLOB_BY_DIGEST_SQL: &str = r#"
    SELECT b.id, b.size, b.created_at
    FROM blobs b
    JOIN digests d ON d.blob_id = b.id
    WHERE d.algorithm = ? AND d.value = ?
"#;

fn row_to_tag(row: &SqliteRow) -> Result<Tag> {
    Ok(Tag {
        id: TagId(row.try_get("id")?),
        text: row.try_get("text")?,
    })
}

fn row_to_blob(row: &SqliteRow) -> Result<BlobEntry> {
    Ok(BlobEntry {
        id: BlobId(row.try_get("id")?),
        size: row.try_get::<i64, _>("size")? as u64,
        created_at: SqliteStore::millis_to_datetime(row.try_get("created_at")?),
    })
}

fn row_to_path(row: &SqliteRow) -> Result<PathRecord> {
    Ok(PathRecord {
        id: PathId(row.try_get("id")?),
        path: row.try_get("path")?,
        blob_id: BlobId(row.try_get("blob_id")?),
        exists: row.try_get::<i64, _>("present")? != 0,
        verified_at: SqliteStore::millis_to_datetime(row.try_get("verified_at")?),
        size: row.try_get::<i64, _>("size")? as u64,
        mtime: row.try_get("mtime")?,
    })
}

// ============================================================================
// Store (autocommit reads)
// ============================================================================

#[async_trait]
impl IndexStore for SqliteStore {
    type Tx = SqliteTx;

    async fn begin(&self) -> Result<SqliteTx> {
        let tx = self.pool().begin().await?;
        Ok(SqliteTx { tx })
    }

    async fn ensure_tag(&self, text: &str) -> Result<Tag> {
        sqlx::query("INSERT INTO tags (text) VALUES (?) ON CONFLICT(text) DO NOTHING")
            .bind(text)
            .execute(self.pool())
            .await?;

        let row = sqlx::query("SELECT id, text FROM tags WHERE text = ?")
            .bind(text)
            .fetch_one(self.pool())
            .await?;
        row_to_tag(&row)
    }

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        let rows = sqlx::query("SELECT id, text FROM tags ORDER BY text")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_tag).collect()
    }

    async fn find_tags(&self, texts: &[String]) -> Result<Vec<Tag>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT id, text FROM tags WHERE text IN (");
        let mut separated = builder.separated(", ");
        for text in texts {
            separated.push_bind(text.clone());
        }
        separated.push_unseparated(") ORDER BY text");

        let rows = builder.build().fetch_all(self.pool()).await?;
        rows.iter().map(row_to_tag).collect()
    }

    async fn blob_tags(&self, blob: BlobId) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.text
            FROM tags t
            JOIN blob_tags bt ON bt.tag_id = t.id
            WHERE bt.blob_id = ?
            ORDER BY t.text
            "#,
        )
        .bind(blob.as_i64())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_tag).collect()
    }

    async fn find_all(&self, op: QueryOp, tokens: &[String]) -> Result<Vec<BlobEntry>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let joiner = match op {
            QueryOp::And => " AND ",
            QueryOp::Or => " OR ",
        };

        let mut builder = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT b.id, b.size, b.created_at
            FROM blobs b
            WHERE EXISTS (SELECT 1 FROM paths p WHERE p.blob_id = b.id AND p.present = 1)
              AND ("#,
        );
        for (i, token) in tokens.iter().enumerate() {
            if i > 0 {
                builder.push(joiner);
            }
            builder.push(
                "EXISTS (SELECT 1 FROM blob_tags bt JOIN tags t ON t.id = bt.tag_id \
                 WHERE bt.blob_id = b.id AND instr(t.text, ",
            );
            builder.push_bind(token.to_lowercase());
            builder.push(") > 0)");
        }
        builder.push(") ORDER BY b.id");

        let rows = builder.build().fetch_all(self.pool()).await?;
        rows.iter().map(row_to_blob).collect()
    }

    async fn get_blob(&self, id: BlobId) -> Result<Option<BlobEntry>> {
        let row = sqlx::query("SELECT id, size, created_at FROM blobs WHERE id = ?")
            .bind(id.as_i64())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_blob).transpose()
    }

    async fn find_blob_by_digest(&self, digest: &DigestEntry) -> Result<Option<BlobEntry>> {
        let row = sqlx::query(BLOB_BY_DIGEST_SQL)
            .bind(&digest.algorithm)
            .bind(&digest.value)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_blob).transpose()
    }

    async fn blobs_with_digest(&self, digest: &DigestEntry) -> Result<Vec<BlobId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT blob_id FROM digests WHERE algorithm = ? AND value = ? ORDER BY blob_id",
        )
        .bind(&digest.algorithm)
        .bind(&digest.value)
        .fetch_all(self.pool())
        .await?;
        Ok(ids.into_iter().map(BlobId).collect())
    }

    async fn blob_digests(&self, blob: BlobId) -> Result<Vec<DigestEntry>> {
        let rows = sqlx::query("SELECT algorithm, value FROM digests WHERE blob_id = ? ORDER BY id")
            .bind(blob.as_i64())
            .fetch_all(self.pool())
            .await?;

        rows.iter()
            .map(|row| {
                Ok(DigestEntry {
                    algorithm: row.try_get("algorithm")?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }

    async fn blob_details(&self, blob: BlobId) -> Result<Option<BlobDetails>> {
        let Some(entry) = self.get_blob(blob).await? else {
            return Ok(None);
        };

        let digests = self.blob_digests(blob).await?;
        let tags = self
            .blob_tags(blob)
            .await?
            .into_iter()
            .map(|t| t.text)
            .collect();
        let paths = self.live_paths_for_blob(blob).await?;

        Ok(Some(BlobDetails {
            blob: entry,
            digests,
            tags,
            paths,
        }))
    }

    async fn find_path(&self, path: &str) -> Result<Option<PathRecord>> {
        let sql = format!("SELECT {PATH_COLUMNS} FROM paths p WHERE p.path = ?");
        let row = sqlx::query(&sql)
            .bind(path)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_path).transpose()
    }

    async fn list_paths(&self) -> Result<Vec<PathRecord>> {
        let sql = format!("SELECT {PATH_COLUMNS} FROM paths p ORDER BY p.path");
        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;
        rows.iter().map(row_to_path).collect()
    }

    async fn live_paths_for_blob(&self, blob: BlobId) -> Result<Vec<PathRecord>> {
        let sql = format!(
            "SELECT {PATH_COLUMNS} FROM paths p WHERE p.blob_id = ? AND p.present = 1 ORDER BY p.path"
        );
        let rows = sqlx::query(&sql)
            .bind(blob.as_i64())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_path).collect()
    }

    async fn live_paths_with_blob_size(&self, size: u64) -> Result<Vec<PathRecord>> {
        let sql = format!(
            "SELECT {PATH_COLUMNS} FROM paths p JOIN blobs b ON b.id = p.blob_id \
             WHERE b.size = ? AND p.present = 1 ORDER BY p.path"
        );
        let rows = sqlx::query(&sql)
            .bind(size as i64)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_path).collect()
    }

    async fn export_rows(&self, primary_algorithm: &str) -> Result<Vec<ExportRow>> {
        let rows = sqlx::query(
            r#"
            SELECT
                p.path,
                p.blob_id,
                p.size,
                p.verified_at,
                COALESCE(
                    (SELECT d.value FROM digests d WHERE d.blob_id = p.blob_id AND d.algorithm = ?),
                    (SELECT d.value FROM digests d WHERE d.blob_id = p.blob_id ORDER BY d.id LIMIT 1)
                ) AS digest
            FROM paths p
            WHERE p.present = 1
            ORDER BY p.path
            "#,
        )
        .bind(primary_algorithm)
        .fetch_all(self.pool())
        .await?;

        let tag_rows = sqlx::query(
            r#"
            SELECT bt.blob_id, t.text
            FROM blob_tags bt
            JOIN tags t ON t.id = bt.tag_id
            ORDER BY t.text
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        let mut tags_by_blob: HashMap<i64, Vec<String>> = HashMap::new();
        for row in &tag_rows {
            tags_by_blob
                .entry(row.try_get("blob_id")?)
                .or_default()
                .push(row.try_get("text")?);
        }

        rows.iter()
            .map(|row| {
                let blob_id: i64 = row.try_get("blob_id")?;
                Ok(ExportRow {
                    digest: row.try_get("digest")?,
                    size: row.try_get::<i64, _>("size")? as u64,
                    verified_at: SqliteStore::millis_to_datetime(row.try_get("verified_at")?),
                    path: row.try_get("path")?,
                    tags: tags_by_blob.get(&blob_id).cloned().unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn counts(&self) -> Result<IndexCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM tags) AS tags,
                (SELECT COUNT(*) FROM blobs) AS blobs,
                (SELECT COUNT(*) FROM digests) AS digests,
                (SELECT COUNT(*) FROM paths) AS paths,
                (SELECT COUNT(*) FROM paths WHERE present = 1) AS live_paths
            "#,
        )
        .fetch_one(self.pool())
        .await?;

        Ok(IndexCounts {
            tags: row.try_get::<i64, _>("tags")? as u64,
            blobs: row.try_get::<i64, _>("blobs")? as u64,
            digests: row.try_get::<i64, _>("digests")? as u64,
            paths: row.try_get::<i64, _>("paths")? as u64,
            live_paths: row.try_get::<i64, _>("live_paths")? as u64,
        })
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM paths").execute(&mut *tx).await?;
        // Cascades to digests and blob_tags
        sqlx::query("DELETE FROM blobs").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM tags").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// An open SQLite transaction. Rolled back on drop unless committed.
pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn find_path(&mut self, path: &str) -> Result<Option<PathRecord>> {
        let sql = format!("SELECT {PATH_COLUMNS} FROM paths p WHERE p.path = ?");
        let row = sqlx::query(&sql)
            .bind(path)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_path).transpose()
    }

    async fn find_blob_by_digest(&mut self, digest: &DigestEntry) -> Result<Option<BlobEntry>> {
        let row = sqlx::query(BLOB_BY_DIGEST_SQL)
            .bind(&digest.algorithm)
            .bind(&digest.value)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_blob).transpose()
    }

    async fn try_create_blob(
        &mut self,
        digest: &DigestEntry,
        size: u64,
    ) -> Result<Option<BlobEntry>> {
        let now = SqliteStore::now_millis();

        let blob_id = sqlx::query("INSERT INTO blobs (size, created_at) VALUES (?, ?)")
            .bind(size as i64)
            .bind(now)
            .execute(&mut *self.tx)
            .await?
            .last_insert_rowid();

        let claimed = sqlx::query(
            r#"
            INSERT INTO digests (blob_id, algorithm, value) VALUES (?, ?, ?)
            ON CONFLICT(algorithm, value) DO NOTHING
            "#,
        )
        .bind(blob_id)
        .bind(&digest.algorithm)
        .bind(&digest.value)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            // Another writer owns this digest; drop our provisional row
            sqlx::query("DELETE FROM blobs WHERE id = ?")
                .bind(blob_id)
                .execute(&mut *self.tx)
                .await?;
            return Ok(None);
        }

        Ok(Some(BlobEntry {
            id: BlobId(blob_id),
            size,
            created_at: SqliteStore::millis_to_datetime(now),
        }))
    }

    async fn repoint_digest(&mut self, digest: &DigestEntry, to: BlobId) -> Result<()> {
        let updated = sqlx::query("UPDATE digests SET blob_id = ? WHERE algorithm = ? AND value = ?")
            .bind(to.as_i64())
            .bind(&digest.algorithm)
            .bind(&digest.value)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(DbError::not_found(format!("digest {digest}")));
        }
        Ok(())
    }

    async fn attach_tags(&mut self, blob: BlobId, tags: &[TagId]) -> Result<u64> {
        let mut added = 0;
        for tag in tags {
            added += sqlx::query("INSERT OR IGNORE INTO blob_tags (blob_id, tag_id) VALUES (?, ?)")
                .bind(blob.as_i64())
                .bind(tag.as_i64())
                .execute(&mut *self.tx)
                .await?
                .rows_affected();
        }
        Ok(added)
    }

    async fn detach_tags(&mut self, blob: BlobId, tags: &[TagId]) -> Result<u64> {
        let mut removed = 0;
        for tag in tags {
            removed += sqlx::query("DELETE FROM blob_tags WHERE blob_id = ? AND tag_id = ?")
                .bind(blob.as_i64())
                .bind(tag.as_i64())
                .execute(&mut *self.tx)
                .await?
                .rows_affected();
        }
        Ok(removed)
    }

    async fn merge_tags(&mut self, from: BlobId, into: BlobId) -> Result<u64> {
        if from == into {
            return Ok(0);
        }
        let merged = sqlx::query(
            r#"
            INSERT OR IGNORE INTO blob_tags (blob_id, tag_id)
            SELECT ?, tag_id FROM blob_tags WHERE blob_id = ?
            "#,
        )
        .bind(into.as_i64())
        .bind(from.as_i64())
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        Ok(merged)
    }

    async fn path_count_for_blob(&mut self, blob: BlobId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM paths WHERE blob_id = ?")
            .bind(blob.as_i64())
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count as u64)
    }

    async fn upsert_path(&mut self, record: &PathUpsert) -> Result<PathRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO paths (path, blob_id, present, verified_at, size, mtime)
            VALUES (?, ?, 1, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                blob_id = excluded.blob_id,
                present = 1,
                verified_at = excluded.verified_at,
                size = excluded.size,
                mtime = excluded.mtime
            RETURNING id, path, blob_id, present, verified_at, size, mtime
            "#,
        )
        .bind(&record.path)
        .bind(record.blob_id.as_i64())
        .bind(record.verified_at.timestamp_millis())
        .bind(record.size as i64)
        .bind(record.mtime)
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_path(&row)
    }

    async fn mark_missing(&mut self, path: PathId) -> Result<()> {
        sqlx::query("UPDATE paths SET present = 0 WHERE id = ?")
            .bind(path.as_i64())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_path(&mut self, path: PathId) -> Result<()> {
        sqlx::query("DELETE FROM paths WHERE id = ?")
            .bind(path.as_i64())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn prune_blob_if_orphaned(&mut self, blob: BlobId) -> Result<bool> {
        let deleted = sqlx::query(
            "DELETE FROM blobs WHERE id = ? AND NOT EXISTS (SELECT 1 FROM paths WHERE blob_id = ?)",
        )
        .bind(blob.as_i64())
        .bind(blob.as_i64())
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        Ok(deleted > 0)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
