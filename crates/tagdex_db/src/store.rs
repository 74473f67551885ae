//! Repository traits for the content index.
//!
//! The indexer only talks to storage through these traits. Reads go through
//! [`IndexStore`]; every mutation that must land atomically (one indexed file,
//! one reconciled path, one tag edit) goes through a [`StoreTx`] obtained from
//! [`IndexStore::begin`] and is made visible by [`StoreTx::commit`].
//!
//! Implementations must enforce uniqueness of path, of (algorithm, digest)
//! and of tag text at the storage level.

use crate::error::Result;
use crate::types::{
    BlobDetails, BlobEntry, BlobId, DigestEntry, ExportRow, IndexCounts, PathId, PathRecord,
    PathUpsert, QueryOp, Tag, TagId,
};
use async_trait::async_trait;

/// Read access plus transaction factory.
#[async_trait]
pub trait IndexStore: Send + Sync {
    type Tx: StoreTx;

    /// Open a transaction. Do not read through the store while it is open:
    /// single-connection stores would wait on themselves.
    async fn begin(&self) -> Result<Self::Tx>;

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    /// Return the tag named `text`, creating it if absent. Idempotent and
    /// committed immediately.
    async fn ensure_tag(&self, text: &str) -> Result<Tag>;

    async fn list_tags(&self) -> Result<Vec<Tag>>;

    /// Existing tags among `texts`; absent texts are skipped.
    async fn find_tags(&self, texts: &[String]) -> Result<Vec<Tag>>;

    async fn blob_tags(&self, blob: BlobId) -> Result<Vec<Tag>>;

    /// Blobs with at least one live path whose tags satisfy the query.
    ///
    /// A token matches a tag when it is a substring of the tag text.
    /// `And` is per-token coverage: every token must match some tag of the
    /// blob, and one tag may cover several tokens. So `["be", "beach"]`
    /// matches a blob tagged only `beach`, and repeated tokens count once.
    /// `Or` needs any token to match. Empty `tokens` match nothing.
    async fn find_all(&self, op: QueryOp, tokens: &[String]) -> Result<Vec<BlobEntry>>;

    // ------------------------------------------------------------------
    // Blobs
    // ------------------------------------------------------------------

    async fn get_blob(&self, id: BlobId) -> Result<Option<BlobEntry>>;

    async fn find_blob_by_digest(&self, digest: &DigestEntry) -> Result<Option<BlobEntry>>;

    /// Every blob row claiming `digest`. More than one means the store is
    /// corrupt.
    async fn blobs_with_digest(&self, digest: &DigestEntry) -> Result<Vec<BlobId>>;

    async fn blob_digests(&self, blob: BlobId) -> Result<Vec<DigestEntry>>;

    async fn blob_details(&self, blob: BlobId) -> Result<Option<BlobDetails>>;

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    async fn find_path(&self, path: &str) -> Result<Option<PathRecord>>;

    /// All path records, including ones flagged missing.
    async fn list_paths(&self) -> Result<Vec<PathRecord>>;

    /// Live paths referencing `blob`, sorted by path.
    async fn live_paths_for_blob(&self, blob: BlobId) -> Result<Vec<PathRecord>>;

    /// Live paths whose blob has exactly `size` bytes, sorted by path.
    async fn live_paths_with_blob_size(&self, size: u64) -> Result<Vec<PathRecord>>;

    // ------------------------------------------------------------------
    // Whole index
    // ------------------------------------------------------------------

    /// Rows for the tabular export, one per live path, sorted by path.
    async fn export_rows(&self, primary_algorithm: &str) -> Result<Vec<ExportRow>>;

    async fn counts(&self) -> Result<IndexCounts>;

    /// Drop every path, blob, digest and tag.
    async fn clear(&self) -> Result<()>;
}

/// One atomic unit of work.
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait StoreTx: Send {
    async fn find_path(&mut self, path: &str) -> Result<Option<PathRecord>>;

    async fn find_blob_by_digest(&mut self, digest: &DigestEntry) -> Result<Option<BlobEntry>>;

    /// Create a blob claiming `digest`. Returns `None` without side effects
    /// when another writer already claimed the digest.
    async fn try_create_blob(&mut self, digest: &DigestEntry, size: u64)
        -> Result<Option<BlobEntry>>;

    /// Move an existing digest row onto another blob.
    async fn repoint_digest(&mut self, digest: &DigestEntry, to: BlobId) -> Result<()>;

    /// Returns the number of associations that were not already present.
    async fn attach_tags(&mut self, blob: BlobId, tags: &[TagId]) -> Result<u64>;

    /// Returns the number of associations removed.
    async fn detach_tags(&mut self, blob: BlobId, tags: &[TagId]) -> Result<u64>;

    /// Union the tag set of `from` into `into`.
    async fn merge_tags(&mut self, from: BlobId, into: BlobId) -> Result<u64>;

    async fn path_count_for_blob(&mut self, blob: BlobId) -> Result<u64>;

    /// Insert or overwrite the record for `record.path`, marking it present.
    async fn upsert_path(&mut self, record: &PathUpsert) -> Result<PathRecord>;

    async fn mark_missing(&mut self, path: PathId) -> Result<()>;

    async fn delete_path(&mut self, path: PathId) -> Result<()>;

    /// Delete `blob` (and its digests and tag associations) if no path
    /// references it. Returns whether it was deleted.
    async fn prune_blob_if_orphaned(&mut self, blob: BlobId) -> Result<bool>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
