//! Indexing orchestration
//!
//! One sweep walks the root, skips files whose size and mtime still match
//! their path record, hashes the rest on the blocking pool and commits each
//! file as a single transaction (blob, tags, path record). A resync follows
//! the sweep with a [`Reconciler`] pass.
//!
//! Only one indexer may write to a store at a time.

use chrono::Utc;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tagdex_db::{
    BlobEntry, BlobId, DbError, DigestEntry, IndexStore, PathUpsert, QueryOp, StoreTx,
};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::export::write_tsv;
use crate::hasher::{digest_file, digest_file_blocking, ContentHasher, HashOutput, HasherRegistry};
use crate::history::{is_match, is_present, PathHistory};
use crate::reconcile::{Reconciler, ResyncReport};
use crate::registry::BlobRegistry;
use crate::root::{canonical_or_self, expand_home, index_key, resolve_root};
use crate::scanner::{PathScanner, ScanConfig, ScanIssue, ScannedFile};
use crate::tags::{derive_tags, TagIndex};

/// Cooperative cancellation, checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation so the indexer can sweep again.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReindexMode {
    /// Skip files whose size and mtime match their path record
    #[default]
    Incremental,
    /// Re-hash every file
    Complete,
}

/// Counters for one sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexSummary {
    /// Files hashed and committed
    pub processed: u64,
    /// Files skipped because their record still matched
    pub unchanged: u64,
    pub skipped_empty: u64,
    /// Previously indexed paths dropped because the file is now empty
    pub retired: Vec<String>,
    /// Blobs created by this sweep
    pub new_blobs: u64,
    #[serde(skip)]
    pub errors: Vec<ScanIssue>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Indexed { blob: BlobId, new_blob: bool },
    /// Size and mtime matched; no re-hash
    Unchanged { blob: BlobId },
    SkippedEmpty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Match,
    Mismatch { expected: String, actual: String },
    /// The indexed file is gone from disk
    Missing,
}

/// Settings an [`Indexer`] is built from.
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub algorithm: String,
    pub hash_workers: usize,
    pub scan: ScanConfig,
    /// Never index this file (or its SQLite sidecars)
    pub database_path: Option<PathBuf>,
    pub hashers: HasherRegistry,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        let config = IndexConfig::default();
        Self {
            algorithm: config.algorithm,
            hash_workers: config.hash_workers,
            scan: config.scan,
            database_path: None,
            hashers: HasherRegistry::default(),
        }
    }
}

struct Committed {
    blob: BlobId,
    new_blob: bool,
}

pub struct Indexer<S: IndexStore + Clone> {
    root: PathBuf,
    store: S,
    tags: TagIndex<S>,
    hashers: HasherRegistry,
    primary: Arc<dyn ContentHasher>,
    scanner: PathScanner,
    registry: BlobRegistry,
    hash_workers: usize,
    cancel: CancelToken,
}

impl<S: IndexStore + Clone + 'static> Indexer<S> {
    /// Build an indexer for `root` and seed the tag cache from `store`.
    pub async fn new(root: &Path, store: S, options: IndexerOptions) -> Result<Self> {
        let root = resolve_root(root)?;
        let primary = options.hashers.get(&options.algorithm)?;

        let mut scanner = PathScanner::new(&root, options.scan.clone());
        if let Some(db_path) = &options.database_path {
            scanner = scanner.skip_database(&absolute_database_path(db_path));
        }

        let tags = TagIndex::new(store.clone());
        let cached = tags.load().await?;

        info!(
            root = %root.display(),
            algorithm = primary.algorithm(),
            tags = cached,
            "Indexer ready"
        );

        Ok(Self {
            root,
            store,
            tags,
            hashers: options.hashers,
            primary,
            scanner,
            registry: BlobRegistry::default(),
            hash_workers: options.hash_workers.max(1),
            cancel: CancelToken::new(),
        })
    }

    /// Build an indexer from an [`IndexConfig`].
    pub async fn from_config(config: &IndexConfig, store: S) -> Result<Self> {
        let root = resolve_root(&config.root)?;
        let options = IndexerOptions {
            algorithm: config.algorithm.clone(),
            hash_workers: config.hash_workers,
            scan: config.scan.clone(),
            database_path: Some(config.database_path_for(&root)),
            hashers: HasherRegistry::default(),
        };
        Self::new(&root, store, options).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tags(&self) -> &TagIndex<S> {
        &self.tags
    }

    pub fn algorithm(&self) -> &'static str {
        self.primary.algorithm()
    }

    /// Token that stops the current sweep between files.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // ========================================================================
    // Sweeps
    // ========================================================================

    /// Incremental sweep of the whole root.
    pub async fn reindex(&self) -> Result<ReindexSummary> {
        self.reindex_with(ReindexMode::Incremental).await
    }

    pub async fn reindex_with(&self, mode: ReindexMode) -> Result<ReindexSummary> {
        let start = Instant::now();
        let mut summary = ReindexSummary::default();

        let scanner = self.scanner.clone();
        let outcome = tokio::task::spawn_blocking(move || scanner.scan()).await?;
        summary.skipped_empty = outcome.empty.len() as u64;
        for issue in &outcome.issues {
            warn!(path = %issue.path, error = %issue.message, "Walk error");
        }
        summary.errors = outcome.issues;
        summary.retired = self.retire_emptied(&outcome.empty).await?;

        let pending: Vec<ScannedFile> = match mode {
            ReindexMode::Complete => outcome.files,
            ReindexMode::Incremental => {
                let history = PathHistory::load(&self.store).await?;
                let (unchanged, pending): (Vec<_>, Vec<_>) = outcome
                    .files
                    .into_iter()
                    .partition(|file| history.is_unchanged(file));
                summary.unchanged = unchanged.len() as u64;
                pending
            }
        };

        debug!(pending = pending.len(), unchanged = summary.unchanged, "Hashing");
        self.process(pending, &mut summary).await?;

        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            root = %self.root.display(),
            processed = summary.processed,
            unchanged = summary.unchanged,
            empty = summary.skipped_empty,
            retired = summary.retired.len(),
            new_blobs = summary.new_blobs,
            errors = summary.errors.len(),
            cancelled = summary.cancelled,
            duration_ms = summary.duration_ms,
            "Reindex complete"
        );

        Ok(summary)
    }

    /// Hash up to `hash_workers` files at once; commit one at a time.
    async fn process(&self, pending: Vec<ScannedFile>, summary: &mut ReindexSummary) -> Result<()> {
        let mut queue = pending.into_iter();
        let mut in_flight = JoinSet::new();

        loop {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                in_flight.abort_all();
                info!("Reindex cancelled; uncommitted files will be revisited");
                break;
            }

            while in_flight.len() < self.hash_workers {
                let Some(file) = queue.next() else {
                    break;
                };
                let hasher = self.primary.clone();
                in_flight.spawn_blocking(move || {
                    let hashed = digest_file(hasher.as_ref(), &file.abs_path);
                    (file, hashed)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (file, hashed) = joined?;

            if self.cancel.is_cancelled() {
                continue;
            }

            match hashed {
                Ok(out) => {
                    let committed = self.commit_file(&file, out, &[]).await?;
                    summary.processed += 1;
                    if committed.new_blob {
                        summary.new_blobs += 1;
                    }
                }
                Err(e) if e.is_per_file() => {
                    warn!(path = %file.rel_path, error = %e, "Skipping unreadable file");
                    summary.errors.push(ScanIssue {
                        path: file.rel_path,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Drop the records of files that are now zero bytes.
    async fn retire_emptied(&self, empty: &[String]) -> Result<Vec<String>> {
        if empty.is_empty() {
            return Ok(Vec::new());
        }

        let mut retired = Vec::new();
        let mut tx = self.store.begin().await?;
        for rel_path in empty {
            let Some(record) = tx.find_path(rel_path).await? else {
                continue;
            };
            tx.delete_path(record.id).await?;
            tx.prune_blob_if_orphaned(record.blob_id).await?;
            debug!(path = %record.path, blob = %record.blob_id, "File emptied");
            retired.push(record.path);
        }
        tx.commit().await?;

        if !retired.is_empty() {
            info!(count = retired.len(), "Dropped records of emptied files");
        }
        Ok(retired)
    }

    /// Commit one hashed file: blob, tags and path record in one transaction.
    async fn commit_file(
        &self,
        file: &ScannedFile,
        hashed: HashOutput,
        extra_tags: &[String],
    ) -> Result<Committed> {
        let texts = derive_tags(&file.rel_path, extra_tags);
        let tag_ids = self.tags.resolve(&texts).await?;
        let digest = DigestEntry::new(self.primary.algorithm(), hashed.digest);

        let mut tx = self.store.begin().await?;
        let previous = tx.find_path(&file.rel_path).await?;
        let resolved = self
            .registry
            .get_or_create(&mut tx, &digest, hashed.bytes)
            .await?;
        let blob = resolved.blob.id;

        tx.attach_tags(blob, &tag_ids).await?;
        tx.upsert_path(&PathUpsert {
            path: file.rel_path.clone(),
            blob_id: blob,
            size: file.size,
            mtime: file.mtime,
            verified_at: Utc::now(),
        })
        .await?;

        // Content edited in place: the old blob keeps its tags only while
        // some other path still holds that content.
        if let Some(previous) = previous.filter(|p| p.blob_id != blob) {
            if tx.path_count_for_blob(previous.blob_id).await? == 0 {
                tx.merge_tags(previous.blob_id, blob).await?;
                tx.prune_blob_if_orphaned(previous.blob_id).await?;
                debug!(path = %file.rel_path, old = %previous.blob_id, new = %blob, "Content replaced");
            }
        }

        tx.commit().await?;

        debug!(
            path = %file.rel_path,
            blob = %blob,
            created = resolved.created,
            tags = tag_ids.len(),
            "Indexed"
        );

        Ok(Committed {
            blob,
            new_blob: resolved.created,
        })
    }

    /// Sweep, then retire or merge every path that vanished.
    pub async fn resync(&self) -> Result<ResyncReport> {
        let summary = self.reindex().await?;
        if summary.cancelled {
            info!("Resync skipped reconciliation after cancelled reindex");
            return Ok(ResyncReport {
                deleted: summary.retired,
                ..ResyncReport::default()
            });
        }

        let mut report = self.reconciler().run(&self.store).await?;
        // Emptied files were retired by the sweep; they count as deletes
        let mut deleted = summary.retired;
        deleted.append(&mut report.deleted);
        report.deleted = deleted;

        info!(
            moved = report.moved.len(),
            deleted = report.deleted.len(),
            "Resync complete"
        );
        Ok(report)
    }

    /// Drop the whole index and re-hash everything.
    pub async fn rebuild(&self) -> Result<ReindexSummary> {
        self.store.clear().await?;
        self.tags.reset();
        info!(root = %self.root.display(), "Index cleared");
        self.reindex_with(ReindexMode::Complete).await
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            &self.root,
            self.scanner.config().follow_symlinks,
            self.primary.algorithm(),
            self.hashers.clone(),
        )
    }

    // ========================================================================
    // Single files
    // ========================================================================

    /// Index one file now. `path` is absolute or relative to the root.
    pub async fn add(&self, path: &Path, tags: &[String]) -> Result<AddOutcome> {
        let abs_path = self.locate(path)?;
        let file = match self.scanner.stat(&abs_path) {
            Ok(Some(file)) => file,
            Ok(None) => {
                let rel_path = self.relative(&abs_path)?;
                self.retire_emptied(std::slice::from_ref(&rel_path)).await?;
                return Ok(AddOutcome::SkippedEmpty);
            }
            Err(e) => return Err(IndexError::unreadable(&abs_path, e)),
        };

        if let Some(cached) = self.store.find_path(&file.rel_path).await? {
            if is_match(&file, &cached) {
                self.tags.add_tags(cached.blob_id, tags).await?;
                return Ok(AddOutcome::Unchanged {
                    blob: cached.blob_id,
                });
            }
        }

        let hashed = digest_file_blocking(self.primary.clone(), abs_path).await?;
        let committed = self.commit_file(&file, hashed, tags).await?;
        info!(path = %file.rel_path, blob = %committed.blob, "File added");
        Ok(AddOutcome::Indexed {
            blob: committed.blob,
            new_blob: committed.new_blob,
        })
    }

    /// Recompute an indexed file's digest under its blob's algorithm.
    pub async fn verify(&self, path: &Path) -> Result<VerifyOutcome> {
        let rel_path = self.relative(path)?;
        let record = self
            .store
            .find_path(&rel_path)
            .await?
            .ok_or_else(|| DbError::not_found(format!("path {rel_path}")))?;

        let digests = self.store.blob_digests(record.blob_id).await?;
        let expected = digests
            .iter()
            .find(|d| d.algorithm == self.primary.algorithm())
            .or_else(|| digests.first())
            .ok_or_else(|| DbError::integrity(format!("{} has no digest", record.blob_id)))?;

        if !is_present(&self.root, &rel_path, self.scanner.config().follow_symlinks) {
            return Ok(VerifyOutcome::Missing);
        }

        let hasher = self.hashers.get(&expected.algorithm)?;
        let actual = digest_file_blocking(hasher, self.root.join(&rel_path)).await?;
        if actual.digest == expected.value {
            Ok(VerifyOutcome::Match)
        } else {
            Ok(VerifyOutcome::Mismatch {
                expected: expected.value.clone(),
                actual: actual.digest,
            })
        }
    }

    /// Blob currently bound to `path`, if it is indexed and live.
    pub async fn blob_for_path(&self, path: &Path) -> Result<Option<BlobId>> {
        let rel_path = self.relative(path)?;
        Ok(self
            .store
            .find_path(&rel_path)
            .await?
            .filter(|r| r.exists)
            .map(|r| r.blob_id))
    }

    // ========================================================================
    // Tags & queries
    // ========================================================================

    pub async fn find_all(&self, op: QueryOp, tokens: &[String]) -> Result<Vec<BlobEntry>> {
        self.tags.find_all(op, tokens).await
    }

    pub async fn add_tags(&self, blob: BlobId, tags: &[String]) -> Result<u64> {
        self.tags.add_tags(blob, tags).await
    }

    pub async fn remove_tags(&self, blob: BlobId, tags: &[String]) -> Result<u64> {
        self.tags.remove_tags(blob, tags).await
    }

    /// Write the tab-separated listing of every live path.
    pub async fn export<W: Write>(&self, writer: W) -> Result<usize> {
        let rows = self.store.export_rows(self.primary.algorithm()).await?;
        write_tsv(&rows, writer)?;
        Ok(rows.len())
    }

    // ========================================================================
    // Paths
    // ========================================================================

    /// Absolute path for `path`, which must lie under the root.
    fn locate(&self, path: &Path) -> Result<PathBuf> {
        let joined = if path.is_absolute() {
            expand_home(path)
        } else {
            self.root.join(path)
        };
        let abs_path = joined
            .canonicalize()
            .map_err(|e| IndexError::unreadable(&joined, e))?;
        if !abs_path.starts_with(&self.root) {
            return Err(IndexError::OutsideRoot(abs_path));
        }
        Ok(abs_path)
    }

    /// Index key for `path` without touching the file (it may be gone).
    fn relative(&self, path: &Path) -> Result<String> {
        let abs_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let abs_path = match abs_path.parent() {
            Some(parent) => match abs_path.file_name() {
                Some(name) => canonical_or_self(parent).join(name),
                None => abs_path.clone(),
            },
            None => abs_path.clone(),
        };
        let rel = abs_path
            .strip_prefix(&self.root)
            .map_err(|_| IndexError::OutsideRoot(abs_path.clone()))?;
        Ok(index_key(rel))
    }
}

fn absolute_database_path(db_path: &Path) -> PathBuf {
    let expanded = expand_home(db_path);
    match (expanded.parent(), expanded.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            canonical_or_self(parent).join(name)
        }
        _ => std::env::current_dir()
            .map(|cwd| canonical_or_self(&cwd).join(&expanded))
            .unwrap_or(expanded),
    }
}
