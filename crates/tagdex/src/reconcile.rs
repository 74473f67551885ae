//! Resync reconciliation
//!
//! After a walk has indexed everything currently on disk, every path record
//! whose file is gone is either a move (the same content is live elsewhere,
//! so its tags are folded into the survivor) or a delete.
//!
//! Missing records are first flagged and committed, so an interrupted pass
//! picks up where it stopped.

use serde::Serialize;
use std::path::PathBuf;
use tagdex_db::{BlobId, DigestEntry, IndexStore, PathRecord, StoreTx};
use tracing::{debug, info, warn};

use crate::error::{IndexError, Result};
use crate::hasher::{digest_file_blocking, HasherRegistry};
use crate::history::is_present;

/// A vanished path whose content survives at another path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovedPath {
    pub from: String,
    pub to: String,
}

/// Outcome of one reconciliation pass. Empty when nothing changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub moved: Vec<MovedPath>,
    pub deleted: Vec<String>,
}

impl ResyncReport {
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty() && self.deleted.is_empty()
    }
}

/// Where the content of a stale record lives now.
struct Survivor {
    record: PathRecord,
    /// Digest to move onto the survivor's blob before pruning
    repoint: Option<DigestEntry>,
}

pub struct Reconciler {
    root: PathBuf,
    follow_symlinks: bool,
    primary_algorithm: &'static str,
    hashers: HasherRegistry,
}

impl Reconciler {
    pub fn new(
        root: impl Into<PathBuf>,
        follow_symlinks: bool,
        primary_algorithm: &'static str,
        hashers: HasherRegistry,
    ) -> Self {
        Self {
            root: root.into(),
            follow_symlinks,
            primary_algorithm,
            hashers,
        }
    }

    /// Reconcile every record whose file is no longer present.
    pub async fn run<S: IndexStore>(&self, store: &S) -> Result<ResyncReport> {
        let stale = self.flag_missing(store).await?;
        let mut report = ResyncReport::default();

        for record in stale {
            match self.find_survivor(store, &record).await? {
                Some(survivor) => {
                    self.retire_as_move(store, &record, &survivor).await?;
                    info!(from = %record.path, to = %survivor.record.path, "Path moved");
                    report.moved.push(MovedPath {
                        from: record.path,
                        to: survivor.record.path,
                    });
                }
                None => {
                    self.retire_as_delete(store, &record).await?;
                    info!(path = %record.path, "Path deleted");
                    report.deleted.push(record.path);
                }
            }
        }

        Ok(report)
    }

    /// Flag vanished records missing and return every missing record.
    async fn flag_missing<S: IndexStore>(&self, store: &S) -> Result<Vec<PathRecord>> {
        let mut stale = Vec::new();
        let mut newly_missing = Vec::new();

        for record in store.list_paths().await? {
            if record.exists {
                if is_present(&self.root, &record.path, self.follow_symlinks) {
                    continue;
                }
                newly_missing.push(record.id);
            }
            stale.push(PathRecord {
                exists: false,
                ..record
            });
        }

        if !newly_missing.is_empty() {
            let mut tx = store.begin().await?;
            for id in &newly_missing {
                tx.mark_missing(*id).await?;
            }
            tx.commit().await?;
            debug!(count = newly_missing.len(), "Flagged missing paths");
        }

        Ok(stale)
    }

    async fn find_survivor<S: IndexStore>(
        &self,
        store: &S,
        stale: &PathRecord,
    ) -> Result<Option<Survivor>> {
        let digests = store.blob_digests(stale.blob_id).await?;

        for digest in &digests {
            let blobs = store.blobs_with_digest(digest).await?;
            if blobs.len() > 1 {
                return Err(IndexError::ReconciliationAmbiguity {
                    digest: digest.to_string(),
                    blobs: blobs.len(),
                });
            }
            for blob in blobs {
                if let Some(record) = self.first_live_path(store, blob, stale).await? {
                    return Ok(Some(Survivor {
                        record,
                        repoint: None,
                    }));
                }
            }
        }

        if digests.iter().any(|d| d.algorithm == self.primary_algorithm) {
            return Ok(None);
        }
        self.find_by_legacy_digest(store, stale, &digests).await
    }

    async fn first_live_path<S: IndexStore>(
        &self,
        store: &S,
        blob: BlobId,
        stale: &PathRecord,
    ) -> Result<Option<PathRecord>> {
        Ok(store
            .live_paths_for_blob(blob)
            .await?
            .into_iter()
            .find(|p| p.id != stale.id))
    }

    /// The stale blob only carries digests from another algorithm, so live
    /// content re-indexed under the primary algorithm sits on a different
    /// blob. Re-hash same-size candidates under the old algorithm.
    async fn find_by_legacy_digest<S: IndexStore>(
        &self,
        store: &S,
        stale: &PathRecord,
        digests: &[DigestEntry],
    ) -> Result<Option<Survivor>> {
        let Some(blob) = store.get_blob(stale.blob_id).await? else {
            return Ok(None);
        };

        let candidates: Vec<PathRecord> = store
            .live_paths_with_blob_size(blob.size)
            .await?
            .into_iter()
            .filter(|p| p.blob_id != stale.blob_id)
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        for legacy in digests {
            let hasher = match self.hashers.get(&legacy.algorithm) {
                Ok(h) => h,
                Err(_) => {
                    debug!(algorithm = %legacy.algorithm, "No hasher for legacy digest");
                    continue;
                }
            };

            for candidate in &candidates {
                let path = self.root.join(&candidate.path);
                match digest_file_blocking(hasher.clone(), path).await {
                    Ok(out) if out.digest == legacy.value => {
                        debug!(path = %candidate.path, digest = %legacy, "Legacy digest matched");
                        return Ok(Some(Survivor {
                            record: candidate.clone(),
                            repoint: Some(legacy.clone()),
                        }));
                    }
                    Ok(_) => {}
                    Err(e) if e.is_per_file() => {
                        warn!(path = %candidate.path, error = %e, "Skipping unreadable candidate");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(None)
    }

    async fn retire_as_move<S: IndexStore>(
        &self,
        store: &S,
        stale: &PathRecord,
        survivor: &Survivor,
    ) -> Result<()> {
        let target = survivor.record.blob_id;
        let mut tx = store.begin().await?;
        if let Some(digest) = &survivor.repoint {
            tx.repoint_digest(digest, target).await?;
        }
        tx.merge_tags(stale.blob_id, target).await?;
        tx.delete_path(stale.id).await?;
        tx.prune_blob_if_orphaned(stale.blob_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn retire_as_delete<S: IndexStore>(&self, store: &S, stale: &PathRecord) -> Result<()> {
        let mut tx = store.begin().await?;
        tx.delete_path(stale.id).await?;
        tx.prune_blob_if_orphaned(stale.blob_id).await?;
        tx.commit().await?;
        Ok(())
    }
}
