//! Content-addressed blob dedup.

use tagdex_db::{BlobEntry, DigestEntry, StoreTx};
use tracing::debug;

use crate::error::{IndexError, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A blob returned by [`BlobRegistry::get_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBlob {
    pub blob: BlobEntry,
    /// False on a dedup hit
    pub created: bool,
}

/// Maps a digest to exactly one blob.
///
/// Uniqueness rests on the store's `(algorithm, value)` constraint: a writer
/// whose digest insert loses discards its provisional blob and re-reads the
/// winner.
#[derive(Debug, Clone, Copy)]
pub struct BlobRegistry {
    max_attempts: u32,
}

impl Default for BlobRegistry {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BlobRegistry {
    pub async fn get_or_create<T: StoreTx>(
        &self,
        tx: &mut T,
        digest: &DigestEntry,
        size: u64,
    ) -> Result<ResolvedBlob> {
        for attempt in 1..=self.max_attempts {
            if let Some(blob) = tx.find_blob_by_digest(digest).await? {
                return Ok(ResolvedBlob {
                    blob,
                    created: false,
                });
            }
            if let Some(blob) = tx.try_create_blob(digest, size).await? {
                debug!(blob = %blob.id, digest = %digest, size, "Blob created");
                return Ok(ResolvedBlob {
                    blob,
                    created: true,
                });
            }
            debug!(digest = %digest, attempt, "Lost blob creation race, re-reading");
        }

        Err(IndexError::DedupRace {
            digest: digest.to_string(),
            attempts: self.max_attempts,
        })
    }
}
