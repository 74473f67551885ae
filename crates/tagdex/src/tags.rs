//! Tag vocabulary, tag derivation and tag queries
//!
//! Tags are lowercase strings attached to blobs, never to paths: every path
//! holding the same content shares one tag set. Indexing derives tags from
//! the relative path; users add and remove more by hand.

use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tagdex_db::{BlobEntry, BlobId, IndexStore, QueryOp, StoreTx, TagId};
use tracing::debug;

use crate::error::{IndexError, Result};

fn word_split() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\W+").expect("static pattern"))
}

/// Trim and lowercase; `None` for blank input.
pub fn normalize_tag(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_lowercase())
    }
}

/// Tags for a file at `rel_path`, unioned with `extra`.
///
/// The path minus its extension is split on runs of non-word characters,
/// the extension is added as its own token, and only tokens longer than one
/// character are kept. Result is sorted and deduplicated.
pub fn derive_tags(rel_path: &str, extra: &[String]) -> Vec<String> {
    let path = Path::new(rel_path);
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = if extension.is_empty() {
        rel_path
    } else {
        &rel_path[..rel_path.len() - extension.len() - 1]
    };

    let mut tags: BTreeSet<String> = word_split()
        .split(stem)
        .chain(std::iter::once(extension.as_str()))
        .filter(|token| token.chars().count() > 1)
        .map(str::to_lowercase)
        .collect();

    tags.extend(extra.iter().filter_map(|t| normalize_tag(t)));
    tags.into_iter().collect()
}

/// Parse a query operator name (`and`/`all`, `or`/`any`).
pub fn parse_op(name: &str) -> Result<QueryOp> {
    QueryOp::parse(name).ok_or_else(|| IndexError::UnsupportedOperator(name.to_string()))
}

/// Owns the `text -> TagId` cache for one indexing session.
///
/// Tag rows are created through [`IndexStore::ensure_tag`], outside any
/// per-file transaction, so a cached id always names a committed row.
#[derive(Clone)]
pub struct TagIndex<S> {
    store: S,
    cache: Arc<Mutex<HashMap<String, TagId>>>,
}

impl<S: IndexStore + Clone> TagIndex<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Seed the cache with every tag already in the store.
    pub async fn load(&self) -> Result<usize> {
        let tags = self.store.list_tags().await?;
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        for tag in tags {
            cache.insert(tag.text, tag.id);
        }
        Ok(cache.len())
    }

    /// Forget every cached id (after the store was cleared).
    pub fn reset(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn cached(&self, text: &str) -> Option<TagId> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(text)
            .copied()
    }

    /// Ids for already normalized `texts`, creating missing tags.
    pub async fn resolve(&self, texts: &[String]) -> Result<Vec<TagId>> {
        let mut ids = Vec::with_capacity(texts.len());
        for text in texts {
            let id = match self.cached(text) {
                Some(id) => id,
                None => {
                    let tag = self.store.ensure_tag(text).await?;
                    debug!(tag = %tag.text, id = %tag.id, "Tag created");
                    *self
                        .cache
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .entry(tag.text)
                        .or_insert(tag.id)
                }
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Ids for `texts` that already exist; never creates tags.
    async fn lookup(&self, texts: &[String]) -> Result<Vec<TagId>> {
        let mut ids = Vec::new();
        let mut missing = Vec::new();
        for text in texts {
            match self.cached(text) {
                Some(id) => ids.push(id),
                None => missing.push(text.clone()),
            }
        }
        if !missing.is_empty() {
            ids.extend(self.store.find_tags(&missing).await?.into_iter().map(|t| t.id));
        }
        Ok(ids)
    }

    /// Attach tags to a blob. Returns how many were newly attached.
    pub async fn add_tags(&self, blob: BlobId, tags: &[String]) -> Result<u64> {
        let texts: Vec<String> = tags.iter().filter_map(|t| normalize_tag(t)).collect();
        if texts.is_empty() {
            return Ok(0);
        }
        let ids = self.resolve(&texts).await?;

        let mut tx = self.store.begin().await?;
        let added = tx.attach_tags(blob, &ids).await?;
        tx.commit().await?;
        Ok(added)
    }

    /// Detach tags from a blob. Unknown tags are ignored.
    pub async fn remove_tags(&self, blob: BlobId, tags: &[String]) -> Result<u64> {
        let texts: Vec<String> = tags.iter().filter_map(|t| normalize_tag(t)).collect();
        let ids = self.lookup(&texts).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.store.begin().await?;
        let removed = tx.detach_tags(blob, &ids).await?;
        tx.commit().await?;
        Ok(removed)
    }

    /// Sorted tag texts of a blob.
    pub async fn tags_of(&self, blob: BlobId) -> Result<Vec<String>> {
        Ok(self
            .store
            .blob_tags(blob)
            .await?
            .into_iter()
            .map(|t| t.text)
            .collect())
    }

    /// Blobs with live paths whose tags satisfy `op` over `tokens`.
    ///
    /// Tokens are substring-matched against tag text. With [`QueryOp::And`]
    /// each token needs some matching tag, but tags may be shared between
    /// tokens, so overlapping or repeated tokens do not demand distinct
    /// tags. Blank tokens are dropped; no tokens at all matches nothing.
    pub async fn find_all(&self, op: QueryOp, tokens: &[String]) -> Result<Vec<BlobEntry>> {
        let tokens: Vec<String> = tokens.iter().filter_map(|t| normalize_tag(t)).collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store.find_all(op, &tokens).await?)
    }
}
