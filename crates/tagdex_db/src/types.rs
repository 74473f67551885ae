//! Row types for the content index.
//!
//! These are the records every layer above the store speaks in: tags, blobs
//! (one per unique content), digests, and path records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_row_id {
    ($name:ident, $label:expr) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn as_i64(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }
    };
}

define_row_id!(TagId, "tag");
define_row_id!(BlobId, "blob");
define_row_id!(PathId, "path");

// ============================================================================
// Tags
// ============================================================================

/// A tag in the vocabulary. `text` is stored lowercased and is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub text: String,
}

// ============================================================================
// Blobs & digests
// ============================================================================

/// The canonical record for one unique piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobEntry {
    pub id: BlobId,
    /// Content length in bytes, as consumed by the hasher
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// A content digest under a named algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DigestEntry {
    pub algorithm: String,
    /// Lowercase hex
    pub value: String,
}

impl DigestEntry {
    pub fn new(algorithm: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for DigestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Binding of one filesystem location (relative to the index root) to a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRecord {
    pub id: PathId,
    /// Relative path with `/` separators
    pub path: String,
    pub blob_id: BlobId,
    /// False once the reconciler could not find the file
    pub exists: bool,
    /// When the content was last hashed
    pub verified_at: DateTime<Utc>,
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch
    pub mtime: i64,
}

/// Values written when a path is (re)bound after hashing.
#[derive(Debug, Clone)]
pub struct PathUpsert {
    pub path: String,
    pub blob_id: BlobId,
    pub size: u64,
    pub mtime: i64,
    pub verified_at: DateTime<Utc>,
}

// ============================================================================
// Query & reporting
// ============================================================================

/// Tag query operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOp {
    /// Every token must be contained in at least one tag of the blob
    And,
    /// At least one token must be contained in at least one tag
    Or,
}

impl QueryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "and" | "all" => Some(Self::And),
            "or" | "any" => Some(Self::Or),
            _ => None,
        }
    }
}

/// Everything known about one blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobDetails {
    pub blob: BlobEntry,
    pub digests: Vec<DigestEntry>,
    /// Tag texts, sorted
    pub tags: Vec<String>,
    /// Live paths only, sorted by path
    pub paths: Vec<PathRecord>,
}

impl BlobDetails {
    /// Digest under `algorithm`, falling back to the first one recorded.
    pub fn digest_for(&self, algorithm: &str) -> Option<&DigestEntry> {
        self.digests
            .iter()
            .find(|d| d.algorithm == algorithm)
            .or_else(|| self.digests.first())
    }
}

/// One row of the tabular export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRow {
    pub digest: Option<String>,
    pub size: u64,
    pub verified_at: DateTime<Utc>,
    pub path: String,
    /// Sorted
    pub tags: Vec<String>,
}

/// Row counts, mostly for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCounts {
    pub tags: u64,
    pub blobs: u64,
    pub digests: u64,
    pub paths: u64,
    pub live_paths: u64,
}
