//! Content hashing
//!
//! A [`ContentHasher`] turns a byte stream into a lowercase hex digest under
//! one named algorithm. Hashers live in a [`HasherRegistry`] keyed by that
//! name so an index can hold digests from more than one algorithm.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{IndexError, Result};

pub const BLAKE3: &str = "blake3";
pub const SHA256: &str = "sha256";
pub const DEFAULT_ALGORITHM: &str = BLAKE3;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Digest plus the number of bytes that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashOutput {
    pub digest: String,
    pub bytes: u64,
}

pub trait ContentHasher: Send + Sync {
    fn algorithm(&self) -> &'static str;

    /// Consume `reader` to EOF. Any read error aborts without a digest.
    fn digest_reader(&self, reader: &mut dyn Read) -> io::Result<HashOutput>;
}

/// BLAKE3, the default primary algorithm.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Hasher;

impl ContentHasher for Blake3Hasher {
    fn algorithm(&self) -> &'static str {
        BLAKE3
    }

    fn digest_reader(&self, reader: &mut dyn Read) -> io::Result<HashOutput> {
        let mut hasher = blake3::Hasher::new();
        let bytes = pump(reader, |chunk| {
            hasher.update(chunk);
        })?;
        Ok(HashOutput {
            digest: hasher.finalize().to_hex().to_string(),
            bytes,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn algorithm(&self) -> &'static str {
        SHA256
    }

    fn digest_reader(&self, reader: &mut dyn Read) -> io::Result<HashOutput> {
        let mut hasher = Sha256::new();
        let bytes = pump(reader, |chunk| hasher.update(chunk))?;
        Ok(HashOutput {
            digest: to_hex(&hasher.finalize()),
            bytes,
        })
    }
}

fn pump(reader: &mut dyn Read, mut sink: impl FnMut(&[u8])) -> io::Result<u64> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink(&buf[..n]);
        total += n as u64;
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Hash a file's full content. The handle is closed before returning.
pub fn digest_file(hasher: &dyn ContentHasher, path: &Path) -> Result<HashOutput> {
    let mut file = File::open(path).map_err(|e| IndexError::unreadable(path, e))?;
    hasher
        .digest_reader(&mut file)
        .map_err(|e| IndexError::unreadable(path, e))
}

/// [`digest_file`] on the blocking pool.
pub async fn digest_file_blocking(
    hasher: Arc<dyn ContentHasher>,
    path: PathBuf,
) -> Result<HashOutput> {
    tokio::task::spawn_blocking(move || digest_file(hasher.as_ref(), &path)).await?
}

/// Hashers keyed by algorithm name.
#[derive(Clone)]
pub struct HasherRegistry {
    hashers: BTreeMap<&'static str, Arc<dyn ContentHasher>>,
}

impl HasherRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            hashers: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, hasher: Arc<dyn ContentHasher>) {
        self.hashers.insert(hasher.algorithm(), hasher);
    }

    pub fn get(&self, algorithm: &str) -> Result<Arc<dyn ContentHasher>> {
        self.hashers
            .get(algorithm)
            .cloned()
            .ok_or_else(|| IndexError::UnknownAlgorithm(algorithm.to_string()))
    }

    pub fn algorithms(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.hashers.keys().copied()
    }
}

impl Default for HasherRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(Blake3Hasher));
        registry.register(Arc::new(Sha256Hasher));
        registry
    }
}

impl std::fmt::Debug for HasherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.hashers.keys()).finish()
    }
}
