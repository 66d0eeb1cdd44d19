// src/watch/hash.rs

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::{Hash, Hasher};
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Per-path content hashes, used to suppress change events for files whose
/// bytes did not actually change (editors touching mtimes, repeated saves).
///
/// Purely in-memory: the engine makes no cross-restart promises, so there is
/// nothing to persist.
#[derive(Debug, Default)]
pub struct HashCache {
    hashes: HashMap<String, Hash>,
}

impl HashCache {
    pub fn new() -> HashCache {
        HashCache::default()
    }

    /// Record the hash for a path. Returns true if the content changed since
    /// the last recorded hash (or no hash was recorded yet).
    pub fn update(&mut self, path: &str, hash: Hash) -> bool {
        match self.hashes.insert(path.to_string(), hash) {
            Some(old) => old != hash,
            None => true,
        }
    }

    /// Drop the recorded hash for a deleted path.
    pub fn forget(&mut self, path: &str) {
        self.hashes.remove(path);
    }
}

/// Hash the contents of a file on disk.
pub async fn hash_file(path: &Path) -> Result<Hash> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening file for hashing: {path:?}"))?;

    let mut hasher = Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let hash = hasher.finalize();
    debug!(path = ?path, hash = %hash.to_hex(), "hashed file contents");
    Ok(hash)
}
