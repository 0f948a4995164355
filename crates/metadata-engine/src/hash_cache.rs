//! Content-hash cache for large asset files
//!
//! Model and LoRA files run to gigabytes; hashing one on every save would
//! dominate the pipeline. The digest of each asset is memoized in a sidecar
//! file `<asset_path>.sha256` holding one 64-character lowercase hex digest,
//! newline-terminated. A sidecar is trusted iff its modification time is at
//! least the source file's modification time — touching the asset lazily
//! invalidates the cache.
//!
//! Cache I/O is never allowed to fail the hash operation: a hit that cannot
//! be read falls through to recomputation, and a sidecar that cannot be
//! written is logged once and forgotten.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Extension appended to the asset path to form the sidecar path.
pub const SIDECAR_EXTENSION: &str = "sha256";

/// Chunk size for streaming the source file through the digest.
const CHUNK_SIZE: usize = 1024 * 1024;

/// Sidecar-memoized SHA-256 digests for asset files.
///
/// Concurrent batch saves may request the same asset from several pipelines;
/// sidecar writes are serialized through a per-path lock so two pipelines
/// never interleave a write.
#[derive(Default)]
pub struct HashCache {
    write_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Digest of the file at `path`.
    ///
    /// Returns the cached digest without reading the asset when the sidecar
    /// is valid; otherwise streams the file through SHA-256, best-effort
    /// writes the sidecar, and returns the fresh digest. `None` only when
    /// the source file itself cannot be read.
    pub fn digest(&self, path: &Path) -> Option<String> {
        let sidecar = sidecar_path(path);

        if let Some(cached) = self.read_sidecar(path, &sidecar) {
            log::debug!("hash cache hit for {}", path.display());
            return Some(cached);
        }

        let digest = match hash_file(path) {
            Ok(digest) => digest,
            Err(err) => {
                log::debug!("cannot hash {}: {}", path.display(), err);
                return None;
            }
        };

        self.write_sidecar(&sidecar, &digest);
        Some(digest)
    }

    /// Return the sidecar digest iff the sidecar is fresh and well-formed.
    fn read_sidecar(&self, source: &Path, sidecar: &Path) -> Option<String> {
        let source_mtime = std::fs::metadata(source).ok()?.modified().ok()?;
        let sidecar_meta = std::fs::metadata(sidecar).ok()?;
        let sidecar_mtime = sidecar_meta.modified().ok()?;

        if sidecar_mtime < source_mtime {
            log::debug!("stale hash sidecar for {}", source.display());
            return None;
        }

        let content = std::fs::read_to_string(sidecar).ok()?;
        let digest = content.trim();
        if digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(digest.to_ascii_lowercase())
        } else {
            log::warn!("malformed hash sidecar at {}", sidecar.display());
            None
        }
    }

    /// Best-effort sidecar write; failures are logged and swallowed.
    fn write_sidecar(&self, sidecar: &Path, digest: &str) {
        let lock = {
            let mut locks = self.write_locks.lock();
            locks
                .entry(sidecar.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock();

        if let Err(err) = std::fs::write(sidecar, format!("{}\n", digest)) {
            log::warn!("failed to write hash sidecar {}: {}", sidecar.display(), err);
        }
    }
}

/// Sidecar path: the source path with `.sha256` appended.
fn sidecar_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(SIDECAR_EXTENSION);
    PathBuf::from(os)
}

/// Stream the file through SHA-256 in fixed-size chunks.
fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
