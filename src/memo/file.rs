//! Shared on-disk cache backend.
//!
//! One JSON document per key in a directory. The file name is the SHA-256 of
//! the key, so arbitrary keys map to safe names; the full key is stored in the
//! document and checked on read. Any number of processes may point at the same
//! directory: writes go to a temporary file first and are renamed into place,
//! so readers see either the old document or the new one.
//!
//! ```text
//!  .dashboard-cache/
//!    3f1c…9a.json   { "key": "...", "expires_at_ms": null, "entry": { ... } }
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::backend::{CacheBackend, CacheError};
use super::entry::CacheEntry;

#[derive(Serialize, Deserialize)]
struct Document {
    key: String,
    /// Unix epoch milliseconds; `None` never expires.
    expires_at_ms: Option<u64>,
    entry: CacheEntry,
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Directory-backed cache shared across processes and restarts.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Use `dir` as the store, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

impl CacheBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &str) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let doc: Document = serde_json::from_slice(&bytes)
            .map_err(|e| CacheError::Corrupt(format!("{}: {e}", path.display())))?;

        if doc.key != key {
            // Digest collision or a foreign file: not ours.
            log::warn!("file cache key mismatch in {}", path.display());
            return Ok(None);
        }
        if doc.expires_at_ms.is_some_and(|t| now_ms() >= t) {
            // Another process may have removed or replaced it already.
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != ErrorKind::NotFound {
                    log::debug!("could not remove expired {}: {e}", path.display());
                }
            }
            return Ok(None);
        }
        Ok(Some(Arc::new(doc.entry)))
    }

    fn set(
        &self,
        key: &str,
        entry: &Arc<CacheEntry>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let doc = Document {
            key: key.to_string(),
            expires_at_ms: ttl.map(|t| {
                now_ms().saturating_add(u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
            }),
            entry: CacheEntry::clone(entry),
        };
        let bytes = serde_json::to_vec(&doc)
            .map_err(|e| CacheError::Corrupt(format!("serializing entry: {e}")))?;

        let path = self.path_for(key);
        let tmp = path.with_extension(format!(
            "{}.{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}
