//! Cache backend trait and the no-op backend.
//!
//! Backends only store and fetch [`CacheEntry`] values by string key. They
//! know nothing about selections, single-flight or the dataset; the
//! aggregator owns those concerns, so swapping backends changes durability
//! and sharing but never results.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::entry::CacheEntry;

/// Errors a backend can report. The aggregator treats all of them as a
/// forced miss unless configured to fail fast.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry is corrupt: {0}")]
    Corrupt(String),

    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Pluggable storage for computed aggregates.
///
/// Implementations must be safe to call from many threads at once.
pub trait CacheBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Fetch the entry stored under `key`, if any and not expired.
    fn get(&self, key: &str) -> Result<Option<Arc<CacheEntry>>, CacheError>;

    /// Store `entry` under `key`. `ttl` of `None` means no expiry.
    fn set(&self, key: &str, entry: &Arc<CacheEntry>, ttl: Option<Duration>)
        -> Result<(), CacheError>;
}

/// Backend that never stores anything. Every lookup is a miss.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl CacheBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn get(&self, _key: &str) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        Ok(None)
    }

    fn set(
        &self,
        _key: &str,
        _entry: &Arc<CacheEntry>,
        _ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        Ok(())
    }
}
