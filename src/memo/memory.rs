//! Process-local cache backend.
//!
//! Entries live in a `HashMap` behind a mutex, each with an optional expiry
//! and a last-used stamp. When a capacity is set, inserting a new key into a
//! full map first drops expired entries and then the least recently used one.
//! Everything is lost when the process exits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::backend::{CacheBackend, CacheError};
use super::entry::CacheEntry;

struct Slot {
    entry: Arc<CacheEntry>,
    expires_at: Option<Instant>,
    last_used: Instant,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

/// In-memory backend with optional capacity.
pub struct MemoryBackend {
    slots: Mutex<HashMap<String, Slot>>,
    capacity: Option<usize>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Unbounded backend.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            capacity: None,
        }
    }

    /// Backend holding at most `capacity` entries (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Number of stored entries, expired ones included until touched.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make_room(slots: &mut HashMap<String, Slot>, capacity: usize, now: Instant) {
        if slots.len() < capacity {
            return;
        }
        slots.retain(|_, s| !s.is_expired(now));
        while slots.len() >= capacity {
            let Some(oldest) = slots
                .iter()
                .min_by_key(|(_, s)| s.last_used)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            log::debug!("memory cache evicting {oldest}");
            slots.remove(&oldest);
        }
    }
}

impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.get(key).is_some_and(|s| s.is_expired(now)) {
            slots.remove(key);
            return Ok(None);
        }
        Ok(slots.get_mut(key).map(|slot| {
            slot.last_used = now;
            Arc::clone(&slot.entry)
        }))
    }

    fn set(
        &self,
        key: &str,
        entry: &Arc<CacheEntry>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(capacity) = self.capacity {
            if !slots.contains_key(key) {
                Self::make_room(&mut slots, capacity, now);
            }
        }
        slots.insert(
            key.to_string(),
            Slot {
                entry: Arc::clone(entry),
                expires_at: ttl.and_then(|t| now.checked_add(t)),
                last_used: now,
            },
        );
        Ok(())
    }
}
