use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::cache_keys::in_namespace;

/// A cache entry stamped with the moment it was stored
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub stored_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= ttl
    }
}

/// A generic time-based cache with TTL support and lazy expiry.
///
/// Entries are only replaced wholesale; readers always get a clone of a
/// complete value. Locks are held for map access only and never across an
/// await point.
pub struct TimedCache<T> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    ttl: Duration,
}

impl<T: Clone> TimedCache<T> {
    /// Create a new cache with the specified TTL
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a value from the cache if it exists and hasn't expired.
    /// An expired entry is evicted on the way out.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        {
            let entries =
                self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                Some(entry) if !entry.is_expired(self.ttl, now) => {
                    return Some(entry.data.clone());
                },
                Some(_) => {},
                None => return None,
            }
        }

        let mut entries =
            self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // another writer may have refreshed the entry in between
        match entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => {
                Some(entry.data.clone())
            },
            Some(_) => {
                entries.remove(key);
                None
            },
            None => None,
        }
    }

    /// Store a value in the cache, replacing any previous entry
    pub fn set(&self, key: &str, value: T) {
        let mut entries =
            self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.to_string(),
            CacheEntry {
                data: value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Remove every key that belongs to the resource namespace `prefix`.
    /// Returns the number of evicted entries.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries =
            self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, _| !in_namespace(key, prefix));
        before - entries.len()
    }

    /// Remove all expired entries from the cache, including keys nobody
    /// reads again. Returns the number of evicted entries.
    pub fn cleanup_expired(&self) -> usize {
        let mut entries =
            self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let ttl = self.ttl;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(ttl, now));
        before - entries.len()
    }

    pub fn clear(&self) {
        let mut entries =
            self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> std::fmt::Debug for TimedCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedCache")
            .field("ttl", &self.ttl)
            .finish()
    }
}
