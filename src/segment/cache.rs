//! Per-reader lookup caches.
//!
//! Caches are pure optimizations: dropping or clearing one never changes
//! what a reader returns.

use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::error::Result;

/// A get-or-compute cache keyed by `K`.
#[derive(Debug)]
pub struct ValueCache<K, V> {
    name: &'static str,
    entries: RwLock<AHashMap<K, V>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<K, V> ValueCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Create an empty cache. `name` only appears in log lines.
    pub fn new(name: &'static str) -> Self {
        ValueCache {
            name,
            entries: RwLock::new(AHashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Look up a cached value.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let value = self.entries.read().get(key).cloned();
        let counter = if value.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Store a value, replacing any previous one.
    pub fn insert(&self, key: K, value: V) {
        self.entries.write().insert(key, value);
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// A failed computation caches nothing.
    pub fn get_or_try_insert_with<F>(&self, key: K, compute: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = compute()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        if !entries.is_empty() {
            log::debug!("clearing {} cache ({} entries)", self.name, entries.len());
        }
        entries.clear();
    }

    /// Hit and miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache performance statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached entries.
    pub entries: usize,

    /// Number of cache hits.
    pub hits: usize,

    /// Number of cache misses.
    pub misses: usize,
}

impl CacheStats {
    /// Calculate hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
