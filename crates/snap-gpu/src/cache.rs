//! LRU cache for geometry-keyed GPU objects.
//!
//! Backs two caches in the helper:
//! - Scalers, keyed by full scale geometry (bounded; evicting a scaler
//!   frees its intermediate textures)
//! - Linked programs, keyed by shader kind (unbounded)

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Hit ratio (0.0 - 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Least-recently-used cache with an entry-count capacity.
pub struct LruCache<K, V> {
    entries: HashMap<K, V>,
    /// Access order for eviction (front = oldest).
    access_order: VecDeque<K>,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            access_order: VecDeque::new(),
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Creates a cache that never evicts.
    pub fn unbounded() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Returns the cached value, marking it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.entries.contains_key(key) {
            self.hits += 1;
            self.touch(key);
            self.entries.get(key)
        } else {
            self.misses += 1;
            None
        }
    }

    /// Returns `true` if `key` is cached. Does not affect order or stats.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts a value, returning whatever was evicted to make room.
    ///
    /// An existing value under `key` is replaced and returned as well.
    pub fn insert(&mut self, key: K, value: V) -> Vec<V> {
        let mut dropped = Vec::new();
        if let Some(old) = self.remove(&key) {
            dropped.push(old);
        }
        while self.entries.len() >= self.capacity {
            match self.evict_lru() {
                Some(evicted) => dropped.push(evicted),
                None => break,
            }
        }
        self.entries.insert(key.clone(), value);
        self.access_order.push_back(key);
        dropped
    }

    /// Returns the cached value or inserts the one built by `build`.
    ///
    /// `build` errors are returned and nothing is cached.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: K,
        build: impl FnOnce() -> Result<V, E>,
    ) -> Result<&V, E> {
        if !self.entries.contains_key(&key) {
            self.misses += 1;
            let value = build()?;
            // Evicted values drop here.
            while self.entries.len() >= self.capacity && self.evict_lru().is_some() {}
            self.access_order.push_back(key.clone());
            return Ok(self.entries.entry(key).or_insert(value));
        }
        self.hits += 1;
        self.touch(&key);
        Ok(&self.entries[&key])
    }

    /// Removes one entry.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.access_order.retain(|k| k != key);
        Some(value)
    }

    /// Evicts the least recently used entry.
    pub fn evict_lru(&mut self) -> Option<V> {
        let key = self.access_order.pop_front()?;
        let value = self.entries.remove(&key)?;
        self.evictions += 1;
        Some(value)
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            entries: self.entries.len(),
        }
    }

    /// Reset statistics.
    pub fn reset_stats(&mut self) {
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }

    /// Move to back of the access order.
    fn touch(&mut self, key: &K) {
        self.access_order.retain(|k| k != key);
        self.access_order.push_back(key.clone());
    }
}
