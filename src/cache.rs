//! Bounded last-written-value cache used to suppress redundant writes
//!
//! The cache only ever saves work. A miss or an eviction costs one extra
//! idempotent write, never data.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Least-recently-used map from row key to the value last written for it
#[derive(Debug)]
pub struct WriteCache<K: Hash + Eq, V> {
    entries: LruCache<K, V>,
    capacity: Option<NonZeroUsize>,
    evictions: u64,
}

impl<K: Hash + Eq + Clone, V: PartialEq> WriteCache<K, V> {
    /// Creates a cache holding at most `capacity` entries, or any number of
    /// entries when `capacity` is `None`
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        let entries = match capacity {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };

        Self {
            entries,
            capacity,
            evictions: 0,
        }
    }

    /// Returns the last written value and marks the entry most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Records `value` as the last write for `key`
    ///
    /// Once the cache is over capacity the least recently used entry is
    /// dropped.
    pub fn set(&mut self, key: K, value: V) {
        if let Some((old_key, _)) = self.entries.push(key.clone(), value) {
            if old_key != key {
                self.evictions += 1;
            }
        }
    }

    /// Returns true when `value` is exactly what was last written for `key`
    pub fn is_current(&mut self, key: &K, value: &V) -> bool {
        self.get(key).is_some_and(|cached| cached == value)
    }

    /// Drops the entry for `key`
    pub fn forget(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key)
    }

    /// Drops every entry whose key matches `predicate`
    pub fn forget_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            self.entries.pop(key);
        }
        doomed.len()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the configured bound, `None` when unbounded
    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.capacity
    }

    /// Returns how many entries have been pushed out by the bound
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
