//! Byte-budget cache store with LRU eviction.

use gantry_abstraction::ModelHandle;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::types::{CacheEntry, CacheStats};

/// Errors that can occur when inserting into the cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The entry alone exceeds the hard byte budget; no amount of eviction
    /// can make room for it.
    #[error("Entry of {size_bytes} bytes exceeds cache capacity of {max_size_bytes} bytes")]
    EntryTooLarge {
        /// Declared size of the rejected entry.
        size_bytes: u64,
        /// Hard byte budget of the store.
        max_size_bytes: u64,
    },

    /// Eviction emptied the store and space is still insufficient. Unreachable
    /// for any insert that passed the `EntryTooLarge` check, handled anyway.
    #[error("Cache full and nothing left to evict (need {size_bytes} bytes, capacity {max_size_bytes})")]
    InsufficientCapacity {
        /// Declared size of the rejected entry.
        size_bytes: u64,
        /// Hard byte budget of the store.
        max_size_bytes: u64,
    },
}

/// Mutable store state. Guarded as a whole: every operation, including the
/// recency update in `get`, is a single critical section.
#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<String, CacheEntry>,
    current_size_bytes: u64,
    next_recency: u64,
    total_hits: u64,
    total_misses: u64,
    total_evictions: u64,
}

impl StoreInner {
    /// Evicts the least-recently-used entry. Returns the bytes freed, or
    /// `None` if the store was empty.
    fn evict_lru(&mut self) -> Option<u64> {
        let lru_key = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.recency)
            .map(|(key, _)| key.clone())?;

        let entry = self.entries.remove(&lru_key)?;
        self.current_size_bytes -= entry.size_bytes;
        self.total_evictions += 1;
        info!(
            key = %lru_key,
            freed_bytes = entry.size_bytes,
            remaining_bytes = self.current_size_bytes,
            "Evicted least-recently-used entry"
        );
        Some(entry.size_bytes)
    }
}

/// Fixed-byte-budget, access-ordered key/value store.
///
/// Values are opaque handles with a declared size; the store bounds the sum
/// of declared sizes under `max_size_bytes` by evicting least-recently-used
/// entries. The soft limit is advisory only: it is consumed by the background
/// sweeper and never enforced inside `put` or `get`.
#[derive(Debug)]
pub struct CacheStore {
    inner: Mutex<StoreInner>,
    max_size_bytes: u64,
    soft_limit_bytes: u64,
}

impl CacheStore {
    /// Creates a store with the given hard budget. When `soft_limit_bytes`
    /// is `None` it defaults to 85% of the hard budget.
    #[must_use]
    pub fn new(max_size_bytes: u64, soft_limit_bytes: Option<u64>) -> Self {
        let soft_limit_bytes = soft_limit_bytes.unwrap_or(max_size_bytes / 100 * 85);
        info!(max_size_bytes, soft_limit_bytes, "Initialized cache store");
        Self {
            inner: Mutex::new(StoreInner::default()),
            max_size_bytes,
            soft_limit_bytes,
        }
    }

    /// Returns the cached handle and promotes the entry to the
    /// most-recently-used position. A miss has no effect on ordering.
    pub fn get(&self, key: &str) -> Option<ModelHandle> {
        let mut guard = self.inner.lock().expect("cache lock poisoned");
        let inner = &mut *guard;
        if let Some(entry) = inner.entries.get_mut(key) {
            inner.next_recency += 1;
            entry.touch(inner.next_recency);
            inner.total_hits += 1;
            debug!(key = %key, access_count = entry.access_count, "Cache hit");
            Some(entry.value.clone())
        } else {
            inner.total_misses += 1;
            debug!(key = %key, "Cache miss");
            None
        }
    }

    /// Inserts an entry, evicting least-recently-used entries as needed to
    /// stay under the hard budget.
    ///
    /// Writing an existing key is a full replace: the old entry's bytes are
    /// released before eviction need is computed, so an update can never
    /// evict its own key.
    ///
    /// # Errors
    /// - `CacheError::EntryTooLarge` if `size_bytes` exceeds the hard budget
    ///   (store left unchanged).
    /// - `CacheError::InsufficientCapacity` if the store was emptied and
    ///   space is still insufficient.
    pub fn put(
        &self,
        key: &str,
        value: ModelHandle,
        size_bytes: u64,
    ) -> Result<(), CacheError> {
        if size_bytes > self.max_size_bytes {
            return Err(CacheError::EntryTooLarge {
                size_bytes,
                max_size_bytes: self.max_size_bytes,
            });
        }

        let mut inner = self.inner.lock().expect("cache lock poisoned");

        if let Some(old) = inner.entries.remove(key) {
            inner.current_size_bytes -= old.size_bytes;
        }

        while inner.current_size_bytes + size_bytes > self.max_size_bytes {
            if inner.evict_lru().is_none() {
                return Err(CacheError::InsufficientCapacity {
                    size_bytes,
                    max_size_bytes: self.max_size_bytes,
                });
            }
        }

        inner.next_recency += 1;
        let recency = inner.next_recency;
        inner
            .entries
            .insert(key.to_string(), CacheEntry::new(value, size_bytes, recency));
        inner.current_size_bytes += size_bytes;

        info!(
            key = %key,
            size_bytes,
            total_bytes = inner.current_size_bytes,
            "Added entry to cache"
        );
        Ok(())
    }

    /// Drops the entry if present. Returns whether an entry was removed.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if let Some(entry) = inner.entries.remove(key) {
            inner.current_size_bytes -= entry.size_bytes;
            debug!(key = %key, freed_bytes = entry.size_bytes, "Removed entry from cache");
            true
        } else {
            false
        }
    }

    /// Drops all entries and resets the byte accounting.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let cleared_count = inner.entries.len();
        inner.entries.clear();
        inner.current_size_bytes = 0;
        info!(cleared_count, "Cleared cache");
    }

    /// Returns whether an entry is resident, without counting as a use.
    pub fn contains(&self, key: &str) -> bool {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.contains_key(key)
    }

    /// Wall-clock time of the entry's last access, without counting as a use.
    pub fn last_access_time(&self, key: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.get(key).map(|entry| entry.last_used_at)
    }

    /// Size and last-access time of a resident entry in one lock take,
    /// without counting as a use.
    pub fn peek(&self, key: &str) -> Option<(u64, chrono::DateTime<chrono::Utc>)> {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner
            .entries
            .get(key)
            .map(|entry| (entry.size_bytes, entry.last_used_at))
    }

    /// Snapshot of current statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache lock poisoned");
        let utilization = if self.max_size_bytes == 0 {
            0.0
        } else {
            inner.current_size_bytes as f64 / self.max_size_bytes as f64
        };
        CacheStats {
            item_count: inner.entries.len(),
            current_size_bytes: inner.current_size_bytes,
            max_size_bytes: self.max_size_bytes,
            utilization,
            total_hits: inner.total_hits,
            total_misses: inner.total_misses,
            total_evictions: inner.total_evictions,
        }
    }

    /// Evicts least-recently-used entries until resident bytes drop to
    /// `target_bytes` or the store is empty. Returns the bytes freed.
    ///
    /// Used by the background sweeper with the soft limit as target; takes
    /// the same store lock as `put`.
    pub fn shed_to(&self, target_bytes: u64) -> u64 {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let before = inner.current_size_bytes;
        while inner.current_size_bytes > target_bytes {
            if inner.evict_lru().is_none() {
                break;
            }
        }
        before - inner.current_size_bytes
    }

    /// Drops entries that have not been accessed within `max_idle`.
    /// Returns the number of entries dropped.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let idle_keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.last_accessed.elapsed() > max_idle)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &idle_keys {
            if let Some(entry) = inner.entries.remove(key) {
                inner.current_size_bytes -= entry.size_bytes;
                inner.total_evictions += 1;
                info!(key = %key, freed_bytes = entry.size_bytes, "Evicted idle entry");
            }
        }
        idle_keys.len()
    }

    /// Hard byte budget.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Advisory soft limit consumed by the background sweeper.
    pub fn soft_limit_bytes(&self) -> u64 {
        self.soft_limit_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn handle(tag: &str) -> ModelHandle {
        Arc::new(tag.to_string())
    }

    fn assert_invariant(store: &CacheStore) {
        let inner = store.inner.lock().unwrap();
        let sum: u64 = inner.entries.values().map(|e| e.size_bytes).sum();
        assert_eq!(inner.current_size_bytes, sum);
        assert!(sum <= store.max_size_bytes);
    }

    #[test]
    fn test_basic_put_and_get() {
        let store = CacheStore::new(1000, Some(800));
        store.put("key1", handle("value1"), 100).unwrap();

        let value = store.get("key1").unwrap();
        assert_eq!(value.downcast_ref::<String>().unwrap(), "value1");

        let stats = store.stats();
        assert_eq!(stats.item_count, 1);
        assert_eq!(stats.current_size_bytes, 100);
        assert_invariant(&store);
    }

    #[test]
    fn test_cache_miss_has_no_side_effects() {
        let store = CacheStore::new(1000, None);
        assert!(store.get("nonexistent").is_none());

        let stats = store.stats();
        assert_eq!(stats.item_count, 0);
        assert_eq!(stats.total_misses, 1);
        assert_eq!(stats.total_hits, 0);
    }

    #[test]
    fn test_lru_eviction_order() {
        let store = CacheStore::new(1000, None);
        store.put("a", handle("a"), 400).unwrap();
        store.put("b", handle("b"), 400).unwrap();

        // Inserting c must evict a, the oldest.
        store.put("c", handle("c"), 400).unwrap();

        assert!(!store.contains("a"));
        assert!(store.contains("b"));
        assert!(store.contains("c"));
        assert_eq!(store.stats().current_size_bytes, 800);
        assert_eq!(store.stats().total_evictions, 1);
        assert_invariant(&store);
    }

    #[test]
    fn test_access_promotes_entry() {
        let store = CacheStore::new(1000, None);
        store.put("a", handle("a"), 300).unwrap();
        store.put("b", handle("b"), 300).unwrap();
        store.put("c", handle("c"), 300).unwrap();

        // Promote a; b becomes the eviction candidate.
        assert!(store.get("a").is_some());
        store.put("d", handle("d"), 300).unwrap();

        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert!(store.contains("c"));
        assert!(store.contains("d"));
        assert_invariant(&store);
    }

    #[test]
    fn test_replace_is_not_additive() {
        let store = CacheStore::new(1000, None);
        store.put("a", handle("v1"), 100).unwrap();
        store.put("a", handle("v2"), 150).unwrap();

        let stats = store.stats();
        assert_eq!(stats.item_count, 1);
        assert_eq!(stats.current_size_bytes, 150);

        let value = store.get("a").unwrap();
        assert_eq!(value.downcast_ref::<String>().unwrap(), "v2");
        assert_invariant(&store);
    }

    #[test]
    fn test_replace_larger_than_remaining_space() {
        let store = CacheStore::new(1000, None);
        store.put("a", handle("a"), 600).unwrap();
        store.put("b", handle("b"), 300).unwrap();

        // Replacing a with 900 bytes must release a's 600 first, then evict
        // b to make room. a must not evict itself.
        store.put("a", handle("a2"), 900).unwrap();

        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert_eq!(store.stats().current_size_bytes, 900);
        assert_invariant(&store);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let store = CacheStore::new(1000, None);
        store.put("a", handle("a"), 400).unwrap();

        let err = store.put("x", handle("x"), 1200).unwrap_err();
        assert_eq!(
            err,
            CacheError::EntryTooLarge { size_bytes: 1200, max_size_bytes: 1000 }
        );

        // Store unchanged.
        assert!(store.contains("a"));
        assert_eq!(store.stats().current_size_bytes, 400);
        assert_invariant(&store);
    }

    #[test]
    fn test_exact_capacity_fills_store() {
        let store = CacheStore::new(1000, None);
        store.put("a", handle("a"), 1000).unwrap();
        assert_eq!(store.stats().current_size_bytes, 1000);

        // A second full-size entry evicts the first rather than failing.
        store.put("b", handle("b"), 1000).unwrap();
        assert!(!store.contains("a"));
        assert!(store.contains("b"));
        assert_invariant(&store);
    }

    #[test]
    fn test_soft_limit_not_enforced_in_put() {
        let store = CacheStore::new(1000, Some(800));
        store.put("model1", handle("m1"), 700).unwrap();
        store.put("model2", handle("m2"), 200).unwrap();

        // 900 bytes resident: past the soft limit, under the hard limit.
        assert!(store.contains("model1"));
        assert!(store.contains("model2"));
        assert_eq!(store.stats().current_size_bytes, 900);

        // The hard limit still evicts.
        store.put("model3", handle("m3"), 200).unwrap();
        assert!(!store.contains("model1"));
        assert!(store.contains("model2"));
        assert!(store.contains("model3"));
        assert!(store.stats().current_size_bytes <= 1000);
        assert_invariant(&store);
    }

    #[test]
    fn test_repeated_get_is_idempotent_on_sizes() {
        let store = CacheStore::new(1000, None);
        store.put("a", handle("a"), 300).unwrap();
        store.put("b", handle("b"), 300).unwrap();

        for _ in 0..5 {
            assert!(store.get("a").is_some());
        }

        let stats = store.stats();
        assert_eq!(stats.item_count, 2);
        assert_eq!(stats.current_size_bytes, 600);
        assert_eq!(stats.total_hits, 5);
        assert_invariant(&store);
    }

    #[test]
    fn test_remove_and_clear() {
        let store = CacheStore::new(1000, None);
        store.put("a", handle("a"), 100).unwrap();
        store.put("b", handle("b"), 200).unwrap();

        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert_eq!(store.stats().current_size_bytes, 200);

        store.clear();
        let stats = store.stats();
        assert_eq!(stats.item_count, 0);
        assert_eq!(stats.current_size_bytes, 0);
        assert_invariant(&store);
    }

    #[test]
    fn test_size_tracking_through_updates() {
        let store = CacheStore::new(1000, None);
        store.put("key_0", handle("v0"), 100).unwrap();
        store.put("key_1", handle("v1"), 200).unwrap();
        store.put("key_2", handle("v2"), 300).unwrap();
        assert_eq!(store.stats().current_size_bytes, 600);

        store.put("key_1", handle("v1b"), 150).unwrap();
        assert_eq!(store.stats().current_size_bytes, 100 + 150 + 300);
        assert_invariant(&store);
    }

    #[test]
    fn test_last_access_time_does_not_promote() {
        let store = CacheStore::new(1000, None);
        store.put("a", handle("a"), 400).unwrap();
        store.put("b", handle("b"), 400).unwrap();

        // Reading a's timestamp must not save it from eviction.
        assert!(store.last_access_time("a").is_some());
        store.put("c", handle("c"), 400).unwrap();

        assert!(!store.contains("a"));
        assert!(store.last_access_time("a").is_none());
        assert_invariant(&store);
    }

    #[test]
    fn test_shed_to_target() {
        let store = CacheStore::new(1000, Some(800));
        store.put("a", handle("a"), 300).unwrap();
        store.put("b", handle("b"), 300).unwrap();
        store.put("c", handle("c"), 300).unwrap();

        let freed = store.shed_to(store.soft_limit_bytes());
        assert_eq!(freed, 300);
        assert!(!store.contains("a"));
        assert!(store.stats().current_size_bytes <= 800);
        assert_invariant(&store);
    }

    #[test]
    fn test_shed_to_zero_empties_store() {
        let store = CacheStore::new(1000, None);
        store.put("a", handle("a"), 300).unwrap();
        store.put("b", handle("b"), 300).unwrap();

        let freed = store.shed_to(0);
        assert_eq!(freed, 600);
        assert_eq!(store.stats().item_count, 0);
    }

    #[test]
    fn test_evict_idle() {
        let store = CacheStore::new(1000, None);
        store.put("a", handle("a"), 100).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        store.put("b", handle("b"), 100).unwrap();

        let evicted = store.evict_idle(Duration::from_millis(20));
        assert_eq!(evicted, 1);
        assert!(!store.contains("a"));
        assert!(store.contains("b"));
        assert_invariant(&store);
    }

    #[test]
    fn test_default_soft_limit_is_85_percent() {
        let store = CacheStore::new(1000, None);
        assert_eq!(store.soft_limit_bytes(), 850);
        assert_eq!(store.max_size_bytes(), 1000);
    }

    #[test]
    fn test_utilization() {
        let store = CacheStore::new(1000, None);
        store.put("a", handle("a"), 250).unwrap();
        let stats = store.stats();
        assert!((stats.utilization - 0.25).abs() < f64::EPSILON);
    }
}
