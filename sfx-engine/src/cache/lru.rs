//! Generic bounded-size LRU cache with optional TTL and eviction hook (C1).
//!
//! Ported from `original_source/infrastructure/cache/lru_cache.py`'s
//! `LRUCache`/`TieredCache` pair: an `OrderedDict` of `(value, timestamp)`
//! under a lock becomes an `IndexMap` under a `parking_lot::Mutex` here,
//! shift-removing the oldest entry on overflow the same way `move_to_end` +
//! `popitem(last=False)` does there.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::time::{Duration, Instant};

use super::stats::{CacheStats, CacheStatsSnapshot};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Thread-safe, bounded LRU cache with an optional TTL and eviction callback.
///
/// All operations are linearizable under an internal mutex (spec.md §5).
pub struct LruCache<K, V> {
    max_size: usize,
    ttl: Option<Duration>,
    on_evict: Option<Box<dyn Fn(&K, &V) + Send + Sync>>,
    inner: Mutex<IndexMap<K, Entry<V>>>,
    stats: CacheStats,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(max_size: usize, ttl: Option<Duration>) -> Self {
        Self {
            max_size: max_size.max(1),
            ttl,
            on_evict: None,
            inner: Mutex::new(IndexMap::new()),
            stats: CacheStats::default(),
        }
    }

    pub fn with_evict_hook(
        max_size: usize,
        ttl: Option<Duration>,
        on_evict: impl Fn(&K, &V) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_evict: Some(Box::new(on_evict)),
            ..Self::new(max_size, ttl)
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    fn is_expired(&self, entry: &Entry<V>) -> bool {
        match self.ttl {
            Some(ttl) => entry.inserted_at.elapsed() > ttl,
            None => false,
        }
    }

    /// Evict the entry at `key`, if any, invoking the eviction hook.
    fn evict_locked(&self, map: &mut IndexMap<K, Entry<V>>, key: &K) {
        if let Some(entry) = map.shift_remove(key) {
            self.stats.record_eviction();
            if let Some(hook) = &self.on_evict {
                hook(key, &entry.value);
            }
        }
    }

    /// Get a value, promoting it to most-recently-used. Synchronously evicts
    /// the entry first if it has expired.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut map = self.inner.lock();
        let expired = match map.get(key) {
            Some(entry) => self.is_expired(entry),
            None => {
                self.stats.record_miss();
                return None;
            }
        };
        if expired {
            self.evict_locked(&mut map, key);
            self.stats.record_miss();
            return None;
        }
        // Promote to most-recently-used by re-inserting at the end.
        let entry = map.shift_remove(key).expect("checked present above");
        let value = entry.value.clone();
        map.insert(key.clone(), entry);
        self.stats.record_hit();
        Some(value)
    }

    /// Insert or update a value, evicting the least-recently-used entries
    /// past capacity.
    pub fn set(&self, key: K, value: V) {
        let mut map = self.inner.lock();
        map.shift_remove(&key);
        map.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        while map.len() > self.max_size {
            if let Some((oldest, _)) = map.iter().next().map(|(k, _)| (k.clone(), ())) {
                self.evict_locked(&mut map, &oldest);
            } else {
                break;
            }
        }
    }

    pub fn delete(&self, key: &K) -> bool {
        let mut map = self.inner.lock();
        map.shift_remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut map = self.inner.lock();
        map.clear();
        self.stats.reset();
    }

    /// Check presence without affecting LRU order (expired entries count as absent).
    pub fn contains(&self, key: &K) -> bool {
        let map = self.inner.lock();
        match map.get(key) {
            Some(entry) => !self.is_expired(entry),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry, returning the count removed.
    pub fn cleanup_expired(&self) -> usize {
        let Some(_) = self.ttl else { return 0 };
        let mut map = self.inner.lock();
        let expired: Vec<K> = map
            .iter()
            .filter(|(_, e)| self.is_expired(e))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.evict_locked(&mut map, key);
        }
        expired.len()
    }
}

/// Two-tier cache: a small, short-TTL L1 in front of a larger, longer-TTL
/// L2. An L2 hit is always promoted to L1 (spec.md §4.1).
pub struct TieredCache<K, V> {
    l1: LruCache<K, V>,
    l2: LruCache<K, V>,
}

impl<K, V> TieredCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(l1_size: usize, l2_size: usize, l1_ttl: Option<Duration>, l2_ttl: Option<Duration>) -> Self {
        Self {
            l1: LruCache::new(l1_size, l1_ttl),
            l2: LruCache::new(l2_size, l2_ttl),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(v) = self.l1.get(key) {
            return Some(v);
        }
        let v = self.l2.get(key)?;
        self.l1.set(key.clone(), v.clone());
        Some(v)
    }

    /// `hot = true` writes to L1; otherwise L2 (the default tier for new entries).
    pub fn set(&self, key: K, value: V, hot: bool) {
        if hot {
            self.l1.set(key, value);
        } else {
            self.l2.set(key, value);
        }
    }

    pub fn delete(&self, key: &K) -> bool {
        let l1 = self.l1.delete(key);
        let l2 = self.l2.delete(key);
        l1 || l2
    }

    pub fn clear(&self) {
        self.l1.clear();
        self.l2.clear();
    }

    pub fn contains(&self, key: &K) -> bool {
        self.l1.contains(key) || self.l2.contains(key)
    }

    pub fn l1_stats(&self) -> CacheStatsSnapshot {
        self.l1.stats()
    }

    pub fn l2_stats(&self) -> CacheStatsSnapshot {
        self.l2.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn get_miss_on_empty_cache() {
        let cache: LruCache<&str, i32> = LruCache::new(2, None);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn set_then_get_is_a_hit() {
        let cache = LruCache::new(2, None);
        cache.set("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn eviction_respects_capacity_invariant() {
        let cache = LruCache::new(2, None);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), None, "oldest entry should have been evicted");
    }

    #[test]
    fn get_promotes_to_most_recently_used() {
        let cache = LruCache::new(2, None);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.get(&"a"); // a is now MRU, b is LRU
        cache.set("c", 3); // should evict b, not a
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn ttl_expiry_evicts_on_get() {
        let cache = LruCache::new(10, Some(Duration::from_millis(1)));
        cache.set("a", 1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn cleanup_expired_counts_removed_entries() {
        let cache = LruCache::new(10, Some(Duration::from_millis(1)));
        cache.set("a", 1);
        cache.set("b", 2);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn on_evict_hook_is_invoked() {
        let evicted = Arc::new(AtomicUsize::new(0));
        let evicted2 = evicted.clone();
        let cache = LruCache::with_evict_hook(1, None, move |_k: &&str, _v: &i32| {
            evicted2.fetch_add(1, Ordering::SeqCst);
        });
        cache.set("a", 1);
        cache.set("b", 2);
        assert_eq!(evicted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn contains_does_not_affect_order() {
        let cache = LruCache::new(2, None);
        cache.set("a", 1);
        cache.set("b", 2);
        assert!(cache.contains(&"a"));
        cache.set("c", 3);
        // "a" was not promoted by `contains`, so it's still the LRU victim.
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn tiered_cache_promotes_l2_hit_to_l1() {
        let tiered: TieredCache<&str, i32> = TieredCache::new(1, 10, None, None);
        tiered.set("a", 1, false); // L2
        assert_eq!(tiered.get(&"a"), Some(1));
        assert!(tiered.l1.contains(&"a"), "L2 hit should promote to L1");
    }

    #[test]
    fn tiered_cache_hot_set_goes_to_l1() {
        let tiered: TieredCache<&str, i32> = TieredCache::new(10, 10, None, None);
        tiered.set("a", 1, true);
        assert!(tiered.l1.contains(&"a"));
        assert!(!tiered.l2.contains(&"a"));
    }

    #[test]
    fn tiered_cache_delete_spans_both_tiers() {
        let tiered: TieredCache<&str, i32> = TieredCache::new(10, 10, None, None);
        tiered.set("a", 1, true);
        tiered.set("b", 2, false);
        assert!(tiered.delete(&"a"));
        assert!(tiered.delete(&"b"));
        assert!(!tiered.contains(&"a"));
        assert!(!tiered.contains(&"b"));
    }

    #[test]
    fn concurrent_access_never_exceeds_capacity() {
        let cache = Arc::new(LruCache::new(50, None));
        let mut handles = vec![];
        for t in 0..8 {
            let cache = cache.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    cache.set(t * 1000 + i, i);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= 50);
    }
}
