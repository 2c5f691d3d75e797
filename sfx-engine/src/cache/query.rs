//! Hashed-query result cache with tag-based mass invalidation (C4, §4.4).
//!
//! Ported from `original_source/infrastructure/cache/query_cache.py`'s
//! `QueryCache`: an `LruCache` keyed by a SHA-256 query hash, plus a
//! `tag -> {query_hash}` side index consulted by [`QueryCache::invalidate_by_tag`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::lru::LruCache;
use super::stats::CacheStatsSnapshot;

/// Cached query result plus the bookkeeping spec.md §3's `QueryCacheEntry` names.
#[derive(Debug, Clone)]
pub struct QueryCacheEntry<T> {
    pub result: T,
    pub created_at: std::time::Instant,
    pub access_count: u64,
}

/// Hashed-query result cache (§4.4). Entries are keyed by the first 16 hex
/// characters of `SHA256("{query_text}|{params_tuple}")`; `set` may register
/// invalidation tags (table names) later swept en masse by
/// [`QueryCache::invalidate_by_tag`].
pub struct QueryCache<T> {
    cache: LruCache<String, QueryCacheEntry<T>>,
    tags: Mutex<HashMap<String, std::collections::HashSet<String>>>,
}

impl<T: Clone> QueryCache<T> {
    pub fn new(max_size: usize, ttl_secs: Option<u64>) -> Self {
        Self {
            cache: LruCache::new(max_size, ttl_secs.map(std::time::Duration::from_secs)),
            tags: Mutex::new(HashMap::new()),
        }
    }

    /// `"{query_text}|{params_tuple}"` hashed, 16 hex chars (§4.4).
    pub fn hash_query(query_text: &str, params: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{query_text}|{params}").as_bytes());
        let digest = hasher.finalize();
        digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
    }

    pub fn get(&self, query_text: &str, params: &str) -> Option<T> {
        let key = Self::hash_query(query_text, params);
        self.cache.get(&key).map(|entry| entry.result)
    }

    /// Cache `result` under `(query_text, params)`, registering it against
    /// every tag in `tags` so [`invalidate_by_tag`](Self::invalidate_by_tag)
    /// can find it later.
    pub fn set(&self, query_text: &str, params: &str, result: T, tags: &[&str]) {
        let key = Self::hash_query(query_text, params);
        self.cache.set(
            key.clone(),
            QueryCacheEntry { result, created_at: std::time::Instant::now(), access_count: 0 },
        );
        if !tags.is_empty() {
            let mut guard = self.tags.lock();
            for tag in tags {
                guard.entry(tag.to_string()).or_default().insert(key.clone());
            }
        }
    }

    /// Get the cached result, or call `compute` and cache it under `tags`.
    pub fn get_or_compute(
        &self,
        query_text: &str,
        params: &str,
        tags: &[&str],
        compute: impl FnOnce() -> T,
    ) -> T {
        if let Some(hit) = self.get(query_text, params) {
            return hit;
        }
        let result = compute();
        self.set(query_text, params, result.clone(), tags);
        result
    }

    /// Remove every entry registered under `tag`. The cache itself never
    /// observes writes — callers must invoke this after mutating the
    /// backing record store (§4.4).
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let hashes = {
            let mut guard = self.tags.lock();
            guard.remove(tag).unwrap_or_default()
        };
        let mut count = 0;
        for hash in &hashes {
            if self.cache.delete(hash) {
                count += 1;
            }
        }
        count
    }

    pub fn clear(&self) {
        self.cache.clear();
        self.tags.lock().clear();
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }
}

/// Thread-shareable handle, mirroring how callers outside this module use
/// the cache (one shared instance behind `init_*`, per spec.md §9).
pub type SharedQueryCache<T> = Arc<QueryCache<T>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit_after_set() {
        let cache: QueryCache<i32> = QueryCache::new(10, None);
        assert_eq!(cache.get("select 1", ""), None);
        cache.set("select 1", "", 42, &[]);
        assert_eq!(cache.get("select 1", ""), Some(42));
    }

    #[test]
    fn invariant_4_invalidate_by_tag_evicts_tagged_entries() {
        let cache: QueryCache<i32> = QueryCache::new(10, None);
        cache.set("select * from audio_records", "", 1, &["audio_records"]);
        cache.set("select * from audio_tags", "", 2, &["audio_tags"]);

        let removed = cache.invalidate_by_tag("audio_records");
        assert_eq!(removed, 1);
        assert_eq!(cache.get("select * from audio_records", ""), None);
        assert_eq!(cache.get("select * from audio_tags", ""), Some(2));
    }

    #[test]
    fn invalidate_unknown_tag_is_a_noop() {
        let cache: QueryCache<i32> = QueryCache::new(10, None);
        assert_eq!(cache.invalidate_by_tag("nope"), 0);
    }

    #[test]
    fn get_or_compute_caches_result_once() {
        let cache: QueryCache<i32> = QueryCache::new(10, None);
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            7
        };
        assert_eq!(cache.get_or_compute("q", "", &[], compute), 7);
        assert_eq!(cache.get_or_compute("q", "", &[], || unreachable!()), 7);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn hash_is_sixteen_hex_chars() {
        let h = QueryCache::<i32>::hash_query("select 1", "()");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
