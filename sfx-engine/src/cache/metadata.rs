//! Mtime-validated metadata cache (C2).
//!
//! Ported from `original_source/infrastructure/cache/metadata_cache.py`'s
//! `MetadataCache`: a `TieredCache` keyed by canonicalized absolute path,
//! validated on every `get` against a fresh `stat()`.

use std::path::{Path, PathBuf};

use sfx_common::Result as CommonResult;
use tracing::{debug, warn};

use super::lru::TieredCache;
use crate::error::CacheError;
use crate::model::CachedMetadata;

/// Cache for per-file technical/embedded metadata, validated by `(mtime,
/// file_size)` witness (§4.2).
pub struct MetadataCache {
    cache: TieredCache<PathBuf, CachedMetadata>,
    persist_path: Option<PathBuf>,
}

impl MetadataCache {
    pub fn new(l1_size: usize, l2_size: usize, l1_ttl_secs: Option<u64>, l2_ttl_secs: Option<u64>) -> Self {
        Self {
            cache: TieredCache::new(
                l1_size,
                l2_size,
                l1_ttl_secs.map(std::time::Duration::from_secs),
                l2_ttl_secs.map(std::time::Duration::from_secs),
            ),
            persist_path: None,
        }
    }

    pub fn with_persistence(mut self, path: PathBuf) -> Self {
        self.persist_path = Some(path);
        self
    }

    fn canonical_key(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    }

    /// Look up cached metadata, validating it against a fresh `stat()`.
    /// Evicts and returns `None` on witness mismatch or an inaccessible file.
    pub fn get(&self, path: &Path) -> Option<CachedMetadata> {
        let key = Self::canonical_key(path);
        let cached = self.cache.get(&key)?;

        let stat = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => {
                self.cache.delete(&key);
                return None;
            }
        };
        let mtime = match sfx_common::time::mtime_seconds(&stat) {
            Ok(m) => m,
            Err(_) => {
                self.cache.delete(&key);
                return None;
            }
        };
        if mtime != cached.mtime || stat.len() != cached.file_size {
            debug!(path = %path.display(), "metadata cache invalidated: file changed");
            self.cache.delete(&key);
            return None;
        }
        Some(cached)
    }

    pub fn set(&self, path: &Path, metadata: CachedMetadata) {
        let key = Self::canonical_key(path);
        self.cache.set(key, metadata, true);
    }

    /// Get cached metadata, or call `extractor` and cache the result keyed
    /// by a fresh witness. Extractor errors are never cached.
    pub fn get_or_extract<E>(
        &self,
        path: &Path,
        extractor: impl FnOnce() -> Result<CachedMetadata, E>,
    ) -> Option<CachedMetadata>
    where
        E: std::fmt::Display,
    {
        if let Some(hit) = self.get(path) {
            return Some(hit);
        }

        match extractor() {
            Ok(mut extracted) => {
                let stat = std::fs::metadata(path).ok()?;
                extracted.mtime = sfx_common::time::mtime_seconds(&stat).ok()?;
                extracted.file_size = stat.len();
                self.set(path, extracted.clone());
                Some(extracted)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "metadata extraction failed");
                None
            }
        }
    }

    pub fn invalidate(&self, path: &Path) -> bool {
        self.cache.delete(&Self::canonical_key(path))
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn l1_stats(&self) -> super::stats::CacheStatsSnapshot {
        self.cache.l1_stats()
    }

    pub fn l2_stats(&self) -> super::stats::CacheStatsSnapshot {
        self.cache.l2_stats()
    }

    /// Best-effort JSON persistence for cold-start warmup (§4.2). Any
    /// load/save error is logged and ignored.
    pub fn load_from_disk(&self) -> CommonResult<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let load = || -> Result<Vec<CachedMetadata>, CacheError> {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)
                .map_err(|e| CacheError::Corrupt { path: path.display().to_string(), reason: e.to_string() })
        };
        match load() {
            Ok(entries) => {
                let n = entries.len();
                for entry in entries {
                    let key = Self::canonical_key(&entry.file_path);
                    self.cache.set(key, entry, false);
                }
                debug!(count = n, "loaded metadata cache entries from disk");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load metadata cache from disk");
            }
        }
        Ok(())
    }

    pub fn save_to_disk(&self, entries: &[CachedMetadata]) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let save = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string(entries)?;
            std::fs::write(path, json)
        };
        if let Err(e) = save() {
            warn!(path = %path.display(), error = %e, "failed to save metadata cache to disk");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample_metadata(path: &Path, mtime: f64, size: u64) -> CachedMetadata {
        CachedMetadata {
            file_path: path.to_path_buf(),
            mtime,
            file_size: size,
            duration_s: Some(1.0),
            sample_rate_hz: Some(48_000),
            bit_depth: Some(16),
            channels: Some(2),
            format: Some("wav".into()),
            bitrate_kbps: None,
            title: None,
            artist: None,
            album: None,
            genre: None,
            year: None,
            comment: None,
        }
    }

    #[test]
    fn hit_when_witness_matches() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        let path = file.path();
        let stat = std::fs::metadata(path).unwrap();
        let mtime = sfx_common::time::mtime_seconds(&stat).unwrap();

        let cache = MetadataCache::new(10, 10, None, None);
        cache.set(path, sample_metadata(path, mtime, stat.len()));
        assert!(cache.get(path).is_some());
    }

    #[test]
    fn miss_when_witness_stale() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        let path = file.path();

        let cache = MetadataCache::new(10, 10, None, None);
        cache.set(path, sample_metadata(path, 0.0, 999));
        assert!(cache.get(path).is_none());
    }

    #[test]
    fn get_or_extract_does_not_cache_on_error() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path();
        let cache = MetadataCache::new(10, 10, None, None);

        let result: Option<CachedMetadata> =
            cache.get_or_extract(path, || Err::<CachedMetadata, _>("boom"));
        assert!(result.is_none());
        assert!(cache.get(path).is_none());
    }

    #[test]
    fn get_or_extract_caches_fresh_witness() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        let path = file.path().to_path_buf();
        let cache = MetadataCache::new(10, 10, None, None);

        let extracted = cache.get_or_extract(&path, || {
            Ok::<_, String>(sample_metadata(&path, 0.0, 0))
        });
        assert!(extracted.is_some());
        assert!(cache.get(&path).is_some());
    }
}
