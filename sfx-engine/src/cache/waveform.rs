//! Two-tier waveform peak-profile cache with disk persistence (C3).
//!
//! Ported from `original_source/infrastructure/cache/waveform_cache.py`'s
//! `WaveformCacheManager`/`WaveformData`: an in-memory `LRUCache` backed by
//! `<md5(path)>.waveform` binary files, little-endian header `(mtime,
//! sample_count, duration, channels)` followed by a zlib-compressed `f32`
//! sample array (§3).

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use tracing::{debug, warn};

use super::lru::LruCache;
use crate::error::CacheError;
use crate::model::WaveformProfile;

/// Tolerance (seconds) for the mtime witness comparison (§4.3).
const MTIME_TOLERANCE_SECS: f64 = 0.001;
const HEADER_LEN: usize = 8 + 4 + 8 + 4;

/// Cache for downsampled waveform peak profiles, memory-tiered over
/// disk-persisted `.waveform` files (§4.3).
pub struct WaveformCache {
    memory: LruCache<String, WaveformProfile>,
    cache_dir: Option<PathBuf>,
}

impl WaveformCache {
    pub fn new(memory_size: usize, memory_ttl_secs: Option<u64>, cache_dir: Option<PathBuf>) -> Self {
        Self {
            memory: LruCache::new(memory_size, memory_ttl_secs.map(std::time::Duration::from_secs)),
            cache_dir,
        }
    }

    /// `md5(canonicalized absolute path)` hex digest, the cache key shared
    /// between the memory tier and the on-disk filename (§3).
    fn cache_key(path: &Path) -> String {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut hasher = Md5::new();
        hasher.update(canonical.to_string_lossy().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn disk_path(&self, key: &str) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(format!("{key}.waveform")))
    }

    fn current_mtime(path: &Path) -> Option<f64> {
        let stat = std::fs::metadata(path).ok()?;
        sfx_common::time::mtime_seconds(&stat).ok()
    }

    fn mtime_matches(profile: &WaveformProfile, current: f64) -> bool {
        (profile.mtime - current).abs() < MTIME_TOLERANCE_SECS
    }

    /// Look up a cached waveform profile, validating against a fresh mtime.
    /// Memory miss falls through to the disk tier; a disk hit promotes the
    /// entry back into memory (§4.3).
    pub fn get(&self, path: &Path) -> Option<WaveformProfile> {
        let key = Self::cache_key(path);
        let Some(current_mtime) = Self::current_mtime(path) else {
            self.memory.delete(&key);
            return None;
        };

        if let Some(cached) = self.memory.get(&key) {
            if Self::mtime_matches(&cached, current_mtime) {
                return Some(cached);
            }
            self.memory.delete(&key);
        }

        let Some(disk_path) = self.disk_path(&key) else { return None };
        if !disk_path.exists() {
            return None;
        }

        match Self::read_disk(&disk_path) {
            Ok(profile) => {
                if Self::mtime_matches(&profile, current_mtime) {
                    self.memory.set(key, profile.clone());
                    Some(profile)
                } else {
                    let _ = std::fs::remove_file(&disk_path);
                    None
                }
            }
            Err(e) => {
                warn!(path = %disk_path.display(), error = %e, "corrupt waveform cache entry, deleting");
                let _ = std::fs::remove_file(&disk_path);
                None
            }
        }
    }

    /// Cache `profile` for `path`: in memory, and on disk if a cache
    /// directory is configured (created lazily on first write).
    pub fn set(&self, path: &Path, profile: WaveformProfile) {
        let key = Self::cache_key(path);
        self.memory.set(key.clone(), profile.clone());

        let Some(disk_path) = self.disk_path(&key) else { return };
        if let Err(e) = Self::write_disk(&disk_path, &profile) {
            warn!(path = %disk_path.display(), error = %e, "failed to persist waveform cache entry");
        } else {
            debug!(path = %path.display(), "waveform cached to disk");
        }
    }

    /// Get the cached profile, or invoke `computer` to produce raw
    /// samples, downsample them via peak-bucket reduction, and cache the
    /// result. `computer` errors are logged and yield `None` without
    /// caching (§4.3, §7).
    pub fn get_or_compute<E: std::fmt::Display>(
        &self,
        path: &Path,
        computer: impl FnOnce() -> Result<Vec<f32>, E>,
        target_samples: usize,
        duration_s: f64,
        channels: u32,
    ) -> Option<WaveformProfile> {
        if let Some(hit) = self.get(path) {
            return Some(hit);
        }

        let raw = match computer() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to compute waveform");
                return None;
            }
        };
        let Some(mtime) = Self::current_mtime(path) else { return None };

        let samples = downsample_peaks(&raw, target_samples);
        let profile = WaveformProfile {
            mtime,
            sample_count: target_samples as u32,
            duration_s,
            channels,
            samples,
        };
        self.set(path, profile.clone());
        Some(profile)
    }

    pub fn invalidate(&self, path: &Path) -> bool {
        let key = Self::cache_key(path);
        let removed_memory = self.memory.delete(&key);
        let removed_disk = self
            .disk_path(&key)
            .map(|p| if p.exists() { std::fs::remove_file(&p).is_ok() } else { false })
            .unwrap_or(false);
        removed_memory || removed_disk
    }

    pub fn clear(&self) {
        self.memory.clear();
    }

    pub fn stats(&self) -> super::stats::CacheStatsSnapshot {
        self.memory.stats()
    }

    fn write_disk(disk_path: &Path, profile: &WaveformProfile) -> Result<(), CacheError> {
        if let Some(parent) = disk_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.extend_from_slice(&profile.mtime.to_le_bytes());
        buf.extend_from_slice(&(profile.sample_count as i32).to_le_bytes());
        buf.extend_from_slice(&profile.duration_s.to_le_bytes());
        buf.extend_from_slice(&(profile.channels as i32).to_le_bytes());

        let mut sample_bytes = Vec::with_capacity(profile.samples.len() * 4);
        for s in &profile.samples {
            sample_bytes.extend_from_slice(&s.to_le_bytes());
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(6));
        encoder.write_all(&sample_bytes)?;
        let compressed = encoder.finish()?;

        buf.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        buf.extend_from_slice(&compressed);

        std::fs::write(disk_path, buf)?;
        Ok(())
    }

    fn read_disk(disk_path: &Path) -> Result<WaveformProfile, CacheError> {
        let data = std::fs::read(disk_path)?;
        if data.len() < HEADER_LEN + 4 {
            return Err(CacheError::Corrupt {
                path: disk_path.display().to_string(),
                reason: "truncated header".into(),
            });
        }

        let corrupt = |reason: &str| CacheError::Corrupt {
            path: disk_path.display().to_string(),
            reason: reason.to_string(),
        };

        let mtime = f64::from_le_bytes(data[0..8].try_into().map_err(|_| corrupt("mtime"))?);
        let sample_count = i32::from_le_bytes(data[8..12].try_into().map_err(|_| corrupt("sample_count"))?);
        let duration_s = f64::from_le_bytes(data[12..20].try_into().map_err(|_| corrupt("duration"))?);
        let channels = i32::from_le_bytes(data[20..24].try_into().map_err(|_| corrupt("channels"))?);
        let compressed_len =
            u32::from_le_bytes(data[24..28].try_into().map_err(|_| corrupt("length prefix"))?) as usize;

        let compressed = data.get(28..28 + compressed_len).ok_or_else(|| corrupt("truncated body"))?;
        let mut decoder = ZlibDecoder::new(compressed);
        let mut sample_bytes = Vec::new();
        decoder.read_to_end(&mut sample_bytes).map_err(CacheError::Io)?;

        if sample_bytes.len() % 4 != 0 {
            return Err(corrupt("sample byte length not a multiple of 4"));
        }
        let samples = sample_bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();

        Ok(WaveformProfile {
            mtime,
            sample_count: sample_count.max(0) as u32,
            duration_s,
            channels: channels.max(0) as u32,
            samples,
        })
    }
}

/// Partition `samples` into `target_samples` equal-sized windows and emit
/// `(min, max)` per window into a flat array of length `2 * target_samples`
/// (§4.3).
pub fn downsample_peaks(samples: &[f32], target_samples: usize) -> Vec<f32> {
    if target_samples == 0 || samples.is_empty() {
        return Vec::new();
    }
    if samples.len() <= target_samples {
        // Fewer raw samples than buckets: every sample is its own (min, max) pair.
        let mut out = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            out.push(s);
            out.push(s);
        }
        return out;
    }

    let chunk_size = samples.len() / target_samples;
    let mut out = vec![0.0f32; target_samples * 2];
    for i in 0..target_samples {
        let start = i * chunk_size;
        let end = if i == target_samples - 1 { samples.len() } else { (start + chunk_size).min(samples.len()) };
        let chunk = &samples[start..end];
        if chunk.is_empty() {
            continue;
        }
        let min = chunk.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = chunk.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        out[i * 2] = min;
        out[i * 2 + 1] = max;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::{tempdir, NamedTempFile};

    fn touch(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file
    }

    #[test]
    fn downsample_peaks_emits_min_max_per_bucket() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let peaks = downsample_peaks(&samples, 10);
        assert_eq!(peaks.len(), 20);
        assert_eq!(peaks[0], 0.0);
        assert_eq!(peaks[1], 9.0);
    }

    #[test]
    fn set_then_get_round_trips_through_memory() {
        let file = touch(b"hello");
        let cache = WaveformCache::new(10, None, None);
        let mtime = WaveformCache::current_mtime(file.path()).unwrap();
        let profile = WaveformProfile { mtime, sample_count: 2, duration_s: 1.0, channels: 1, samples: vec![-1.0, 1.0, -0.5, 0.5] };
        cache.set(file.path(), profile.clone());
        let hit = cache.get(file.path()).unwrap();
        assert_eq!(hit.samples, profile.samples);
    }

    #[test]
    fn set_then_get_round_trips_through_disk_after_memory_eviction() {
        let file = touch(b"hello");
        let dir = tempdir().unwrap();
        let cache = WaveformCache::new(10, None, Some(dir.path().to_path_buf()));
        let mtime = WaveformCache::current_mtime(file.path()).unwrap();
        let profile = WaveformProfile { mtime, sample_count: 2, duration_s: 2.0, channels: 2, samples: vec![-1.0, 1.0, -0.25, 0.75] };
        cache.set(file.path(), profile.clone());

        // Simulate memory eviction: the disk tier must still serve a hit.
        cache.memory.clear();
        let hit = cache.get(file.path()).unwrap();
        assert_eq!(hit.samples, profile.samples);
        assert_eq!(hit.channels, 2);
    }

    #[test]
    fn stale_mtime_is_a_miss_and_removes_disk_entry() {
        let file = touch(b"hello");
        let dir = tempdir().unwrap();
        let cache = WaveformCache::new(10, None, Some(dir.path().to_path_buf()));
        let stale_profile = WaveformProfile { mtime: 1.0, sample_count: 1, duration_s: 1.0, channels: 1, samples: vec![0.0, 0.0] };
        cache.set(file.path(), stale_profile);
        cache.memory.clear();

        assert!(cache.get(file.path()).is_none());
        let key = WaveformCache::cache_key(file.path());
        assert!(!cache.disk_path(&key).unwrap().exists());
    }

    #[test]
    fn corrupt_disk_entry_is_deleted_and_treated_as_miss() {
        let file = touch(b"hello");
        let dir = tempdir().unwrap();
        let cache = WaveformCache::new(10, None, Some(dir.path().to_path_buf()));
        let key = WaveformCache::cache_key(file.path());
        let disk_path = cache.disk_path(&key).unwrap();
        std::fs::write(&disk_path, b"not a valid waveform file").unwrap();

        assert!(cache.get(file.path()).is_none());
        assert!(!disk_path.exists());
    }

    #[test]
    fn get_or_compute_does_not_cache_on_computer_error() {
        let file = touch(b"hello");
        let cache = WaveformCache::new(10, None, None);
        let result = cache.get_or_compute(file.path(), || Err::<Vec<f32>, _>("decode failed"), 4, 1.0, 1);
        assert!(result.is_none());
        assert!(cache.get(file.path()).is_none());
    }

    #[test]
    fn get_or_compute_downsamples_and_caches() {
        let file = touch(b"hello");
        let cache = WaveformCache::new(10, None, None);
        let raw: Vec<f32> = (0..40).map(|i| i as f32).collect();
        let profile = cache.get_or_compute(file.path(), || Ok::<_, String>(raw.clone()), 4, 0.5, 1).unwrap();
        assert_eq!(profile.samples.len(), 8);
        assert!(cache.get(file.path()).is_some());
    }
}
