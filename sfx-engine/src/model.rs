//! Core data model: the identity and metadata of an indexed audio file (§3)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How far a file's filename has progressed through AI-assisted translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TranslationStatus {
    Untranslated = 0,
    Translated = 1,
    Failed = 2,
}

impl Default for TranslationStatus {
    fn default() -> Self {
        TranslationStatus::Untranslated
    }
}

/// Identity of a single indexed audio file, as described in spec.md §3.
///
/// `path` is unique within a library instance; `content_hash`, when populated,
/// must also be unique. `embedding`, when present, is L2-normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRecord {
    pub id: u64,
    pub path: PathBuf,
    pub content_hash: Option<Vec<u8>>,
    pub filename: String,
    pub format: String,
    pub file_size: u64,

    pub duration_s: f64,
    pub sample_rate_hz: u32,
    pub bit_depth: u8,
    pub channels: u8,
    pub bitrate_kbps: Option<u32>,

    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub track_number: Option<u32>,
    pub comment: Option<String>,

    pub tags: Vec<String>,

    pub translation_status: TranslationStatus,
    pub translated_name: Option<String>,

    pub embedding: Option<Vec<f32>>,
}

/// Tolerance for the L2-norm invariant on [`AudioRecord::embedding`] (§8, invariant 1)
pub const EMBEDDING_NORM_EPSILON: f32 = 1e-5;

impl AudioRecord {
    /// Whether `embedding` (if present) satisfies the unit-norm invariant
    pub fn embedding_is_valid(&self) -> bool {
        match &self.embedding {
            None => true,
            Some(v) => {
                let norm = crate::audio::l2_norm(v);
                norm == 0.0 || (norm - 1.0).abs() < EMBEDDING_NORM_EPSILON
            }
        }
    }
}

/// In-memory/on-disk projection of an [`AudioRecord`]'s extractable facts,
/// paired with the `(mtime, file_size)` witness the metadata cache (C2)
/// validates against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedMetadata {
    pub file_path: PathBuf,
    /// Seconds since the Unix epoch, fractional (the mtime witness)
    pub mtime: f64,
    pub file_size: u64,

    pub duration_s: Option<f64>,
    pub sample_rate_hz: Option<u32>,
    pub bit_depth: Option<u8>,
    pub channels: Option<u8>,
    pub format: Option<String>,
    pub bitrate_kbps: Option<u32>,

    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub comment: Option<String>,
}

/// A downsampled peak profile for waveform display, plus its mtime witness (§3).
///
/// `samples` holds `(min, max)` pairs flattened into a single `Vec<f32>` of
/// length `2 * sample_count`, one pair per equal-duration bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformProfile {
    pub mtime: f64,
    pub sample_count: u32,
    pub duration_s: f64,
    pub channels: u32,
    pub samples: Vec<f32>,
}
