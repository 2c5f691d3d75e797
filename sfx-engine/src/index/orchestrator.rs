//! Bulk ingestion orchestrator (C8, §4.8): chunked, memory-bounded,
//! per-file-timeout-isolated preprocessing followed by batched inference
//! and L2 normalization.
//!
//! Grounded on `original_source/application/ai/clap_service.py`'s
//! `_process_batch_balanced_mode`/`_process_chunk` for the chunking and
//! progress-band arithmetic, and on
//! `wkmp-ai/src/services/workflow_orchestrator/phase_fingerprinting.rs`
//! for the Rust idiom of a `rayon`-driven parallel stage reporting through
//! a progress callback.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use ndarray::Array4;
use rayon::{ThreadPool, ThreadPoolBuilder};
use sfx_common::{ProgressCallback, ProgressEvent};
use tracing::{debug, warn};

use super::inference::InferencePrimitive;
use crate::audio::{load_mono_waveform, preprocess_waveform, PreprocessorConfig};
use crate::config::IndexingConfig;

const PREPROCESS_BAND: (f64, f64) = (0.0, 0.40);
const INFERENCE_BAND: (f64, f64) = (0.40, 0.80);
const NORMALIZE_BAND: (f64, f64) = (0.80, 0.90);

/// Hard ceiling on `chunk_size` no configured `chunk_size_max` may exceed
/// (SPEC_FULL §5.1 / OQ1's `clamp(recommended, [100, cap_by_memory, 3000])`).
const ABSOLUTE_CHUNK_CEILING: usize = 3000;

/// `n_mels * time_steps * 4` bytes — a single fp32 mel tensor's footprint,
/// used to clamp `chunk_size` against a caller-supplied memory cap.
fn bytes_per_item(config: &PreprocessorConfig) -> u64 {
    let time_steps = time_steps_for(config);
    (config.n_mels * time_steps * 4) as u64
}

fn time_steps_for(config: &PreprocessorConfig) -> usize {
    let fixed_len = config.fixed_length_samples();
    if fixed_len < config.n_fft {
        return 0;
    }
    (fixed_len - config.n_fft) / config.hop_length + 1
}

/// Chunking (§4.8 "Chunking", SPEC_FULL §5.1 / OQ1): the memory cap always
/// wins. `recommended` is `n` itself for inputs under `small_threshold` (so
/// they land in a single chunk) and `chunk_size_max` otherwise; it is then
/// clamped into `[chunk_size_min, min(cap_by_memory, 3000)]` — clamped
/// *after* the small-threshold substitution, never overriding it —
/// and the result is never allowed to exceed `n`.
pub fn resolve_chunk_size(n: usize, indexing: &IndexingConfig, preprocessor: &PreprocessorConfig) -> usize {
    let recommended = if n < indexing.small_threshold { n } else { indexing.chunk_size_max };

    let mut upper = indexing.chunk_size_max.min(ABSOLUTE_CHUNK_CEILING);
    if let Some(limit_mb) = indexing.memory_limit_mb {
        let per_item = bytes_per_item(preprocessor).max(1);
        let cap_bytes = limit_mb.saturating_mul(1024 * 1024);
        let cap_by_memory = (cap_bytes / per_item).max(1) as usize;
        upper = upper.min(cap_by_memory);
    }
    let lower = indexing.chunk_size_min.min(upper);

    let clamped = recommended.clamp(lower, upper);
    n.min(clamped).max(1)
}

/// One file's embedding, in input order; files that failed preprocessing,
/// timed out, or were dropped by a failed chunk simply do not appear.
pub struct IndexedEmbedding {
    pub path: PathBuf,
    pub embedding: Vec<f32>,
}

/// Run full indexing over `paths`: chunk, preprocess in parallel with a
/// per-file timeout, batch-infer, L2-normalize. Returns successfully
/// embedded files in their original relative order.
pub fn run_indexing(
    paths: &[PathBuf],
    indexing: &IndexingConfig,
    preprocessor: &PreprocessorConfig,
    inference: &dyn InferencePrimitive,
    progress: &mut ProgressCallback<'_>,
) -> Vec<IndexedEmbedding> {
    if paths.is_empty() {
        progress(ProgressEvent::Completed { message: "nothing to index".into() });
        return Vec::new();
    }

    let chunk_size = resolve_chunk_size(paths.len(), indexing, preprocessor);
    let chunks: Vec<&[PathBuf]> = paths.chunks(chunk_size).collect();
    let n_chunks = chunks.len();

    let pool = ThreadPoolBuilder::new().num_threads(indexing.cpu_workers).build().ok();

    let mut results = Vec::new();
    for (chunk_idx, chunk) in chunks.into_iter().enumerate() {
        let chunk_start_ratio = chunk_idx as f64 / n_chunks as f64;
        let chunk_end_ratio = (chunk_idx + 1) as f64 / n_chunks as f64;
        let band = |local: f64| chunk_start_ratio + local * (chunk_end_ratio - chunk_start_ratio);

        let pairs = match &pool {
            Some(pool) => preprocess_chunk_parallel(pool, chunk, indexing, preprocessor, &band, progress),
            None => {
                warn!("worker pool unavailable, falling back to single-threaded preprocessing");
                preprocess_chunk_single_threaded(chunk, indexing, preprocessor, &band, progress)
            }
        };

        match infer_and_normalize(&pairs, indexing, preprocessor, inference, &band, progress) {
            Ok(embeddings) => results.extend(embeddings),
            Err(err) => {
                warn!(chunk = chunk_idx, error = %err, "chunk batch inference failed, dropping chunk");
            }
        }
    }

    progress(ProgressEvent::Completed { message: format!("indexed {} of {} files", results.len(), paths.len()) });
    results
}

fn preprocess_chunk_parallel(
    pool: &ThreadPool,
    chunk: &[PathBuf],
    indexing: &IndexingConfig,
    preprocessor: &PreprocessorConfig,
    band: &dyn Fn(f64) -> f64,
    progress: &mut ProgressCallback<'_>,
) -> Vec<(PathBuf, crate::audio::MelSpectrogram)> {
    use rayon::prelude::*;

    let timeout = Duration::from_secs(indexing.per_file_timeout_secs);
    let outcomes: Vec<Option<(PathBuf, crate::audio::MelSpectrogram)>> = pool.install(|| {
        chunk
            .par_iter()
            .map(|path| preprocess_one_with_timeout(path, preprocessor, timeout))
            .collect()
    });

    let mut pairs = Vec::new();
    let total = outcomes.len().max(1);
    let mut last_reported = -1i64;
    for (i, outcome) in outcomes.into_iter().enumerate() {
        if let Some(pair) = outcome {
            pairs.push(pair);
        }
        let local_fraction = (i + 1) as f64 / total as f64;
        let percent_bucket = (local_fraction * 10.0) as i64;
        if percent_bucket != last_reported {
            last_reported = percent_bucket;
            let band_fraction = local_fraction * (PREPROCESS_BAND.1 - PREPROCESS_BAND.0) + PREPROCESS_BAND.0;
            progress(ProgressEvent::Progress {
                fraction: band(band_fraction),
                message: format!("preprocessed {}/{}", i + 1, total),
            });
        }
    }
    pairs
}

fn preprocess_chunk_single_threaded(
    chunk: &[PathBuf],
    indexing: &IndexingConfig,
    preprocessor: &PreprocessorConfig,
    band: &dyn Fn(f64) -> f64,
    progress: &mut ProgressCallback<'_>,
) -> Vec<(PathBuf, crate::audio::MelSpectrogram)> {
    let timeout = Duration::from_secs(indexing.per_file_timeout_secs);
    let mut pairs = Vec::new();
    let total = chunk.len().max(1);
    for (i, path) in chunk.iter().enumerate() {
        if let Some(pair) = preprocess_one_with_timeout(path, preprocessor, timeout) {
            pairs.push(pair);
        }
        let local_fraction = (i + 1) as f64 / total as f64;
        let band_fraction = local_fraction * (PREPROCESS_BAND.1 - PREPROCESS_BAND.0) + PREPROCESS_BAND.0;
        progress(ProgressEvent::Progress {
            fraction: band(band_fraction),
            message: format!("preprocessed {}/{}", i + 1, total),
        });
    }
    pairs
}

/// Preprocess a single file on a dedicated thread, enforcing the per-file
/// timeout (§4.8 step 2): timeout => skip with a warning, any other
/// extraction failure => skip with a debug log. Never panics the caller.
fn preprocess_one_with_timeout(
    path: &Path,
    preprocessor: &PreprocessorConfig,
    timeout: Duration,
) -> Option<(PathBuf, crate::audio::MelSpectrogram)> {
    let (tx, rx) = mpsc::channel();
    let path_owned = path.to_path_buf();
    let preprocessor = preprocessor.clone();
    std::thread::spawn(move || {
        let result = load_mono_waveform(&path_owned, preprocessor.sampling_rate, preprocessor.max_length_seconds)
            .and_then(|loaded| preprocess_waveform(&loaded.samples, &preprocessor));
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(mel)) => Some((path.to_path_buf(), mel)),
        Ok(Err(err)) => {
            debug!(path = %path.display(), error = %err, "skipping file: preprocessing failed");
            None
        }
        Err(_) => {
            warn!(path = %path.display(), "skipping file: preprocessing timed out");
            None
        }
    }
}

/// GPU-batched inference plus L2 normalization (§4.8 steps 4-5). A batch
/// inference failure fails the whole chunk (§4.8 "Failure and cancellation
/// semantics").
fn infer_and_normalize(
    pairs: &[(PathBuf, crate::audio::MelSpectrogram)],
    indexing: &IndexingConfig,
    preprocessor: &PreprocessorConfig,
    inference: &dyn InferencePrimitive,
    band: &dyn Fn(f64) -> f64,
    progress: &mut ProgressCallback<'_>,
) -> Result<Vec<IndexedEmbedding>, crate::error::IndexError> {
    if pairs.is_empty() {
        return Ok(Vec::new());
    }

    let batch_size = indexing.inference_batch_size.max(1);
    let groups: Vec<&[(PathBuf, crate::audio::MelSpectrogram)]> = pairs.chunks(batch_size).collect();
    let n_groups = groups.len().max(1);

    let mut embeddings: Vec<(PathBuf, Vec<f32>)> = Vec::with_capacity(pairs.len());
    for (g, group) in groups.into_iter().enumerate() {
        let batch = stack_to_tensor(group, preprocessor);
        let outputs = inference.run_audio_inference(&batch)?;
        for ((path, _), embedding) in group.iter().zip(outputs) {
            embeddings.push((path.clone(), embedding));
        }

        let local_fraction = (g + 1) as f64 / n_groups as f64;
        let band_fraction = local_fraction * (INFERENCE_BAND.1 - INFERENCE_BAND.0) + INFERENCE_BAND.0;
        progress(ProgressEvent::Progress {
            fraction: band(band_fraction),
            message: format!("inference batch {}/{}", g + 1, n_groups),
        });
    }

    let total = embeddings.len();
    let mut results = Vec::with_capacity(total);
    for (i, (path, mut embedding)) in embeddings.into_iter().enumerate() {
        crate::audio::normalize_l2(&mut embedding);
        results.push(IndexedEmbedding { path, embedding });

        let local_fraction = (i + 1) as f64 / total.max(1) as f64;
        let band_fraction = local_fraction * (NORMALIZE_BAND.1 - NORMALIZE_BAND.0) + NORMALIZE_BAND.0;
        progress(ProgressEvent::Progress { fraction: band(band_fraction), message: "normalizing embeddings".into() });
    }

    Ok(results)
}

/// Stack `[n_mels,time]` mel spectrograms into a `[B,1,time,mel]` tensor
/// (§4.8 step 4's "appropriate axis transposition").
fn stack_to_tensor(group: &[(PathBuf, crate::audio::MelSpectrogram)], preprocessor: &PreprocessorConfig) -> Array4<f32> {
    let time_steps = time_steps_for(preprocessor);
    let n_mels = preprocessor.n_mels;
    let b = group.len();
    let mut tensor = Array4::<f32>::zeros((b, 1, time_steps, n_mels));
    for (i, (_, mel)) in group.iter().enumerate() {
        for m in 0..n_mels.min(mel.n_mels) {
            let row = mel.row(m);
            for t in 0..time_steps.min(mel.time_steps) {
                tensor[[i, 0, t, m]] = row[t];
            }
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preprocessor_config() -> PreprocessorConfig {
        let n_fft = 1024;
        let freq_bins = n_fft / 2 + 1;
        let n_mels = 64;
        PreprocessorConfig {
            sampling_rate: 48_000,
            n_fft,
            hop_length: 480,
            n_mels,
            max_length_seconds: 10.0,
            silence_threshold: 0.01,
            mel_filterbank: vec![1.0 / freq_bins as f32; n_mels * freq_bins],
            log_floor: 1e-10,
        }
    }

    #[test]
    fn chunk_size_clamps_into_bounds() {
        let indexing = IndexingConfig { chunk_size_max: 5000, ..IndexingConfig::default() };
        let preprocessor = preprocessor_config();
        assert_eq!(resolve_chunk_size(10_000, &indexing, &preprocessor), 3000);
    }

    #[test]
    fn small_input_bypasses_chunking() {
        let indexing = IndexingConfig::default();
        let preprocessor = preprocessor_config();
        assert_eq!(resolve_chunk_size(10, &indexing, &preprocessor), 10);
    }

    #[test]
    fn memory_cap_further_clamps_chunk_size() {
        let mut indexing = IndexingConfig { chunk_size_max: 3000, small_threshold: 0, ..IndexingConfig::default() };
        indexing.memory_limit_mb = Some(1);
        let preprocessor = preprocessor_config();
        let chunk_size = resolve_chunk_size(10_000, &indexing, &preprocessor);
        assert!(chunk_size < 3000);
        assert!(chunk_size >= 1);
    }

    #[test]
    fn missing_file_is_skipped_not_fatal() {
        let preprocessor = preprocessor_config();
        let result =
            preprocess_one_with_timeout(Path::new("/nonexistent/file.wav"), &preprocessor, Duration::from_secs(5));
        assert!(result.is_none());
    }

    #[test]
    fn run_indexing_on_empty_input_completes_immediately() {
        let indexing = IndexingConfig::default();
        let preprocessor = preprocessor_config();
        let inference = super::super::inference::DeterministicTestInference::new(8);
        let mut events = Vec::new();
        let mut cb = |event: ProgressEvent| events.push(event);
        let results = run_indexing(&[], &indexing, &preprocessor, &inference, &mut cb);
        assert!(results.is_empty());
        assert!(matches!(events.last(), Some(ProgressEvent::Completed { .. })));
    }
}
