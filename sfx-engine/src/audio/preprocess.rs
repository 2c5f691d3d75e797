//! CLAP-aligned deterministic waveform -> log-mel spectrogram transform
//! (C7, §4.7): silence trim, int16 quantization round-trip, pad/truncate,
//! Hann-windowed STFT, mel projection, log compression.
//!
//! Grounded on `original_source/application/ai/clap_service.py`'s
//! `_preprocess_audio_static` for operation order and constants, and on
//! `Niche-Knack-Apps-clip-dr/.../audio_clean/spectral.rs` for the
//! `realfft`/manual-Hann-window STFT idiom.

use realfft::RealFftPlanner;

use super::melfilter::PreprocessorConfig;
use crate::error::PreprocessError;

/// `n_mels x time_steps` log-mel spectrogram, row-major (§4.7, §3's
/// `WaveformProfile`-adjacent tensor shape).
#[derive(Debug, Clone)]
pub struct MelSpectrogram {
    pub n_mels: usize,
    pub time_steps: usize,
    pub data: Vec<f32>,
}

impl MelSpectrogram {
    pub fn row(&self, mel_bin: usize) -> &[f32] {
        &self.data[mel_bin * self.time_steps..(mel_bin + 1) * self.time_steps]
    }
}

/// Run the full deterministic transform (§4.7 steps 2-7) on a mono waveform
/// already loaded and resampled to `config.sampling_rate` (step 1 is the
/// caller's responsibility, see [`super::loader::load_mono_waveform`]).
pub fn preprocess_waveform(
    waveform: &[f32],
    config: &PreprocessorConfig,
) -> Result<MelSpectrogram, PreprocessError> {
    let trimmed = trim_leading_silence(waveform, config.silence_threshold);
    let quantized = quantize_round_trip(&trimmed);
    let fixed = pad_or_truncate(&quantized, config.fixed_length_samples());
    let power_spectrum = stft_power(&fixed, config.n_fft, config.hop_length)?;
    let mel = project_to_mel(&power_spectrum, config)?;
    Ok(log_compress(mel, config))
}

/// Step 2: discard initial samples below `threshold` (absolute value).
/// A waveform that never rises above threshold is left untouched — it is
/// genuine silence, not leading silence to be trimmed away.
pub fn trim_leading_silence(samples: &[f32], threshold: f32) -> Vec<f32> {
    let first_loud = samples.iter().position(|s| s.abs() >= threshold);
    match first_loud {
        Some(index) => samples[index..].to_vec(),
        None => samples.to_vec(),
    }
}

/// Step 3: `f32 -> int16 -> f32` round-trip, bit-exact to the reference
/// quantization (scale by 32767, clip to `[-1,1]` first, truncate to i16,
/// rescale by `1/32767`).
pub fn quantize_round_trip(samples: &[f32]) -> Vec<f32> {
    samples
        .iter()
        .map(|&s| {
            let clipped = s.clamp(-1.0, 1.0);
            let scaled = (clipped * 32767.0) as i16;
            scaled as f32 / 32767.0
        })
        .collect()
}

/// Step 4: pad with zeros or truncate from the tail so the waveform is
/// exactly `target_len` samples (deterministic mode, §4.7 step 4).
pub fn pad_or_truncate(samples: &[f32], target_len: usize) -> Vec<f32> {
    let mut out = samples.to_vec();
    out.resize(target_len, 0.0);
    out
}

/// Step 5: Hann-windowed STFT, returning the power spectrum
/// `[n_frames][n_fft/2+1]` flattened row-major as frame-major.
fn stft_power(samples: &[f32], n_fft: usize, hop_length: usize) -> Result<Vec<Vec<f32>>, PreprocessError> {
    if samples.len() < n_fft {
        return Err(PreprocessError::Fft("waveform shorter than fft window".into()));
    }

    let window: Vec<f32> = (0..n_fft)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_fft as f32).cos()))
        .collect();

    let mut planner = RealFftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(n_fft);

    let n_frames = (samples.len() - n_fft) / hop_length + 1;
    let mut frames = Vec::with_capacity(n_frames);

    for frame_idx in 0..n_frames {
        let start = frame_idx * hop_length;
        let mut buffer: Vec<f32> = samples[start..start + n_fft]
            .iter()
            .zip(&window)
            .map(|(s, w)| s * w)
            .collect();

        let mut spectrum = forward.make_output_vec();
        forward
            .process(&mut buffer, &mut spectrum)
            .map_err(|e| PreprocessError::Fft(e.to_string()))?;

        frames.push(spectrum.iter().map(|c| c.norm_sqr()).collect());
    }

    Ok(frames)
}

/// Step 6: project the power spectrum onto the mel filterbank, producing
/// `n_mels x time_steps`.
fn project_to_mel(power_frames: &[Vec<f32>], config: &PreprocessorConfig) -> Result<MelSpectrogram, PreprocessError> {
    let time_steps = power_frames.len();
    let n_mels = config.n_mels;
    let mut data = vec![0.0f32; n_mels * time_steps];

    for mel_bin in 0..n_mels {
        let row = config.filterbank_row(mel_bin);
        for (t, frame) in power_frames.iter().enumerate() {
            let energy: f32 = row.iter().zip(frame.iter()).map(|(w, p)| w * p).sum();
            data[mel_bin * time_steps + t] = energy;
        }
    }

    Ok(MelSpectrogram { n_mels, time_steps, data })
}

/// Step 7: `log(max(mel, floor))`, matching the reference feature
/// extractor's floor.
fn log_compress(mut mel: MelSpectrogram, config: &PreprocessorConfig) -> MelSpectrogram {
    for value in mel.data.iter_mut() {
        *value = value.max(config.log_floor).ln();
    }
    mel
}

/// Euclidean (L2) norm of `v`. Used by embedding validation (§3) and by
/// [`normalize_l2`].
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// L2-normalize `v` in place. A zero-norm vector is left at the zero
/// vector rather than dividing by zero (§4.8 step 5).
pub fn normalize_l2(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_leading_silence_drops_quiet_prefix() {
        let samples = vec![0.0, 0.001, 0.002, 0.5, 0.3, -0.4];
        let trimmed = trim_leading_silence(&samples, 0.01);
        assert_eq!(trimmed, vec![0.5, 0.3, -0.4]);
    }

    #[test]
    fn trim_leading_silence_keeps_pure_silence_untouched() {
        let samples = vec![0.0, 0.0, 0.0];
        assert_eq!(trim_leading_silence(&samples, 0.01), samples);
    }

    #[test]
    fn quantize_round_trip_is_deterministic_and_bounded() {
        let samples = vec![0.5, -0.5, 1.5, -1.5, 0.0];
        let out = quantize_round_trip(&samples);
        assert_eq!(out.len(), samples.len());
        assert!(out.iter().all(|v| (-1.0..=1.0).contains(v)));
        assert_eq!(out, quantize_round_trip(&samples));
    }

    #[test]
    fn pad_or_truncate_pads_with_zeros() {
        let out = pad_or_truncate(&[1.0, 2.0], 5);
        assert_eq!(out, vec![1.0, 2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn pad_or_truncate_truncates_from_tail() {
        let out = pad_or_truncate(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn l2_norm_of_zero_vector_is_zero_and_normalize_is_noop() {
        let mut v = vec![0.0, 0.0, 0.0];
        assert_eq!(l2_norm(&v), 0.0);
        normalize_l2(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn normalize_l2_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        normalize_l2(&mut v);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
    }

    fn test_config(n_fft: usize, hop_length: usize, n_mels: usize) -> PreprocessorConfig {
        let freq_bins = n_fft / 2 + 1;
        PreprocessorConfig {
            sampling_rate: 8_000,
            n_fft,
            hop_length,
            n_mels,
            max_length_seconds: 0.1,
            silence_threshold: 0.0,
            mel_filterbank: vec![1.0 / freq_bins as f32; n_mels * freq_bins],
            log_floor: 1e-10,
        }
    }

    #[test]
    fn preprocess_waveform_produces_expected_shape() {
        let config = test_config(16, 8, 4);
        let fixed_len = config.fixed_length_samples();
        let waveform: Vec<f32> = (0..fixed_len * 2)
            .map(|i| (i as f32 * 0.1).sin())
            .collect();

        let mel = preprocess_waveform(&waveform, &config).unwrap();
        assert_eq!(mel.n_mels, 4);
        assert!(mel.time_steps > 0);
        assert_eq!(mel.data.len(), mel.n_mels * mel.time_steps);
        assert!(mel.data.iter().all(|v| v.is_finite()));
    }
}
