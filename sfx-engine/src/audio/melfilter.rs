//! Preprocessor configuration: the JSON file specifying the reference
//! feature extractor's constants and mel filterbank (§4.7 step 6, §5).
//!
//! Loaded once per worker, per spec.md §5: "parameters externally supplied
//! via a config file" rather than hardcoded, so the filterbank can track
//! whatever reference model is deployed without a rebuild.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PreprocessError;

/// Mirrors the on-disk preprocessor config (§5): sampling rate, STFT/mel
/// parameters, and the mel filterbank matrix itself, flattened row-major
/// as `n_mels * (n_fft / 2 + 1)` coefficients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessorConfig {
    pub sampling_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub max_length_seconds: f64,
    pub silence_threshold: f32,
    /// Row-major `n_mels x (n_fft/2+1)` filterbank matrix.
    pub mel_filterbank: Vec<f32>,
    /// Floor applied before/within log compression (§4.7 step 7).
    #[serde(default = "default_log_floor")]
    pub log_floor: f32,
}

fn default_log_floor() -> f32 {
    1e-10
}

impl PreprocessorConfig {
    pub fn load(path: &Path) -> Result<Self, PreprocessError> {
        let text = std::fs::read_to_string(path)?;
        let config: PreprocessorConfig = serde_json::from_str(&text)
            .map_err(|e| PreprocessError::Decode(format!("invalid preprocessor config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn n_freq_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn fixed_length_samples(&self) -> usize {
        (self.max_length_seconds * self.sampling_rate as f64).round() as usize
    }

    /// Filterbank row `mel_bin` as a `(n_fft/2+1)`-wide slice.
    pub fn filterbank_row(&self, mel_bin: usize) -> &[f32] {
        let width = self.n_freq_bins();
        &self.mel_filterbank[mel_bin * width..(mel_bin + 1) * width]
    }

    fn validate(&self) -> Result<(), PreprocessError> {
        let expected = self.n_mels * self.n_freq_bins();
        if self.mel_filterbank.len() != expected {
            return Err(PreprocessError::Decode(format!(
                "mel filterbank has {} coefficients, expected {} ({}x{})",
                self.mel_filterbank.len(),
                expected,
                self.n_mels,
                self.n_freq_bins()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> PreprocessorConfig {
        let n_fft = 8;
        let n_mels = 2;
        let freq_bins = n_fft / 2 + 1;
        PreprocessorConfig {
            sampling_rate: 48_000,
            n_fft,
            hop_length: 4,
            n_mels,
            max_length_seconds: 1.0,
            silence_threshold: 0.01,
            mel_filterbank: vec![1.0; n_mels * freq_bins],
            log_floor: 1e-10,
        }
    }

    #[test]
    fn filterbank_row_slices_correct_width() {
        let config = sample_config();
        assert_eq!(config.n_freq_bins(), 5);
        assert_eq!(config.filterbank_row(1).len(), 5);
    }

    #[test]
    fn validate_rejects_mismatched_filterbank_len() {
        let mut config = sample_config();
        config.mel_filterbank.pop();
        let json = serde_json::to_string(&config).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, json).unwrap();
        assert!(PreprocessorConfig::load(&path).is_err());
    }

    #[test]
    fn fixed_length_samples_matches_rate_times_seconds() {
        let config = sample_config();
        assert_eq!(config.fixed_length_samples(), 48_000);
    }
}
