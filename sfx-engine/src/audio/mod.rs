//! Audio loading and CLAP-aligned preprocessing (C7, §4.7): decode to mono
//! PCM, then waveform -> log-mel spectrogram, deterministic and pure so it
//! is safely invocable from every indexing worker.

pub mod loader;
pub mod melfilter;
pub mod preprocess;

pub use loader::{load_mono_waveform, LoadedAudio};
pub use melfilter::PreprocessorConfig;
pub use preprocess::{l2_norm, normalize_l2, preprocess_waveform, MelSpectrogram};
