//! Per-module error types for the sound-effects library engine

use thiserror::Error;

/// Cache-tier errors: corrupt disk entries, I/O failures
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry at {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

/// Audio preprocessing errors (C7)
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("fft error: {0}")]
    Fft(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Indexing orchestrator errors (C8)
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("worker pool could not be created: {0}")]
    WorkerPool(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

/// Translation controller errors (C10)
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned no usable content")]
    EmptyResponse,
}

/// Engine-level error, the union callers outside an individual module see
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("preprocess error: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("translation error: {0}")]
    Translation(#[from] TranslationError),

    #[error("common error: {0}")]
    Common(#[from] sfx_common::Error),

    #[error("bootstrap error: {0}")]
    Bootstrap(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
