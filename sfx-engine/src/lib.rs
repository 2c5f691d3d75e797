//! Core domain logic for the sound-effects library engine: audio
//! preprocessing and indexing, the cache hierarchy, lexical/semantic search,
//! hybrid retrieval, and AI-assisted filename translation.

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod query;
pub mod retrieval;
pub mod search;
pub mod translate;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use model::{AudioRecord, CachedMetadata, TranslationStatus, WaveformProfile};
