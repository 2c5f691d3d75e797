//! Cache hierarchy (C1-C4): a generic LRU primitive, and the three caches
//! built on top of it — mtime-validated metadata, two-tier waveform peaks,
//! and tag-invalidated query results.

pub mod lru;
pub mod metadata;
pub mod query;
pub mod stats;
pub mod waveform;

pub use lru::{LruCache, TieredCache};
pub use metadata::MetadataCache;
pub use query::QueryCache;
pub use stats::CacheStats;
pub use waveform::WaveformCache;
