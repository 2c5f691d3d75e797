//! Bulk indexing orchestrator (C8, §4.8): chunked, memory-bounded
//! preprocessing and batched embedding inference over a list of audio
//! paths.

pub mod inference;
pub mod orchestrator;

pub use inference::{DeterministicTestInference, InferencePrimitive};
pub use orchestrator::{resolve_chunk_size, run_indexing, IndexedEmbedding};
