//! Hybrid lexical/semantic retrieval with Reciprocal Rank Fusion (C9, §4.9).

pub mod hybrid;

pub use hybrid::{retrieve, FusionObservation, FusionResult, QueryPlan, Retriever, RetrievalMode};
