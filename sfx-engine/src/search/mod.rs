//! Search engine (C6): AST-to-predicate compilation, filtering, pagination,
//! relevance scoring, and the record store abstraction it executes against.

pub mod engine;
pub mod store;
pub mod tfidf;

pub use engine::{execute, glob_to_like, matches, score_records, Filters, Page, QueryResult};
pub use store::{MemoryRecordStore, RecordStore, SqliteRecordStore};
pub use tfidf::TfIdfScorer;
