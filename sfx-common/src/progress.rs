//! Progress event types reported by long-running engine operations

use serde::{Deserialize, Serialize};

/// A progress update emitted by indexing, translation, or bulk cache rebuilds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    /// Fractional completion in `[0.0, 1.0]` plus a human-readable message.
    Progress { fraction: f64, message: String },

    /// A single item was skipped (timeout, unsupported format, transient error).
    ItemSkipped { item: String, reason: String },

    /// The operation finished.
    Completed { message: String },
}

/// Signature shared by every progress callback in the engine.
pub type ProgressCallback<'a> = dyn FnMut(ProgressEvent) + Send + 'a;
