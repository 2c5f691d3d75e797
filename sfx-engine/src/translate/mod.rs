//! AI-assisted filename translation (C10, §4.10): chunked chat-completion
//! requests over a library's filenames, with retry and count-preserving
//! fallback to identity translation.

pub mod controller;
pub mod provider;

pub use controller::{chunk_inputs, translate_all};
pub use provider::{parse_translation_response, request_translation, TranslationResult};
