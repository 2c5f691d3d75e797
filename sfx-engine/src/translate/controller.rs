//! Translation controller (C10, §4.10): chunk filenames, fan out
//! chunk-sized chat-completion requests under bounded concurrency, retry
//! transient failures with jittered backoff, and reassemble results in
//! input order.
//!
//! Grounded on `original_source/application/ai_engine/translation_controller.py`'s
//! `translate_filenames`/`_translate_chunk_with_retry` for the chunking and
//! retry shape; the bounded-concurrency fan-out follows
//! `wkmp-ai/src/services/workflow_orchestrator/mod.rs`'s worker-pool idiom,
//! adapted from a `rayon` pool to a `tokio::sync::Semaphore` since the work
//! here is I/O-bound HTTP rather than CPU-bound inference. The `governor`
//! rate limiter layered above the semaphore is the same crate the teacher
//! already carries for its own provider-facing clients.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use governor::{Quota, RateLimiter};
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::warn;

use sfx_common::{ProgressCallback, ProgressEvent};

use crate::config::TranslationConfig;
use crate::error::TranslationError;

use super::provider::{parse_translation_response, request_translation, TranslationResult};

/// Provider-indexed request-rate limit, layered above the concurrency
/// semaphore: bounds requests/second rather than requests-in-flight, which
/// is what keeps a bursty backlog from tripping a provider's own rate limit
/// even when `concurrency_limit` alone would allow it.
type ProviderRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

fn rate_limiter_for(config: &TranslationConfig) -> ProviderRateLimiter {
    let per_second = NonZeroU32::new(config.concurrency_limit.max(1) as u32)
        .unwrap_or_else(|| NonZeroU32::new(1).unwrap());
    RateLimiter::direct(Quota::per_second(per_second))
}

/// Split `filenames` into chunks sized by `config.chunk_size`, clamped to
/// `[chunk_size_min, chunk_size_max]` (§4.10 step 1).
pub fn chunk_inputs(filenames: &[String], config: &TranslationConfig) -> Vec<Vec<String>> {
    if filenames.is_empty() {
        return Vec::new();
    }
    let size = config.chunk_size.clamp(config.chunk_size_min, config.chunk_size_max).max(1);
    filenames.chunks(size).map(|c| c.to_vec()).collect()
}

/// Translate every filename in `filenames`, preserving input order and count
/// (§8 invariant 2: output length always equals input length).
///
/// Chunks run concurrently, bounded by `config.concurrency_limit`; each
/// chunk that fails is retried up to `config.max_retries` times with
/// `2^attempt + uniform(0,1)` second backoff (§4.10 step 4) before falling
/// back to identity translation for every filename in that chunk.
pub async fn translate_all(
    client: &reqwest::Client,
    config: &TranslationConfig,
    filenames: &[String],
    progress: &mut ProgressCallback<'_>,
) -> Vec<TranslationResult> {
    let chunks = chunk_inputs(filenames, config);
    if chunks.is_empty() {
        progress(ProgressEvent::Completed { message: "nothing to translate".into() });
        return Vec::new();
    }

    let semaphore = Arc::new(Semaphore::new(config.concurrency_limit.max(1)));
    let rate_limiter = Arc::new(rate_limiter_for(config));
    let total_chunks = chunks.len();

    let mut indexed: Vec<(usize, Vec<TranslationResult>)> = stream::iter(chunks.into_iter().enumerate())
        .map(|(index, chunk)| {
            let semaphore = Arc::clone(&semaphore);
            let rate_limiter = Arc::clone(&rate_limiter);
            let client = client.clone();
            async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                rate_limiter.until_ready().await;
                let results = translate_chunk_with_retry(&client, config, &chunk).await;
                (index, results)
            }
        })
        .buffer_unordered(config.concurrency_limit.max(1))
        .collect::<Vec<_>>()
        .await;

    // buffer_unordered completes chunks out of order; restore input order.
    indexed.sort_by_key(|(i, _)| *i);

    progress(ProgressEvent::Completed { message: format!("translated {total_chunks} chunk(s)") });

    indexed.into_iter().flat_map(|(_, r)| r).collect()
}

/// One chunk's request/parse/retry cycle (§4.10 steps 3-5): exponential
/// backoff with uniform jitter between attempts, identity fallback once
/// `max_retries` is exhausted.
async fn translate_chunk_with_retry(
    client: &reqwest::Client,
    config: &TranslationConfig,
    chunk: &[String],
) -> Vec<TranslationResult> {
    let mut last_err: Option<TranslationError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_duration(attempt);
            tokio::time::sleep(backoff).await;
        }

        match request_translation(client, config, chunk).await {
            Ok(content) if !content.trim().is_empty() => {
                return parse_translation_response(&content, chunk);
            }
            Ok(_) => {
                last_err = Some(TranslationError::EmptyResponse);
            }
            Err(err) => {
                warn!(attempt, error = %err, "translation request failed, will retry if attempts remain");
                last_err = Some(err);
            }
        }
    }

    warn!(
        error = ?last_err,
        chunk_len = chunk.len(),
        "translation retries exhausted, falling back to identity for this chunk"
    );
    chunk.iter().map(|s| TranslationResult::identity(s)).collect()
}

/// `2^attempt + uniform(0,1)` seconds (§4.10 step 4), `attempt` starting at 1
/// for the first retry.
fn backoff_duration(attempt: u32) -> Duration {
    let base = 2f64.powi(attempt as i32);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
    Duration::from_secs_f64(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize) -> TranslationConfig {
        TranslationConfig { chunk_size, ..Default::default() }
    }

    #[test]
    fn chunk_inputs_respects_min_clamp() {
        let cfg = config(1);
        let names: Vec<String> = (0..12).map(|i| format!("f{i}.wav")).collect();
        let chunks = chunk_inputs(&names, &cfg);
        assert!(chunks.iter().all(|c| c.len() <= cfg.chunk_size_min));
    }

    #[test]
    fn chunk_inputs_respects_max_clamp() {
        let cfg = config(10_000);
        let names: Vec<String> = (0..500).map(|i| format!("f{i}.wav")).collect();
        let chunks = chunk_inputs(&names, &cfg);
        assert!(chunks.iter().all(|c| c.len() <= cfg.chunk_size_max));
    }

    #[test]
    fn chunk_inputs_on_empty_input_is_empty() {
        let cfg = config(40);
        assert!(chunk_inputs(&[], &cfg).is_empty());
    }

    #[test]
    fn backoff_grows_with_attempt() {
        let first = backoff_duration(1).as_secs_f64();
        let fourth = backoff_duration(4).as_secs_f64();
        assert!(fourth > first);
    }
}
