//! Chat-completion HTTP transport for a single translation batch: request
//! construction, SSE streaming consumption, and fault-tolerant response
//! parsing.
//!
//! Grounded almost operation-for-operation on
//! `original_source/application/ai_engine/providers/openai_compatible.py`'s
//! `process_chunk`/`_parse_translation_response`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::TranslationConfig;
use crate::error::TranslationError;

/// One translated filename, plus the optional UCS-style fields the
/// reference provider's prompt asks for (§4.10, §3 glossary).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub original: String,
    pub translated: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub descriptor: Option<String>,
    pub variation: Option<String>,
}

impl TranslationResult {
    /// Fall back to `translated = original` (§4.10 step 4's retry
    /// exhaustion and step 5's parse-failure fallback).
    pub fn identity(original: &str) -> Self {
        Self { original: original.to_string(), translated: original.to_string(), ..Default::default() }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: String,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    stream: bool,
}

fn system_prompt() -> &'static str {
    "Translate audio effect filenames into natural-language descriptions. \
     Respond as a JSON object with a top-level \"results\" array of objects \
     shaped {\"original\":...,\"translated\":...,\"category\":...,\"subcategory\":...,\"descriptor\":...,\"variation\":...}."
}

fn user_prompt(chunk: &[String]) -> String {
    format!("Translate the following audio filenames:\n{}", serde_json::to_string(chunk).unwrap_or_default())
}

/// Issue one chat-completion request for `chunk` and stream-consume the
/// response (§4.10 step 3/5). Returns the raw accumulated text content;
/// callers parse it with [`parse_translation_response`].
pub async fn request_translation(
    client: &reqwest::Client,
    config: &TranslationConfig,
    chunk: &[String],
) -> Result<String, TranslationError> {
    let body = ChatRequest {
        model: config.model_id.clone(),
        messages: vec![
            ChatMessage { role: "system", content: system_prompt().to_string() },
            ChatMessage { role: "user", content: user_prompt(chunk) },
        ],
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        response_format: Some(serde_json::json!({ "type": "json_object" })),
        stream: true,
    };

    let response = client
        .post(&config.endpoint)
        .bearer_auth(&config.api_key)
        .json(&body)
        .send()
        .await?;

    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS || response.status().is_server_error() {
        return Err(TranslationError::EmptyResponse);
    }
    if !response.status().is_success() {
        return Err(TranslationError::EmptyResponse);
    }

    consume_sse_stream(response).await
}

/// Accumulate `delta.content` tokens from an SSE stream until `data:
/// [DONE]`, reporting in-flight progress every time a new `"translated"`
/// marker appears in the accumulated buffer (§4.10 step 5).
async fn consume_sse_stream(response: reqwest::Response) -> Result<String, TranslationError> {
    use futures::StreamExt;

    let mut content = String::new();
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut stream_done = false;

    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim().to_string();
            buffer.drain(..=newline);
            if line.is_empty() {
                continue;
            }
            if line == "data: [DONE]" {
                stream_done = true;
                break;
            }
            if let Some(payload) = line.strip_prefix("data: ") {
                if let Ok(parsed) = serde_json::from_str::<Value>(payload) {
                    if let Some(delta) = parsed
                        .get("choices")
                        .and_then(|c| c.get(0))
                        .and_then(|c| c.get("delta"))
                        .and_then(|d| d.get("content"))
                        .and_then(|v| v.as_str())
                    {
                        content.push_str(delta);
                    }
                } else {
                    debug!("stream chunk was not valid JSON, ignoring");
                }
            }
        }
        if stream_done {
            break;
        }
    }

    if !stream_done {
        warn!("stream ended without a [DONE] marker, content length={}", content.len());
    }
    Ok(content)
}

static FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").unwrap());
static RECOVERY_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{[^{}]*"original"\s*:\s*"([^"]*)"[^{}]*"translated"\s*:\s*"([^"]*)"[^{}]*(?:\}|$)"#).unwrap()
});
static RECOVERY_CATEGORY: Lazy<Regex> = Lazy::new(|| Regex::new(r#""category"\s*:\s*"([^"]*)""#).unwrap());
static RECOVERY_SUBCATEGORY: Lazy<Regex> = Lazy::new(|| Regex::new(r#""subcategory"\s*:\s*"([^"]*)""#).unwrap());
static RECOVERY_DESCRIPTOR: Lazy<Regex> = Lazy::new(|| Regex::new(r#""descriptor"\s*:\s*"([^"]*)""#).unwrap());
static RECOVERY_VARIATION: Lazy<Regex> = Lazy::new(|| Regex::new(r#""variation"\s*:\s*"([^"]*)""#).unwrap());

/// Parse a (possibly malformed) response body into one [`TranslationResult`]
/// per `original_texts`, count-preserving (§4.10 step 5, §8 S5).
///
/// Tries markdown-fence stripping then strict JSON first; on failure,
/// recovers `{"original":...,"translated":...}` pairs via regex. Any input
/// text with no recovered translation falls back to identity.
pub fn parse_translation_response(content: &str, original_texts: &[String]) -> Vec<TranslationResult> {
    let mut by_original = std::collections::HashMap::new();

    let cleaned = match FENCE.captures(content.trim()) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(content).to_string(),
        None => content.trim().to_string(),
    };

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(parsed) => {
            for item in extract_items(&parsed) {
                if let Some(original) = item.get("original").and_then(|v| v.as_str()) {
                    by_original.insert(original.to_string(), translation_from_value(original, item));
                }
            }
        }
        Err(err) => {
            warn!(error = %err, "standard JSON parse failed, attempting regex recovery");
            for caps in RECOVERY_PAIR.captures_iter(&cleaned) {
                let original = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                let translated = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                if original.is_empty() || by_original.contains_key(original) {
                    continue;
                }
                let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                by_original.insert(
                    original.to_string(),
                    TranslationResult {
                        original: original.to_string(),
                        translated: translated.to_string(),
                        category: capture_field(&RECOVERY_CATEGORY, whole),
                        subcategory: capture_field(&RECOVERY_SUBCATEGORY, whole),
                        descriptor: capture_field(&RECOVERY_DESCRIPTOR, whole),
                        variation: capture_field(&RECOVERY_VARIATION, whole),
                    },
                );
            }
        }
    }

    original_texts
        .iter()
        .map(|text| by_original.remove(text).unwrap_or_else(|| TranslationResult::identity(text)))
        .collect()
}

fn capture_field(pattern: &Regex, text: &str) -> Option<String> {
    pattern.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}

fn extract_items(parsed: &Value) -> Vec<&Value> {
    match parsed {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("results") {
                return items.iter().collect();
            }
            for value in map.values() {
                if let Value::Array(items) = value {
                    return items.iter().collect();
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

fn translation_from_value(original: &str, item: &Value) -> TranslationResult {
    let field = |name: &str| item.get(name).and_then(|v| v.as_str()).map(|s| s.to_string());
    TranslationResult {
        original: original.to_string(),
        translated: field("translated").unwrap_or_else(|| original.to_string()),
        category: field("category"),
        subcategory: field("subcategory"),
        descriptor: field("descriptor"),
        variation: field("variation"),
    }
}
