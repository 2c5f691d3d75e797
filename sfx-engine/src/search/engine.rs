//! Search engine (C6): compile a parsed query + filter struct into record
//! predicates, execute against a [`crate::search::store::RecordStore`],
//! score, and paginate.
//!
//! Grounded on `original_source/application/search_engine/search_engine.py`'s
//! `SearchEngine._calculate_score`/`_glob_to_like`/`_extract_query_terms`, and
//! on `wkmp-dr/src/api/search.rs` for the sqlx query-building idiom.

use std::time::Instant;

use crate::model::AudioRecord;
use crate::query::{CompareOp, Field, MatchKind, SearchExpression, SearchQuery, SearchTerm};

/// Filter struct applied as further conjunctions on top of the parsed query
/// (§4.6 step 2).
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub min_duration_s: Option<f64>,
    pub max_duration_s: Option<f64>,
    pub sample_rates: Option<Vec<u32>>,
    pub formats: Option<Vec<String>>,
    pub channels: Option<u8>,
    pub tags: Option<Vec<String>>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

/// `(ordered ids, id -> score, total_count, elapsed_ms)` (§3 `QueryResult`).
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub ids: Vec<u64>,
    pub scores: std::collections::HashMap<u64, f32>,
    pub total_count: u64,
    pub elapsed_ms: f64,
}

/// Evaluate a parsed [`SearchExpression`] against a single record (§4.6 step
/// 1). Used directly by [`super::store::MemoryRecordStore`] and by tests
/// exercising the scenarios in spec §8.
pub fn matches(record: &AudioRecord, expr: &SearchExpression) -> bool {
    match expr {
        SearchExpression::Term(term) => matches_term(record, term),
        SearchExpression::And(l, r) => matches(record, l) && matches(record, r),
        SearchExpression::Or(l, r) => matches(record, l) || matches(record, r),
        SearchExpression::Not(inner) => !matches(record, inner),
    }
}

fn matches_term(record: &AudioRecord, term: &SearchTerm) -> bool {
    match term.field {
        None => {
            let Some(text) = term.value.as_text() else { return false };
            if term.match_kind == MatchKind::Glob {
                glob_match(&record.filename, text)
                    || record.comment.as_deref().map(|c| glob_match(c, text)).unwrap_or(false)
            } else {
                contains_ci(&record.filename, text)
                    || record.comment.as_deref().map(|c| contains_ci(c, text)).unwrap_or(false)
            }
        }
        Some(Field::Filename) => compare_text(&record.filename, term),
        Some(Field::Path) => compare_text(&record.path.to_string_lossy(), term),
        Some(Field::Duration) => compare_number(record.duration_s, term),
        Some(Field::SampleRate) => compare_number(record.sample_rate_hz as f64, term),
        Some(Field::BitDepth) => compare_number(record.bit_depth as f64, term),
        Some(Field::Channels) => compare_number(record.channels as f64, term),
        Some(Field::Format) => record.format.eq_ignore_ascii_case(term.value.as_text().unwrap_or("")),
        Some(Field::Description) => record.comment.as_deref().map(|c| contains_ci(c, term.value.as_text().unwrap_or(""))).unwrap_or(false),
        Some(Field::Size) => compare_number(record.file_size as f64, term),
        Some(Field::Tag) => {
            let Some(text) = term.value.as_text() else { return false };
            record.tags.iter().any(|t| t.eq_ignore_ascii_case(text))
        }
    }
}

fn compare_text(value: &str, term: &SearchTerm) -> bool {
    let Some(text) = term.value.as_text() else { return false };
    if term.match_kind == MatchKind::Glob && matches!(term.operator, CompareOp::Eq | CompareOp::Contains) {
        return glob_match(value, text);
    }
    match term.operator {
        CompareOp::Eq => value.eq_ignore_ascii_case(text),
        CompareOp::Ne => !value.eq_ignore_ascii_case(text),
        CompareOp::Contains => contains_ci(value, text),
        CompareOp::Regex => regex::Regex::new(text).map(|re| re.is_match(value)).unwrap_or(false),
        _ => contains_ci(value, text),
    }
}

/// Match `haystack` against a glob `pattern` (`*` = any run, `?` = single
/// char), case-insensitively — the in-process equivalent of the `LIKE`
/// pattern [`glob_to_like`] compiles for [`super::store::SqliteRecordStore`].
fn glob_match(haystack: &str, pattern: &str) -> bool {
    let regex_source = glob_to_regex(pattern);
    regex::RegexBuilder::new(&regex_source)
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

fn compare_number(value: f64, term: &SearchTerm) -> bool {
    let Some(n) = term.value.as_number() else { return false };
    match term.operator {
        CompareOp::Eq => (value - n).abs() < f64::EPSILON,
        CompareOp::Ne => (value - n).abs() >= f64::EPSILON,
        CompareOp::Gt => value > n,
        CompareOp::Lt => value < n,
        CompareOp::Ge => value >= n,
        CompareOp::Le => value <= n,
        _ => (value - n).abs() < f64::EPSILON,
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Whether `haystack` contains `needle` at a word boundary, case-insensitive
/// (§4.6 step 4's "word-boundary-present" bonus).
fn word_boundary_present(haystack: &str, needle: &str) -> bool {
    let h = haystack.to_lowercase();
    let n = needle.to_lowercase();
    if n.is_empty() {
        return false;
    }
    h.split(|c: char| !c.is_alphanumeric()).any(|word| word == n)
}

/// Translate a glob pattern (`*`, `?`) into a SQL `LIKE` pattern, escaping
/// existing SQL metacharacters first (§4.5).
pub fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            '*' => out.push('%'),
            '?' => out.push('_'),
            other => out.push(other),
        }
    }
    out
}

/// Score each retrieved record by the default relevance function (§4.6 step
/// 4): +2.0 per free word substring-present in the filename, +1.0 more if
/// that word also appears at a word boundary. A query with no free words
/// scores every result `1.0`.
pub fn score_records(records: &[AudioRecord], query: &SearchQuery) -> std::collections::HashMap<u64, f32> {
    let free_words = query.root.as_ref().map(|e| e.free_words()).unwrap_or_default();
    let mut scores = std::collections::HashMap::with_capacity(records.len());

    if free_words.is_empty() {
        for r in records {
            scores.insert(r.id, 1.0);
        }
        return scores;
    }

    for r in records {
        let mut score = 0.0f32;
        for word in &free_words {
            if word.is_empty() {
                continue;
            }
            if contains_ci(&r.filename, word) {
                score += 2.0;
                if word_boundary_present(&r.filename, word) {
                    score += 1.0;
                }
            }
        }
        scores.insert(r.id, score);
    }
    scores
}

/// Run a parsed query against a record store: compile predicates, apply
/// filters, paginate, score, and sort descending by score (stable) (§4.6).
pub async fn execute<S: super::store::RecordStore>(
    store: &S,
    query: &SearchQuery,
    filters: &Filters,
    page: Page,
) -> sfx_common::Result<QueryResult> {
    let start = Instant::now();

    let (mut records, total_count) = store.query(query.root.as_ref(), filters, page).await?;
    let scores = score_records(&records, query);

    records.sort_by(|a, b| {
        let sa = scores.get(&a.id).copied().unwrap_or(0.0);
        let sb = scores.get(&b.id).copied().unwrap_or(0.0);
        sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
    });

    let ids = records.iter().map(|r| r.id).collect();
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    Ok(QueryResult { ids, scores, total_count, elapsed_ms })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;
    use crate::search::store::MemoryRecordStore;

    fn rec(id: u64, filename: &str, duration_s: f64, format: &str, tags: &[&str]) -> AudioRecord {
        AudioRecord {
            id,
            path: format!("/lib/{filename}").into(),
            content_hash: None,
            filename: filename.to_string(),
            format: format.to_string(),
            file_size: 1_000_000,
            duration_s,
            sample_rate_hz: 48_000,
            bit_depth: 16,
            channels: 2,
            bitrate_kbps: None,
            title: None,
            artist: None,
            album: None,
            genre: None,
            year: None,
            track_number: None,
            comment: None,
            tags: tags.iter().map(|s| s.to_string()).collect(),
            translation_status: Default::default(),
            translated_name: None,
            embedding: None,
        }
    }

    #[tokio::test]
    async fn s1_lexical_parse_and_execute() {
        let store = MemoryRecordStore::new(vec![
            rec(1, "crowd.wav", 360.0, "wav", &[]),
            rec(2, "crowd_stereo.wav", 240.0, "wav", &[]),
            rec(3, "wind_stereo.flac", 600.0, "flac", &[]),
            rec(4, "thunder_stereo.wav", 420.0, "wav", &[]),
        ]);
        let query = parse("duration:>5m AND format:wav NOT stereo");
        let result = execute(&store, &query, &Filters::default(), Page { limit: 10, offset: 0 }).await.unwrap();
        assert_eq!(result.ids, vec![1]);
    }

    #[tokio::test]
    async fn s2_glob_and_negation() {
        let store = MemoryRecordStore::new(vec![
            rec(1, "foot_step.wav", 10.0, "wav", &[]),
            rec(2, "footfall.wav", 10.0, "wav", &[]),
            rec(3, "thud.wav", 10.0, "wav", &[]),
            rec(4, "thud.mp3", 10.0, "mp3", &[]),
        ]);
        let query = parse("-foot* AND format:wav");
        let result = execute(&store, &query, &Filters::default(), Page { limit: 10, offset: 0 }).await.unwrap();
        assert_eq!(result.ids, vec![3]);
    }

    #[test]
    fn glob_to_like_escapes_sql_metacharacters_first() {
        assert_eq!(glob_to_like("100%_done*.wav"), "100\\%\\_done%.wav");
    }

    #[test]
    fn no_free_words_scores_uniformly() {
        let records = vec![rec(1, "a.wav", 1.0, "wav", &[])];
        let query = parse("format:wav");
        let scores = score_records(&records, &query);
        assert_eq!(scores[&1], 1.0);
    }
}
