//! Optional in-memory TF-IDF scorer (C6), available to callers that prefer
//! it over the default substring/word-boundary relevance function.
//!
//! Grounded on `original_source/application/search_engine/search_engine.py`'s
//! `TFIDFScorer` (`index_document`/`remove_document`/`score`, document
//! frequency tracked per term and never allowed to go negative).

use std::collections::HashMap;

/// Tracks per-document term frequencies and corpus-wide document
/// frequencies to compute TF-IDF scores on demand.
#[derive(Debug, Default)]
pub struct TfIdfScorer {
    /// term -> number of documents containing it
    doc_freq: HashMap<String, u64>,
    /// doc id -> (term -> count in that doc)
    doc_terms: HashMap<u64, HashMap<String, u64>>,
}

impl TfIdfScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokenize `text` (lowercased, split on non-alphanumeric runs) and
    /// index it under `id`, replacing any prior indexing for that id.
    pub fn index_document(&mut self, id: u64, text: &str) {
        self.remove_document(id);

        let mut counts: HashMap<String, u64> = HashMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_insert(0) += 1;
        }
        for term in counts.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.doc_terms.insert(id, counts);
    }

    /// Remove `id` from the index, decrementing document frequencies for
    /// every term it contributed. Document frequency is never allowed to
    /// go negative.
    pub fn remove_document(&mut self, id: u64) {
        if let Some(counts) = self.doc_terms.remove(&id) {
            for term in counts.keys() {
                if let Some(df) = self.doc_freq.get_mut(term) {
                    *df = df.saturating_sub(1);
                    if *df == 0 {
                        self.doc_freq.remove(term);
                    }
                }
            }
        }
    }

    /// TF-IDF score of document `id` against `query_terms` (already
    /// tokenized; typically the query's free words).
    pub fn score(&self, id: u64, query_terms: &[String]) -> f32 {
        let Some(counts) = self.doc_terms.get(&id) else { return 0.0 };
        let total_docs = self.doc_terms.len().max(1) as f64;
        let doc_len: u64 = counts.values().sum();
        if doc_len == 0 {
            return 0.0;
        }

        let mut score = 0.0f64;
        for raw_term in query_terms {
            for term in tokenize(raw_term) {
                let Some(&tf) = counts.get(&term) else { continue };
                let df = self.doc_freq.get(&term).copied().unwrap_or(0).max(1) as f64;
                let idf = (total_docs / df).ln() + 1.0;
                score += (tf as f64 / doc_len as f64) * idf;
            }
        }
        score as f32
    }

    pub fn document_count(&self) -> usize {
        self.doc_terms.len()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexing_then_removing_keeps_document_frequency_nonnegative() {
        let mut scorer = TfIdfScorer::new();
        scorer.index_document(1, "explosion crowd noise");
        scorer.index_document(2, "crowd cheering");
        scorer.remove_document(1);
        scorer.remove_document(1); // removing twice must not underflow
        assert_eq!(scorer.doc_freq.get("crowd"), Some(&1));
        assert!(scorer.doc_freq.get("explosion").is_none());
    }

    #[test]
    fn documents_with_query_term_score_higher() {
        let mut scorer = TfIdfScorer::new();
        scorer.index_document(1, "explosion crowd noise explosion");
        scorer.index_document(2, "quiet room tone");

        let terms = vec!["explosion".to_string()];
        let s1 = scorer.score(1, &terms);
        let s2 = scorer.score(2, &terms);
        assert!(s1 > s2);
        assert_eq!(s2, 0.0);
    }

    #[test]
    fn reindexing_a_document_replaces_its_previous_terms() {
        let mut scorer = TfIdfScorer::new();
        scorer.index_document(1, "alpha beta");
        scorer.index_document(1, "gamma");
        assert!(scorer.doc_freq.get("alpha").is_none());
        assert_eq!(scorer.doc_freq.get("gamma"), Some(&1));
    }
}
