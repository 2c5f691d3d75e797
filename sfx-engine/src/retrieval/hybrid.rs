//! Hybrid retrieval orchestrator (C9, §4.9): concurrent lexical/semantic
//! retrieval fused by Reciprocal Rank Fusion.
//!
//! Grounded directly on spec.md §4.9/§8 S4 (no original_source counterpart
//! for this component); the concurrent-retriever idiom (`tokio::join!`)
//! follows `wkmp-ai/src/services/workflow_orchestrator/mod.rs`'s use of
//! concurrent task fan-out for independent async calls.

use std::collections::HashMap;
use std::time::Instant;

/// `(mode, top_k, rrf_k, lexical_weight, semantic_weight)` from §4.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    Lexical,
    Semantic,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub mode: RetrievalMode,
    pub top_k: usize,
    pub rrf_k: f64,
    pub lexical_weight: f64,
    pub semantic_weight: f64,
}

/// Per-stage wall-clock timing, all in milliseconds (§4.9 step 3).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FusionObservation {
    pub lexical_ms: f64,
    pub semantic_ms: f64,
    pub fuse_ms: f64,
    pub total_ms: f64,
}

#[derive(Debug, Clone)]
pub struct FusionResult {
    pub items: Vec<(String, f64)>,
    pub observation: FusionObservation,
}

/// A retriever is any `(query, k) -> [(key, score)]` call; the orchestrator
/// is agnostic to whether it hits a lexical index or a semantic kNN store.
pub type Retriever<'a> = dyn Fn(&str, usize) -> Vec<(String, f64)> + Send + Sync + 'a;

/// Run `plan.mode`'s retrievers against `query_text` and, for `hybrid`,
/// fuse their ranked lists via Reciprocal Rank Fusion (§4.9).
pub async fn retrieve(
    query_text: &str,
    plan: &QueryPlan,
    lexical: &Retriever<'_>,
    semantic: &Retriever<'_>,
) -> FusionResult {
    let total_start = Instant::now();

    let (lexical_hits, semantic_hits, lexical_ms, semantic_ms) = match plan.mode {
        RetrievalMode::Lexical => {
            let start = Instant::now();
            let hits = lexical(query_text, plan.top_k);
            (hits, Vec::new(), elapsed_ms(start), 0.0)
        }
        RetrievalMode::Semantic => {
            let start = Instant::now();
            let hits = semantic(query_text, plan.top_k);
            (Vec::new(), hits, 0.0, elapsed_ms(start))
        }
        RetrievalMode::Hybrid => {
            let lexical_start = Instant::now();
            let semantic_start = Instant::now();
            let (lex, sem) = tokio::join!(
                async { lexical(query_text, plan.top_k) },
                async { semantic(query_text, plan.top_k) },
            );
            (lex, sem, elapsed_ms(lexical_start), elapsed_ms(semantic_start))
        }
    };

    let fuse_start = Instant::now();
    let items = match plan.mode {
        RetrievalMode::Hybrid => fuse_reciprocal_rank(&lexical_hits, &semantic_hits, plan),
        RetrievalMode::Lexical => rank_single(&lexical_hits, plan.top_k),
        RetrievalMode::Semantic => rank_single(&semantic_hits, plan.top_k),
    };
    let fuse_ms = elapsed_ms(fuse_start);

    FusionResult {
        items,
        observation: FusionObservation { lexical_ms, semantic_ms, fuse_ms, total_ms: elapsed_ms(total_start) },
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Non-hybrid modes still sort descending by score with the same
/// ascending-key tie-break, truncated to `top_k`.
fn rank_single(hits: &[(String, f64)], top_k: usize) -> Vec<(String, f64)> {
    let mut items = hits.to_vec();
    items.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    items.truncate(top_k);
    items
}

/// Reciprocal Rank Fusion (§4.9 step 2): `score_i(key) = weight_i / (rrf_k
/// + rank_i(key))`, ranks starting at 1, summed across retrievers that
/// returned the key. Sorted descending by fused score, ties broken by key
/// ascending.
fn fuse_reciprocal_rank(
    lexical_hits: &[(String, f64)],
    semantic_hits: &[(String, f64)],
    plan: &QueryPlan,
) -> Vec<(String, f64)> {
    let mut fused: HashMap<String, f64> = HashMap::new();

    for (rank, (key, _)) in lexical_hits.iter().enumerate() {
        let rank = rank + 1;
        *fused.entry(key.clone()).or_insert(0.0) += plan.lexical_weight / (plan.rrf_k + rank as f64);
    }
    for (rank, (key, _)) in semantic_hits.iter().enumerate() {
        let rank = rank + 1;
        *fused.entry(key.clone()).or_insert(0.0) += plan.semantic_weight / (plan.rrf_k + rank as f64);
    }

    let mut items: Vec<(String, f64)> = fused.into_iter().collect();
    items.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    items.truncate(plan.top_k);
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[tokio::test]
    async fn scenario_s4_hybrid_fusion_orders_by_rrf_score() {
        let plan = QueryPlan { mode: RetrievalMode::Hybrid, top_k: 3, rrf_k: 60.0, lexical_weight: 1.0, semantic_weight: 1.0 };
        let lexical = |_: &str, _: usize| vec![(key("a"), 0.0), (key("b"), 0.0), (key("c"), 0.0)];
        let semantic = |_: &str, _: usize| vec![(key("b"), 0.0), (key("d"), 0.0), (key("a"), 0.0)];

        let result = retrieve("query", &plan, &lexical, &semantic).await;
        let keys: Vec<&str> = result.items.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "d"]);

        let a_score = result.items.iter().find(|(k, _)| k == "a").unwrap().1;
        assert!((a_score - (1.0 / 61.0 + 1.0 / 63.0)).abs() < 1e-9);
        let b_score = result.items.iter().find(|(k, _)| k == "b").unwrap().1;
        assert!((b_score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn ties_break_by_key_ascending() {
        let plan = QueryPlan { mode: RetrievalMode::Hybrid, top_k: 10, rrf_k: 60.0, lexical_weight: 1.0, semantic_weight: 1.0 };
        let lexical = |_: &str, _: usize| vec![(key("z"), 0.0), (key("a"), 0.0)];
        let semantic = |_: &str, _: usize| vec![(key("a"), 0.0), (key("z"), 0.0)];

        let result = retrieve("query", &plan, &lexical, &semantic).await;
        let keys: Vec<&str> = result.items.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "z"]);
    }

    #[tokio::test]
    async fn lexical_only_mode_skips_semantic_retriever() {
        let plan = QueryPlan { mode: RetrievalMode::Lexical, top_k: 5, rrf_k: 60.0, lexical_weight: 1.0, semantic_weight: 1.0 };
        let lexical = |_: &str, _: usize| vec![(key("a"), 0.9), (key("b"), 0.1)];
        let semantic = |_: &str, _: usize| panic!("semantic retriever must not run in lexical mode");

        let result = retrieve("query", &plan, &lexical, &semantic).await;
        let keys: Vec<&str> = result.items.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(result.observation.semantic_ms, 0.0);
    }
}
