//! Reranking of fused retrieval candidates
//!
//! Each candidate gets a multiplicative rule score (topic, source, language,
//! length, terminology, phrasing, query overlap) and an independent lexical
//! pair score. They are blended 60/40, then averaged with the retrieval
//! score. Sorting is stable so ties keep their input order.

mod lexical;
mod rules;

pub use lexical::{JaccardScorer, PairScorer};
pub use rules::{rule_reason, rule_score};

use crate::retrieval::RetrievalResult;
use astrorag_common::errors::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

const RULE_WEIGHT: f64 = 0.6;
const LEXICAL_WEIGHT: f64 = 0.4;
const RETRIEVAL_WEIGHT: f64 = 0.5;

/// Reranked candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankingResult {
    pub result: RetrievalResult,
    /// Blended rule + lexical score
    pub rerank_score: f64,
    pub reason: String,
    pub final_score: f64,
    /// Input position minus output position; positive means promoted
    pub rank_change: i64,
}

/// Caller context for the rule bonuses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankContext {
    pub user_level: String,
    #[serde(default)]
    pub chart_elements: Vec<String>,
}

impl Default for RerankContext {
    fn default() -> Self {
        Self {
            user_level: "intermediate".to_string(),
            chart_elements: Vec::new(),
        }
    }
}

/// Aggregate statistics over one rerank pass
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RerankStats {
    pub total_results: usize,
    pub average_rank_change: f64,
    pub max_rank_change: u64,
    pub results_reordered: usize,
    pub average_rerank_score: f64,
    /// Candidates whose final score exceeds their retrieval score
    pub score_improvement: usize,
}

/// Combined rule-based and lexical reranker
#[derive(Clone)]
pub struct Reranker {
    scorer: Arc<dyn PairScorer>,
}

impl Default for Reranker {
    fn default() -> Self {
        Self::new(Arc::new(JaccardScorer))
    }
}

impl Reranker {
    pub fn new(scorer: Arc<dyn PairScorer>) -> Self {
        Self { scorer }
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Rerank candidates, best first
    #[instrument(skip(self, results, context), fields(candidates = results.len(), scorer = self.scorer.name()))]
    pub async fn rerank(
        &self,
        results: Vec<RetrievalResult>,
        query: &str,
        context: &RerankContext,
    ) -> Result<Vec<RerankingResult>> {
        if results.is_empty() {
            return Ok(Vec::new());
        }

        let documents: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
        let lexical = self.scorer.score_pairs(query, &documents).await?;

        let mut scored: Vec<(usize, RerankingResult)> = results
            .into_iter()
            .zip(lexical)
            .enumerate()
            .map(|(index, (result, lexical_score))| {
                let rule = rule_score(&result, query, context);
                let combined = RULE_WEIGHT * rule + LEXICAL_WEIGHT * lexical_score;
                let final_score = RETRIEVAL_WEIGHT * result.score + (1.0 - RETRIEVAL_WEIGHT) * combined;
                let reason = format!(
                    "Combined: rule-based ({:.2}) + cross-encoder ({:.2}); {}",
                    rule,
                    lexical_score,
                    rule_reason(&result, rule)
                );
                (
                    index,
                    RerankingResult {
                        result,
                        rerank_score: combined,
                        reason,
                        final_score,
                        rank_change: 0,
                    },
                )
            })
            .collect();

        // sort_by is stable
        scored.sort_by(|a, b| b.1.final_score.total_cmp(&a.1.final_score));

        let reranked: Vec<RerankingResult> = scored
            .into_iter()
            .enumerate()
            .map(|(new_index, (old_index, mut item))| {
                item.rank_change = old_index as i64 - new_index as i64;
                item
            })
            .collect();

        debug!(
            top = reranked.first().map(|r| r.result.source_id.as_str()).unwrap_or(""),
            "Rerank complete"
        );
        Ok(reranked)
    }
}

/// Summarize rank movement over a reranked list
pub fn rerank_stats(reranked: &[RerankingResult]) -> RerankStats {
    if reranked.is_empty() {
        return RerankStats::default();
    }

    let n = reranked.len() as f64;
    let changes: Vec<u64> = reranked.iter().map(|r| r.rank_change.unsigned_abs()).collect();

    RerankStats {
        total_results: reranked.len(),
        average_rank_change: changes.iter().sum::<u64>() as f64 / n,
        max_rank_change: changes.iter().copied().max().unwrap_or(0),
        results_reordered: reranked.iter().filter(|r| r.rank_change != 0).count(),
        average_rerank_score: reranked.iter().map(|r| r.rerank_score).sum::<f64>() / n,
        score_improvement: reranked
            .iter()
            .filter(|r| r.final_score > r.result.score)
            .count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::RetrievalMethod;
    use serde_json::json;

    fn result(id: &str, content: &str, score: f64, meta: serde_json::Value) -> RetrievalResult {
        RetrievalResult {
            content: content.to_string(),
            score,
            source_id: id.to_string(),
            method: RetrievalMethod::Hybrid,
            metadata: meta.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn test_final_score_blend() {
        let r = result("a", "tiny", 0.4, json!({}));
        let out = Reranker::default()
            .rerank(vec![r], "zzz", &RerankContext::default())
            .await
            .unwrap();
        // rule 0.7 (short), lexical 0
        let combined = 0.6 * 0.7;
        assert!((out[0].rerank_score - combined).abs() < 1e-9);
        assert!((out[0].final_score - (0.5 * 0.4 + 0.5 * combined)).abs() < 1e-9);
        assert!(out[0].reason.starts_with("Combined: rule-based (0.70) + cross-encoder (0.00)"));
    }

    #[tokio::test]
    async fn test_promotes_relevant_candidate() {
        let filler = "steady ".repeat(20);
        let weak = result("weak", &filler, 0.5, json!({}));
        let strong = result(
            "strong",
            &format!("The almuten calculation according to traditional dignity method. {}", filler),
            0.5,
            json!({"topic": "almuten", "source": "traditional_astrology"}),
        );
        let out = Reranker::default()
            .rerank(vec![weak, strong], "almuten calculation", &RerankContext::default())
            .await
            .unwrap();
        assert_eq!(out[0].result.source_id, "strong");
        assert_eq!(out[0].rank_change, 1);
        assert_eq!(out[1].rank_change, -1);

        let stats = rerank_stats(&out);
        assert_eq!(stats.total_results, 2);
        assert_eq!(stats.results_reordered, 2);
        assert_eq!(stats.max_rank_change, 1);
    }

    #[tokio::test]
    async fn test_ties_keep_input_order() {
        let a = result("a", "identical body text", 0.3, json!({}));
        let b = result("b", "identical body text", 0.3, json!({}));
        let out = Reranker::default()
            .rerank(vec![a, b], "q", &RerankContext::default())
            .await
            .unwrap();
        assert_eq!(out[0].result.source_id, "a");
        assert!(out.iter().all(|r| r.rank_change == 0));
    }

    #[test]
    fn test_stats_empty() {
        assert_eq!(rerank_stats(&[]), RerankStats::default());
    }
}
