//! Lexical pair scoring, the stand-in for a cross-encoder

use astrorag_common::errors::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// Scores (query, document) pairs independently of the rule tables.
///
/// A hosted cross-encoder implements this same trait.
#[async_trait]
pub trait PairScorer: Send + Sync {
    async fn score_pairs(&self, query: &str, documents: &[&str]) -> Result<Vec<f64>>;

    fn name(&self) -> &str;
}

/// Whitespace-token Jaccard similarity scaled to 0..=2
#[derive(Debug, Default, Clone)]
pub struct JaccardScorer;

impl JaccardScorer {
    pub fn score(query: &str, document: &str) -> f64 {
        let query = query.to_lowercase();
        let document = document.to_lowercase();
        let q: HashSet<&str> = query.split_whitespace().collect();
        let d: HashSet<&str> = document.split_whitespace().collect();

        let union = q.union(&d).count();
        if union == 0 {
            return 0.0;
        }
        let intersection = q.intersection(&d).count();
        intersection as f64 / union as f64 * 2.0
    }
}

#[async_trait]
impl PairScorer for JaccardScorer {
    async fn score_pairs(&self, query: &str, documents: &[&str]) -> Result<Vec<f64>> {
        Ok(documents.iter().map(|d| Self::score(query, d)).collect())
    }

    fn name(&self) -> &str {
        "jaccard"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text_scores_two() {
        assert!((JaccardScorer::score("sect light", "Sect Light") - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_and_empty() {
        assert_eq!(JaccardScorer::score("mars", "venus"), 0.0);
        assert_eq!(JaccardScorer::score("", ""), 0.0);
    }

    #[tokio::test]
    async fn test_score_pairs_preserves_order() {
        let scores = JaccardScorer
            .score_pairs("annual profection", &["annual profection", "firdaria"])
            .await
            .unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
    }
}
