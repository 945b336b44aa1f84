//! Lexical retrieval with log-damped term frequencies
//!
//! Each query term contributes `2 * ln(1 + tf)` where `tf` counts its
//! occurrences in the lowercased content. Documents scoring zero are dropped.

use super::{matches_filters, Document, Filters, RetrievalMethod, RetrievalResult, SearchStore};
use astrorag_common::errors::Result;
use tokio::sync::RwLock;

/// Sparse store keeping documents in memory
pub struct InMemorySparseStore {
    documents: RwLock<Vec<Document>>,
}

impl InMemorySparseStore {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents: RwLock::new(documents),
        }
    }

    pub async fn add_documents(&self, documents: Vec<Document>) -> usize {
        let added = documents.len();
        self.documents.write().await.extend(documents);
        added
    }

    /// Prepare query terms: lowercase, whitespace split, punctuation trimmed
    fn prepare_query(query: &str) -> Vec<String> {
        query
            .to_lowercase()
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|w| !w.is_empty())
            .collect()
    }

    fn score(terms: &[String], content: &str) -> f64 {
        let content = content.to_lowercase();
        terms
            .iter()
            .map(|term| content.matches(term.as_str()).count())
            .filter(|&tf| tf > 0)
            .map(|tf| (1.0 + tf as f64).ln() * 2.0)
            .sum()
    }
}

#[async_trait::async_trait]
impl SearchStore for InMemorySparseStore {
    async fn search(&self, query: &str, top_k: usize, filters: Option<&Filters>) -> Result<Vec<RetrievalResult>> {
        let terms = Self::prepare_query(query);
        if terms.is_empty() {
            return Ok(vec![]);
        }

        let documents = self.documents.read().await;
        let mut results: Vec<RetrievalResult> = documents
            .iter()
            .filter(|d| filters.map_or(true, |f| matches_filters(&d.metadata, f)))
            .filter_map(|d| {
                let score = Self::score(&terms, &d.content);
                (score > 0.0).then(|| RetrievalResult {
                    content: d.content.clone(),
                    score,
                    source_id: d.id.clone(),
                    method: RetrievalMethod::Sparse,
                    metadata: d.metadata.clone(),
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }

    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Sparse
    }
}
