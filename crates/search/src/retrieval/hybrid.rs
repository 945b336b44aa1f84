//! Hybrid retrieval combining dense and sparse search
//!
//! Both sides run concurrently under a per-store timeout. A failing side
//! never fails the call: the surviving side's ranking is returned instead.

use super::{alpha::AlphaPicker, fusion::fuse, Filters, RetrievalMethod, RetrievalResult, SearchStore};
use astrorag_common::errors::{AppError, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one retrieval call
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    pub results: Vec<RetrievalResult>,
    /// Method that actually produced the ranking
    pub method: RetrievalMethod,
    /// Dense weight used when both sides were fused
    pub alpha: Option<f64>,
    /// True when a configured backend failed or timed out
    pub degraded: bool,
    pub failures: Vec<String>,
}

impl RetrievalOutcome {
    fn from_single(results: Vec<RetrievalResult>, method: RetrievalMethod, failures: Vec<String>) -> Self {
        Self {
            results: dedupe(results),
            method,
            alpha: None,
            degraded: !failures.is_empty(),
            failures,
        }
    }

    fn empty(failures: Vec<String>) -> Self {
        Self {
            results: Vec::new(),
            method: RetrievalMethod::Hybrid,
            alpha: None,
            degraded: true,
            failures,
        }
    }
}

/// Hybrid retriever over optional dense and sparse backends
pub struct HybridRetriever {
    dense: Option<Arc<dyn SearchStore>>,
    sparse: Option<Arc<dyn SearchStore>>,
    alpha: AlphaPicker,
    timeout: Duration,
}

impl HybridRetriever {
    pub fn new(
        dense: Option<Arc<dyn SearchStore>>,
        sparse: Option<Arc<dyn SearchStore>>,
        alpha: AlphaPicker,
        timeout: Duration,
    ) -> Self {
        Self {
            dense,
            sparse,
            alpha,
            timeout,
        }
    }

    /// Retrieve with the hybrid strategy
    pub async fn retrieve(&self, query: &str, top_k: usize, filters: Option<&Filters>, language: &str) -> RetrievalOutcome {
        self.retrieve_with(query, top_k, filters, language, RetrievalMethod::Hybrid)
            .await
    }

    /// Retrieve with an explicit method; a failing preferred side is retried once on its sibling
    pub async fn retrieve_with(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&Filters>,
        language: &str,
        method: RetrievalMethod,
    ) -> RetrievalOutcome {
        match method {
            RetrievalMethod::Dense => {
                self.single_with_fallback(query, top_k, filters, self.dense.as_ref(), self.sparse.as_ref())
                    .await
            }
            RetrievalMethod::Sparse => {
                self.single_with_fallback(query, top_k, filters, self.sparse.as_ref(), self.dense.as_ref())
                    .await
            }
            _ => self.hybrid(query, top_k, filters, language).await,
        }
    }

    /// Documents tagged with a topic
    pub async fn search_by_topic(&self, topic: &str, top_k: usize) -> RetrievalOutcome {
        let filters = filters_of(json!({ "topic": topic }));
        self.retrieve(topic, top_k, Some(&filters), "en").await
    }

    /// Documents carrying any of the tags
    pub async fn search_by_tags(&self, tags: &[String], top_k: usize) -> RetrievalOutcome {
        let filters = filters_of(json!({ "tags": tags }));
        self.retrieve(&tags.join(" "), top_k, Some(&filters), "en").await
    }

    /// Backend summary for readiness probes
    pub fn describe(&self) -> Value {
        json!({
            "dense": self.dense.is_some(),
            "sparse": self.sparse.is_some(),
            "timeout_ms": self.timeout.as_millis() as u64,
        })
    }

    async fn hybrid(&self, query: &str, top_k: usize, filters: Option<&Filters>, language: &str) -> RetrievalOutcome {
        let (dense, sparse) = match (&self.dense, &self.sparse) {
            (Some(dense), Some(sparse)) => (dense, sparse),
            (Some(only), None) | (None, Some(only)) => {
                return self.single(query, top_k, filters, only).await;
            }
            (None, None) => {
                warn!("No retrieval backend configured");
                return RetrievalOutcome::empty(vec!["no retrieval backend configured".to_string()]);
            }
        };

        // Fetch more results from each side for better fusion
        let expanded = top_k.saturating_mul(2).max(1);

        let (dense_results, sparse_results) = tokio::join!(
            self.search(dense, query, expanded, filters),
            self.search(sparse, query, expanded, filters)
        );

        match (dense_results, sparse_results) {
            (Ok(d), Ok(s)) => {
                let alpha = self.alpha.pick(query, language);
                let results = fuse(d, s, alpha, top_k);
                debug!(alpha, count = results.len(), "Hybrid retrieval fused");
                RetrievalOutcome {
                    results,
                    method: RetrievalMethod::Hybrid,
                    alpha: Some(alpha),
                    degraded: false,
                    failures: Vec::new(),
                }
            }
            (Ok(d), Err(e)) => {
                warn!(error = %e, "Sparse retrieval failed, using dense ranking");
                RetrievalOutcome::from_single(truncate(d, top_k), RetrievalMethod::Dense, vec![e.to_string()])
            }
            (Err(e), Ok(s)) => {
                warn!(error = %e, "Dense retrieval failed, using sparse ranking");
                RetrievalOutcome::from_single(truncate(s, top_k), RetrievalMethod::Sparse, vec![e.to_string()])
            }
            (Err(de), Err(se)) => {
                warn!(dense_error = %de, sparse_error = %se, "Both retrieval backends failed");
                RetrievalOutcome::empty(vec![de.to_string(), se.to_string()])
            }
        }
    }

    async fn single(&self, query: &str, top_k: usize, filters: Option<&Filters>, store: &Arc<dyn SearchStore>) -> RetrievalOutcome {
        match self.search(store, query, top_k, filters).await {
            Ok(results) => RetrievalOutcome::from_single(results, store.method(), Vec::new()),
            Err(e) => {
                warn!(error = %e, method = store.method().as_str(), "Retrieval failed");
                RetrievalOutcome::empty(vec![e.to_string()])
            }
        }
    }

    async fn single_with_fallback(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&Filters>,
        preferred: Option<&Arc<dyn SearchStore>>,
        sibling: Option<&Arc<dyn SearchStore>>,
    ) -> RetrievalOutcome {
        let mut failures = Vec::new();
        if let Some(store) = preferred {
            match self.search(store, query, top_k, filters).await {
                Ok(results) => return RetrievalOutcome::from_single(results, store.method(), Vec::new()),
                Err(e) => {
                    warn!(error = %e, method = store.method().as_str(), "Preferred backend failed, trying sibling");
                    failures.push(e.to_string());
                }
            }
        }
        if let Some(store) = sibling {
            match self.search(store, query, top_k, filters).await {
                Ok(results) => return RetrievalOutcome::from_single(results, store.method(), failures),
                Err(e) => failures.push(e.to_string()),
            }
        }
        if failures.is_empty() {
            failures.push("no retrieval backend configured".to_string());
        }
        RetrievalOutcome::empty(failures)
    }

    async fn search(
        &self,
        store: &Arc<dyn SearchStore>,
        query: &str,
        limit: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<RetrievalResult>> {
        match tokio::time::timeout(self.timeout, store.search(query, limit, filters)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::StoreUnavailable {
                store: store.method().as_str().to_string(),
                message: format!("timed out after {}ms", self.timeout.as_millis()),
            }),
        }
    }
}

fn filters_of(value: Value) -> Filters {
    value.as_object().cloned().unwrap_or_default()
}

fn truncate(mut results: Vec<RetrievalResult>, top_k: usize) -> Vec<RetrievalResult> {
    results.truncate(top_k);
    results
}

fn dedupe(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.source_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::seed_documents;
    use crate::retrieval::{InMemoryDenseStore, InMemorySparseStore};
    use astrorag_common::embeddings::HashingEmbedder;
    use proptest::prelude::*;

    struct FailingStore(RetrievalMethod);

    #[async_trait::async_trait]
    impl SearchStore for FailingStore {
        async fn search(&self, _: &str, _: usize, _: Option<&Filters>) -> Result<Vec<RetrievalResult>> {
            Err(AppError::StoreUnavailable {
                store: self.0.as_str().to_string(),
                message: "connection refused".to_string(),
            })
        }

        fn method(&self) -> RetrievalMethod {
            self.0
        }
    }

    struct SlowStore;

    #[async_trait::async_trait]
    impl SearchStore for SlowStore {
        async fn search(&self, _: &str, _: usize, _: Option<&Filters>) -> Result<Vec<RetrievalResult>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }

        fn method(&self) -> RetrievalMethod {
            RetrievalMethod::Dense
        }
    }

    async fn dense() -> Arc<dyn SearchStore> {
        Arc::new(
            InMemoryDenseStore::with_documents(Arc::new(HashingEmbedder::new(256)), seed_documents())
                .await
                .unwrap(),
        )
    }

    fn sparse() -> Arc<dyn SearchStore> {
        Arc::new(InMemorySparseStore::new(seed_documents()))
    }

    fn retriever(d: Option<Arc<dyn SearchStore>>, s: Option<Arc<dyn SearchStore>>) -> HybridRetriever {
        HybridRetriever::new(d, s, AlphaPicker::default(), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_hybrid_fuses_and_reports_alpha() {
        let r = retriever(Some(dense().await), Some(sparse()));
        let outcome = r.retrieve("zodiacal releasing career timing", 3, None, "en").await;
        assert_eq!(outcome.method, RetrievalMethod::Hybrid);
        let alpha = outcome.alpha.unwrap();
        assert!((0.4..=0.85).contains(&alpha));
        assert_eq!(outcome.results[0].source_id, "zr_001");
        assert!(!outcome.degraded);
    }

    #[tokio::test]
    async fn test_missing_side_returns_raw_ranking() {
        let r = retriever(None, Some(sparse()));
        let outcome = r.retrieve("firdaria periods", 5, None, "en").await;
        assert_eq!(outcome.method, RetrievalMethod::Sparse);
        assert!(outcome.alpha.is_none());
        assert!(outcome.results.iter().all(|x| x.method == RetrievalMethod::Sparse));
    }

    #[tokio::test]
    async fn test_failed_side_falls_back() {
        let r = retriever(Some(Arc::new(FailingStore(RetrievalMethod::Dense))), Some(sparse()));
        let outcome = r.retrieve("antiscia", 5, None, "en").await;
        assert!(outcome.degraded);
        assert_eq!(outcome.method, RetrievalMethod::Sparse);
        assert_eq!(outcome.results[0].source_id, "antiscia_001");
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let r = retriever(Some(Arc::new(SlowStore)), Some(sparse()));
        let outcome = r.retrieve("sect diurnal", 5, None, "en").await;
        assert!(outcome.degraded);
        assert!(outcome.failures[0].contains("timed out"));
        assert!(!outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_both_failing_is_empty_not_error() {
        let r = retriever(
            Some(Arc::new(FailingStore(RetrievalMethod::Dense))),
            Some(Arc::new(FailingStore(RetrievalMethod::Sparse))),
        );
        let outcome = r.retrieve("sect", 5, None, "en").await;
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.failures.len(), 2);
    }

    #[tokio::test]
    async fn test_forced_dense_retries_sibling() {
        let r = retriever(Some(Arc::new(FailingStore(RetrievalMethod::Dense))), Some(sparse()));
        let outcome = r
            .retrieve_with("profection", 5, None, "en", RetrievalMethod::Dense)
            .await;
        assert_eq!(outcome.method, RetrievalMethod::Sparse);
        assert!(outcome.degraded);
        assert!(!outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_search_by_topic() {
        let r = retriever(Some(dense().await), Some(sparse()));
        let outcome = r.search_by_topic("profection", 5).await;
        assert!(!outcome.results.is_empty());
        assert!(outcome.results.iter().all(|x| x.topic() == Some("profection")));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn fused_alpha_stays_in_bounds(query in "[a-zçğıöşü ]{1,80}", tr in any::<bool>()) {
            let outcome = tokio_test::block_on(async {
                let r = retriever(Some(dense().await), Some(sparse()));
                r.retrieve(&query, 5, None, if tr { "tr" } else { "en" }).await
            });
            if let Some(alpha) = outcome.alpha {
                prop_assert!((0.4..=0.85).contains(&alpha));
            }
            prop_assert!(outcome.results.len() <= 5);
        }
    }
}
