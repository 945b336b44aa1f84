//! Dense retrieval over an in-memory embedding index

use super::{matches_filters, Document, Filters, RetrievalMethod, RetrievalResult, SearchStore};
use astrorag_common::embeddings::{cosine_similarity, Embedder};
use astrorag_common::errors::Result;
use std::sync::Arc;
use tokio::sync::RwLock;

struct Indexed {
    document: Document,
    vector: Vec<f32>,
}

/// Dense store keeping document vectors in memory
pub struct InMemoryDenseStore {
    embedder: Arc<dyn Embedder>,
    index: RwLock<Vec<Indexed>>,
}

impl InMemoryDenseStore {
    /// Create an empty store
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            index: RwLock::new(Vec::new()),
        }
    }

    /// Create a store and index the given documents
    pub async fn with_documents(embedder: Arc<dyn Embedder>, documents: Vec<Document>) -> Result<Self> {
        let store = Self::new(embedder);
        store.add_documents(documents).await?;
        Ok(store)
    }

    /// Embed and index documents
    pub async fn add_documents(&self, documents: Vec<Document>) -> Result<usize> {
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let mut index = self.index.write().await;
        let added = documents.len();
        index.extend(
            documents
                .into_iter()
                .zip(vectors)
                .map(|(document, vector)| Indexed { document, vector }),
        );
        tracing::debug!(added, model = self.embedder.model_name(), "Dense index updated");
        Ok(added)
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }
}

#[async_trait::async_trait]
impl SearchStore for InMemoryDenseStore {
    async fn search(&self, query: &str, top_k: usize, filters: Option<&Filters>) -> Result<Vec<RetrievalResult>> {
        let query_vector = self.embedder.embed(query).await?;
        let index = self.index.read().await;

        let mut results: Vec<RetrievalResult> = index
            .iter()
            .filter(|entry| filters.map_or(true, |f| matches_filters(&entry.document.metadata, f)))
            .map(|entry| RetrievalResult {
                content: entry.document.content.clone(),
                score: cosine_similarity(&query_vector, &entry.vector) as f64,
                source_id: entry.document.id.clone(),
                method: RetrievalMethod::Dense,
                metadata: entry.document.metadata.clone(),
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }

    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Dense
    }
}
