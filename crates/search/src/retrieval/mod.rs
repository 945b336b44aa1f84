//! Hybrid retrieval system
//!
//! Provides:
//! - Dense search (cosine similarity over embeddings)
//! - Sparse search (lexical term-frequency scoring)
//! - Hybrid search (min-max normalized, per-query weighted fusion)

mod alpha;
mod dense;
mod fusion;
mod hybrid;
mod sparse;

pub use alpha::AlphaPicker;
pub use dense::InMemoryDenseStore;
pub use fusion::{fuse, min_max_normalize};
pub use hybrid::{HybridRetriever, RetrievalOutcome};
pub use sparse::InMemorySparseStore;

use astrorag_common::errors::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form document metadata
pub type Metadata = Map<String, Value>;

/// Retrieval filters; a list value matches when any element is contained in the field
pub type Filters = Map<String, Value>;

/// Retrieval method
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// Embedding similarity search
    Dense,
    /// Lexical search
    Sparse,
    /// Fused dense + sparse
    Hybrid,
    /// Knowledge-graph connector hop
    Kg,
    /// Tabular summarizer hop
    Sql,
}

impl RetrievalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::Dense => "dense",
            RetrievalMethod::Sparse => "sparse",
            RetrievalMethod::Hybrid => "hybrid",
            RetrievalMethod::Kg => "kg",
            RetrievalMethod::Sql => "sql",
        }
    }

    /// Parse an override value; unknown values map to hybrid
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "dense" => RetrievalMethod::Dense,
            "sparse" | "bm25" => RetrievalMethod::Sparse,
            _ => RetrievalMethod::Hybrid,
        }
    }
}

/// Single retrieval result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    /// Document content
    pub content: String,

    /// Method-local relevance score
    pub score: f64,

    /// Stable document identifier
    pub source_id: String,

    /// Method that produced the score
    pub method: RetrievalMethod,

    /// Topic, school, source, language, tags and locator fields
    #[serde(default)]
    pub metadata: Metadata,
}

impl RetrievalResult {
    /// String metadata value
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Non-negative integer metadata value
    pub fn meta_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(Value::as_u64)
    }

    pub fn topic(&self) -> Option<&str> {
        self.meta_str("topic")
    }

    pub fn school(&self) -> Option<&str> {
        self.meta_str("school")
    }

    pub fn language(&self) -> Option<&str> {
        self.meta_str("language")
    }
}

/// A stored document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Common trait for dense and sparse backends
#[async_trait::async_trait]
pub trait SearchStore: Send + Sync {
    /// Ranked results for the query, best first
    async fn search(&self, query: &str, top_k: usize, filters: Option<&Filters>) -> Result<Vec<RetrievalResult>>;

    /// Method whose scores this store produces
    fn method(&self) -> RetrievalMethod;
}

/// Check document metadata against filters
pub fn matches_filters(metadata: &Metadata, filters: &Filters) -> bool {
    filters.iter().all(|(key, wanted)| {
        let Some(actual) = metadata.get(key) else {
            return false;
        };
        match wanted {
            Value::Array(options) => options.iter().any(|option| contains(actual, option)),
            other => actual == other,
        }
    })
}

fn contains(actual: &Value, option: &Value) -> bool {
    match (actual, option) {
        (Value::Array(items), _) => items.contains(option),
        (Value::String(text), Value::String(needle)) => text.contains(needle.as_str()),
        _ => actual == option,
    }
}
