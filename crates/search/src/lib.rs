//! AstroRAG Search
//!
//! Retrieval building blocks for the answer pipeline:
//! - Dense (embedding) and sparse (lexical) stores behind one trait
//! - Hybrid retrieval with per-query min-max score fusion
//! - Rule-based + lexical reranking
//! - Citation building with locator fallbacks

pub mod citation;
pub mod corpus;
pub mod rerank;
pub mod retrieval;

pub use citation::{ensure_paragraph_coverage, CitationBuilder, CitationEntry};
pub use rerank::{rerank_stats, RerankContext, RerankStats, Reranker, RerankingResult};
pub use retrieval::{
    AlphaPicker, Filters, HybridRetriever, RetrievalMethod, RetrievalOutcome, RetrievalResult,
    SearchStore,
};
