//! AstroRAG Common Library
//!
//! Shared code for the AstroRAG crates including:
//! - Error types and handling
//! - Configuration management
//! - Metrics and the rolling observability store
//! - Redis cache client
//! - Embedding abstraction
//! - Text sanitization and tokenization

pub mod cache;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod text;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use metrics::{MetricsSink, RollingMetrics};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
