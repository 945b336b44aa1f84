//! Configuration management for AstroRAG services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Redis configuration (optional backing store for the response cache)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Response cache configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Embedding configuration for the dense store
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Retrieval, fusion and multi-hop configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Degrade policy thresholds
    #[serde(default)]
    pub degrade: DegradeConfig,

    /// Generation routing configuration
    #[serde(default)]
    pub router: RouterConfig,

    /// Generation backends
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    /// Answer quality floors
    #[serde(default)]
    pub quality: QualityConfig,

    /// Claim alignment configuration
    #[serde(default)]
    pub alignment: AlignmentConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL; the response cache stays in memory when unset
    pub url: Option<String>,

    /// Operation timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Backend: memory, redis
    #[serde(default = "default_cache_backend")]
    pub backend: String,

    /// Base TTL in seconds for cached answers
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Maximum in-memory entries
    #[serde(default = "default_cache_capacity")]
    pub max_entries: u64,

    /// Key prefix for namespacing
    #[serde(default = "default_cache_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: hashing, openai
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Default number of documents kept after reranking
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Per-store timeout in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Fusion weight base for English queries
    #[serde(default = "default_alpha_en")]
    pub alpha_base_en: f64,

    /// Fusion weight base for Turkish queries
    #[serde(default = "default_alpha_tr")]
    pub alpha_base_tr: f64,

    /// Lower bound of the fusion weight
    #[serde(default = "default_alpha_min")]
    pub alpha_min: f64,

    /// Upper bound of the fusion weight
    #[serde(default = "default_alpha_max")]
    pub alpha_max: f64,

    /// Coverage score required to pass the gate
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,

    /// Hard cap on multi-hop time in milliseconds
    #[serde(default = "default_hop_budget_cap")]
    pub hop_budget_cap_ms: u64,

    /// Estimated cost of one hop in milliseconds
    #[serde(default = "default_hop_cost")]
    pub hop_cost_ms: u64,

    /// Maximum query expansions
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DegradeConfig {
    /// Enable the degrade policy
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// p95 retrieval latency that activates degrade mode
    #[serde(default = "default_latency_threshold")]
    pub latency_threshold_ms: f64,

    /// Samples required before the latency rule applies
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Latency window in seconds
    #[serde(default = "default_latency_window")]
    pub latency_window_secs: u64,

    /// Floor for retrieval top_k under degrade
    #[serde(default = "default_low_top_k")]
    pub low_top_k: usize,

    /// Timeout multiplier under degrade
    #[serde(default = "default_timeout_factor")]
    pub timeout_factor: f64,

    /// Per-answer cost cap in USD
    #[serde(default = "default_cost_cap")]
    pub cost_cap_usd: f64,

    /// Cost window in seconds
    #[serde(default = "default_cost_window")]
    pub cost_window_secs: u64,

    /// Reranker candidate pool under cost pressure
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,

    /// Bias toward the cheapest tier under cost pressure
    #[serde(default = "default_prefer_small_delta")]
    pub prefer_small_delta: f64,

    /// Cache TTL multiplier under cost pressure
    #[serde(default = "default_cache_ttl_factor")]
    pub cache_ttl_factor: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Confidence below this is "low"
    #[serde(default = "default_low_threshold")]
    pub low_confidence: f64,

    /// Confidence at or above this is "high"
    #[serde(default = "default_high_threshold")]
    pub high_confidence: f64,

    /// Minimum provider health for selection
    #[serde(default = "default_health_floor")]
    pub health_floor: f64,

    /// Small tier timeout in milliseconds
    #[serde(default = "default_small_timeout")]
    pub small_timeout_ms: u64,

    /// Medium tier timeout in milliseconds
    #[serde(default = "default_medium_timeout")]
    pub medium_timeout_ms: u64,

    /// Large tier timeout in milliseconds
    #[serde(default = "default_large_timeout")]
    pub large_timeout_ms: u64,

    /// Comma separated policy-sensitive keywords
    #[serde(default = "default_policy_keywords")]
    pub policy_keywords: String,

    /// Prefix prompts with the tone adapter
    #[serde(default = "default_enabled")]
    pub lora_enabled: bool,

    /// Small tier model
    #[serde(default = "default_llm_model")]
    pub small_model: String,

    /// Medium tier model
    #[serde(default = "default_llm_model")]
    pub medium_model: String,

    /// Large tier model
    #[serde(default = "default_large_model")]
    pub large_model: String,

    /// Comma separated provider names tried for the small tier
    #[serde(default = "default_small_providers")]
    pub small_providers: String,

    /// Comma separated provider names tried for the medium tier
    #[serde(default = "default_small_providers")]
    pub medium_providers: String,

    /// Comma separated provider names tried for the large tier
    #[serde(default = "default_large_providers")]
    pub large_providers: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Backend name used in routing tables
    pub name: String,

    /// Backend kind: openai, scripted
    #[serde(default = "default_provider_kind")]
    pub kind: String,

    /// API base URL for OpenAI-compatible endpoints
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,

    /// API key
    pub api_key: Option<String>,

    /// Cooldown after a failure in seconds
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QualityConfig {
    #[serde(default = "default_min_chars")]
    pub min_general_chars: usize,
    #[serde(default = "default_min_sentences")]
    pub min_sentences: usize,
    #[serde(default = "default_one")]
    pub min_signal_terms: usize,
    #[serde(default = "default_one")]
    pub min_strengths: usize,
    #[serde(default = "default_one")]
    pub min_watchouts: usize,
    #[serde(default = "default_one")]
    pub min_citations: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlignmentConfig {
    /// Claim score that counts as supported
    #[serde(default = "default_support_threshold")]
    pub support_threshold: f64,

    /// Alignment or supported ratio below this requests an upgrade
    #[serde(default = "default_breach_threshold")]
    pub breach_threshold: f64,

    /// Sliding window size in characters
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Sliding window step in characters
    #[serde(default = "default_window_step")]
    pub window_step: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_enabled")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Samples kept per rolling metric
    #[serde(default = "default_rolling_capacity")]
    pub rolling_capacity: usize,

    /// Maximum sample age in seconds
    #[serde(default = "default_rolling_retention")]
    pub rolling_retention_secs: u64,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_concurrent() -> usize { 100 }
fn default_redis_timeout_ms() -> u64 { 250 }
fn default_cache_backend() -> String { "memory".to_string() }
fn default_cache_ttl() -> u64 { 604_800 }
fn default_cache_capacity() -> u64 { 10_000 }
fn default_cache_prefix() -> String { "astrorag".to_string() }
fn default_embedding_provider() -> String { "hashing".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 256 }
fn default_embedding_timeout() -> u64 { 10 }
fn default_top_k() -> usize { 5 }
fn default_store_timeout_ms() -> u64 { 800 }
fn default_alpha_en() -> f64 { 0.65 }
fn default_alpha_tr() -> f64 { 0.55 }
fn default_alpha_min() -> f64 { 0.4 }
fn default_alpha_max() -> f64 { 0.85 }
fn default_coverage_threshold() -> f64 { 0.7 }
fn default_hop_budget_cap() -> u64 { 1500 }
fn default_hop_cost() -> u64 { 150 }
fn default_max_expansions() -> usize { 10 }
fn default_enabled() -> bool { true }
fn default_latency_threshold() -> f64 { 2300.0 }
fn default_min_samples() -> usize { 20 }
fn default_latency_window() -> u64 { 300 }
fn default_low_top_k() -> usize { 5 }
fn default_timeout_factor() -> f64 { 1.1 }
fn default_cost_cap() -> f64 { 0.01 }
fn default_cost_window() -> u64 { 900 }
fn default_rerank_top_k() -> usize { 8 }
fn default_prefer_small_delta() -> f64 { 0.2 }
fn default_cache_ttl_factor() -> f64 { 1.5 }
fn default_low_threshold() -> f64 { 0.55 }
fn default_high_threshold() -> f64 { 0.75 }
fn default_health_floor() -> f64 { 0.4 }
fn default_small_timeout() -> u64 { 1200 }
fn default_medium_timeout() -> u64 { 1600 }
fn default_large_timeout() -> u64 { 2200 }
fn default_policy_keywords() -> String { "medical,financial,privacy,confidential,legal,therapy".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_large_model() -> String { "gpt-4o".to_string() }
fn default_small_providers() -> String { "primary_openai,fallback_openai".to_string() }
fn default_large_providers() -> String { "fallback_openai,primary_openai".to_string() }
fn default_provider_kind() -> String { "openai".to_string() }
fn default_llm_api_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_cooldown() -> u64 { 90 }
fn default_min_chars() -> usize { 280 }
fn default_min_sentences() -> usize { 3 }
fn default_one() -> usize { 1 }
fn default_support_threshold() -> f64 { 0.6 }
fn default_breach_threshold() -> f64 { 0.75 }
fn default_window_size() -> usize { 420 }
fn default_window_step() -> usize { 160 }
fn default_log_level() -> String { "info".to_string() }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "astrorag".to_string() }
fn default_rolling_capacity() -> usize { 1000 }
fn default_rolling_retention() -> u64 { 3600 }

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::named("primary_openai", 90),
        ProviderConfig::named("fallback_openai", 180),
    ]
}

impl ProviderConfig {
    /// OpenAI-compatible provider with default endpoint and no key
    pub fn named(name: &str, cooldown_secs: u64) -> Self {
        Self {
            name: name.to_string(),
            kind: default_provider_kind(),
            api_base: default_llm_api_base(),
            api_key: None,
            cooldown_secs,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl RouterConfig {
    /// Parsed policy keyword list
    pub fn policy_keyword_list(&self) -> Vec<String> {
        split_list(&self.policy_keywords)
            .into_iter()
            .map(|k| k.to_lowercase())
            .collect()
    }

    /// Parsed provider preference for one tier ("small", "medium", "large")
    pub fn tier_providers(&self, tier: &str) -> Vec<String> {
        match tier {
            "small" => split_list(&self.small_providers),
            "medium" => split_list(&self.medium_providers),
            _ => split_list(&self.large_providers),
        }
    }

    pub fn tier_model(&self, tier: &str) -> &str {
        match tier {
            "small" => &self.small_model,
            "medium" => &self.medium_model,
            _ => &self.large_model,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // e.g., APP__DEGRADE__LATENCY_THRESHOLD_MS=2000
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Per-store retrieval timeout
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval.store_timeout_ms)
    }

    /// The response cache uses Redis only when both requested and configured
    pub fn uses_redis_cache(&self) -> bool {
        self.cache.backend == "redis" && self.redis.url.is_some()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            cache: CacheSettings::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            degrade: DegradeConfig::default(),
            router: RouterConfig::default(),
            providers: default_providers(),
            quality: QualityConfig::default(),
            alignment: AlignmentConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_capacity(),
            key_prefix: default_cache_prefix(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            store_timeout_ms: default_store_timeout_ms(),
            alpha_base_en: default_alpha_en(),
            alpha_base_tr: default_alpha_tr(),
            alpha_min: default_alpha_min(),
            alpha_max: default_alpha_max(),
            coverage_threshold: default_coverage_threshold(),
            hop_budget_cap_ms: default_hop_budget_cap(),
            hop_cost_ms: default_hop_cost(),
            max_expansions: default_max_expansions(),
        }
    }
}

impl Default for DegradeConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            latency_threshold_ms: default_latency_threshold(),
            min_samples: default_min_samples(),
            latency_window_secs: default_latency_window(),
            low_top_k: default_low_top_k(),
            timeout_factor: default_timeout_factor(),
            cost_cap_usd: default_cost_cap(),
            cost_window_secs: default_cost_window(),
            rerank_top_k: default_rerank_top_k(),
            prefer_small_delta: default_prefer_small_delta(),
            cache_ttl_factor: default_cache_ttl_factor(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            low_confidence: default_low_threshold(),
            high_confidence: default_high_threshold(),
            health_floor: default_health_floor(),
            small_timeout_ms: default_small_timeout(),
            medium_timeout_ms: default_medium_timeout(),
            large_timeout_ms: default_large_timeout(),
            policy_keywords: default_policy_keywords(),
            lora_enabled: default_enabled(),
            small_model: default_llm_model(),
            medium_model: default_llm_model(),
            large_model: default_large_model(),
            small_providers: default_small_providers(),
            medium_providers: default_small_providers(),
            large_providers: default_large_providers(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_general_chars: default_min_chars(),
            min_sentences: default_min_sentences(),
            min_signal_terms: default_one(),
            min_strengths: default_one(),
            min_watchouts: default_one(),
            min_citations: default_one(),
        }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            support_threshold: default_support_threshold(),
            breach_threshold: default_breach_threshold(),
            window_size: default_window_size(),
            window_step: default_window_step(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_enabled(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
            rolling_capacity: default_rolling_capacity(),
            rolling_retention_secs: default_rolling_retention(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.cache.ttl_secs, 604_800);
        assert_eq!(config.retrieval.hop_budget_cap_ms, 1500);
        assert!((config.degrade.latency_threshold_ms - 2300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_providers() {
        let providers = default_providers();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].name, "primary_openai");
        assert_eq!(providers[1].cooldown(), Duration::from_secs(180));
    }

    #[test]
    fn test_policy_keywords_parsed() {
        let router = RouterConfig {
            policy_keywords: " Medical, legal ,,therapy".to_string(),
            ..RouterConfig::default()
        };
        assert_eq!(router.policy_keyword_list(), vec!["medical", "legal", "therapy"]);
    }

    #[test]
    fn test_tiers_have_their_own_models_and_providers() {
        let router = RouterConfig::default();
        assert_eq!(router.tier_model("small"), "gpt-4o-mini");
        assert_eq!(router.tier_model("large"), "gpt-4o");
        assert_eq!(router.tier_providers("small")[0], "primary_openai");
        assert_eq!(router.tier_providers("large")[0], "fallback_openai");
    }

    #[test]
    fn test_redis_cache_requires_url() {
        let mut config = AppConfig::default();
        config.cache.backend = "redis".to_string();
        assert!(!config.uses_redis_cache());
        config.redis.url = Some("redis://localhost:6379".to_string());
        assert!(config.uses_redis_cache());
    }
}
