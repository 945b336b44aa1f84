//! Metrics and observability utilities
//!
//! Provides Prometheus metric descriptions with standardized naming
//! conventions, plus the rolling in-process store the degrade policy
//! reads from.

mod rolling;

pub use rolling::{percentile, MetricsSink, RollingMetrics};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all AstroRAG metrics
pub const METRICS_PREFIX: &str = "astrorag";

/// Rolling metric names shared between the pipeline and the degrade policy
pub mod names {
    pub const RAG_LATENCY: &str = "rag_latency";
    pub const COVERAGE_SCORE: &str = "coverage_score";
    pub const MULTI_HOP_SPENT: &str = "multi_hop_spent";
    pub const CITATION_ALIGNMENT: &str = "citation_alignment_score";
    pub const LLM_COST: &str = "llm_cost_per_answer_usd";
    pub const ROUTER_CONFIDENCE: &str = "llm_router_confidence_metric";
    pub const PROVIDER_LATENCY: &str = "llm_provider_latency";
    pub const PROVIDER_HEALTH: &str = "llm_provider_health_score";
    pub const DEGRADE_ACTIVE: &str = "rag_degrade_active";
}

/// Buckets for answer latency in milliseconds
pub const ANSWER_LATENCY_BUCKETS_MS: &[f64] = &[
    50.0,
    100.0,
    250.0,
    500.0,
    1000.0,
    1600.0, // default latency budget
    2300.0, // degrade threshold
    5000.0,
    10000.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_answers_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of answers served"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Latency of individual pipeline stages in seconds"
    );

    // Rolling pipeline metrics
    describe_histogram!(
        format!("{}_{}", METRICS_PREFIX, names::RAG_LATENCY),
        Unit::Milliseconds,
        "End-to-end answer latency in milliseconds"
    );

    describe_histogram!(
        format!("{}_{}", METRICS_PREFIX, names::COVERAGE_SCORE),
        "Evidence coverage score per answer"
    );

    describe_histogram!(
        format!("{}_{}", METRICS_PREFIX, names::MULTI_HOP_SPENT),
        Unit::Milliseconds,
        "Estimated milliseconds spent on multi-hop supplementation"
    );

    describe_histogram!(
        format!("{}_{}", METRICS_PREFIX, names::CITATION_ALIGNMENT),
        "Claim-to-citation alignment score per answer"
    );

    describe_histogram!(
        format!("{}_{}", METRICS_PREFIX, names::LLM_COST),
        "Generation cost per answer in USD"
    );

    describe_histogram!(
        format!("{}_{}", METRICS_PREFIX, names::ROUTER_CONFIDENCE),
        "Router confidence estimate per answer"
    );

    describe_histogram!(
        format!("{}_{}", METRICS_PREFIX, names::PROVIDER_LATENCY),
        Unit::Milliseconds,
        "Generation backend latency in milliseconds"
    );

    describe_histogram!(
        format!("{}_{}", METRICS_PREFIX, names::PROVIDER_HEALTH),
        "Health score of the backend that served the answer"
    );

    describe_gauge!(
        format!("{}_{}", METRICS_PREFIX, names::DEGRADE_ACTIVE),
        "1 when the degrade policy is active"
    );

    // Generation metrics
    describe_counter!(
        format!("{}_provider_attempts_total", METRICS_PREFIX),
        Unit::Count,
        "Generation attempts per backend and outcome"
    );

    describe_counter!(
        format!("{}_quality_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Answers replaced by the template fallback"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to time a pipeline stage
pub struct StageTimer {
    start: Instant,
    stage: &'static str,
}

impl StageTimer {
    /// Start timing a stage
    pub fn start(stage: &'static str) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    /// Record the stage duration and return it in milliseconds
    pub fn finish(self) -> f64 {
        let elapsed = self.start.elapsed();
        histogram!(
            format!("{}_stage_duration_seconds", METRICS_PREFIX),
            "stage" => self.stage
        )
        .record(elapsed.as_secs_f64());
        elapsed.as_secs_f64() * 1000.0
    }
}

/// Helper to record an answer
pub fn record_answer(mode: &str, cached: bool) {
    counter!(
        format!("{}_answers_total", METRICS_PREFIX),
        "mode" => mode.to_string(),
        "cached" => cached.to_string()
    )
    .increment(1);
}

/// Helper to record a generation attempt
pub fn record_provider_attempt(provider: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        format!("{}_provider_attempts_total", METRICS_PREFIX),
        "provider" => provider.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Helper to record a template fallback
pub fn record_quality_fallback() {
    counter!(format!("{}_quality_fallbacks_total", METRICS_PREFIX)).increment(1);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}
