//! Degrade policy
//!
//! A pure decision over the rolling metrics store. Nothing is kept between
//! requests except the samples themselves, so every call reflects the
//! current window.

use astrorag_common::config::DegradeConfig;
use astrorag_common::metrics::{names, percentile, MetricsSink};
use astrorag_search::RetrievalMethod;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Per-request retrieval overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expand_query: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_results: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_citations: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_method: Option<RetrievalMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_top_k: Option<usize>,
}

/// Per-request generation overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationOverrides {
    /// Skip the backend revision of the composed draft
    pub skip_revision: bool,
    /// Try the largest tier first
    #[serde(default)]
    pub force_upgrade: bool,
}

/// Observations and advisory flags
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DegradeFlags {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_p95_ms: Option<f64>,
    /// Samples seen while still below the minimum
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_samples: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_latest_usd: Option<f64>,
    pub skip_multi_hop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefer_small_delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ttl_factor: Option<f64>,
    /// Set by the pipeline when claim alignment breaches its threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation_alignment_score: Option<f64>,
}

/// Cost guardrail actions
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CostActions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefer_small_delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ttl_factor: Option<f64>,
}

/// Outcome of one policy evaluation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DegradeDecision {
    pub active: bool,
    pub reasons: Vec<String>,
    pub retrieval: RetrievalOverrides,
    pub generation: GenerationOverrides,
    pub flags: DegradeFlags,
    pub timeout_factor: f64,
    pub cost_actions: CostActions,
}

impl Default for DegradeDecision {
    fn default() -> Self {
        Self::inactive()
    }
}

impl DegradeDecision {
    pub fn inactive() -> Self {
        Self {
            active: false,
            reasons: Vec::new(),
            retrieval: RetrievalOverrides::default(),
            generation: GenerationOverrides::default(),
            flags: DegradeFlags::default(),
            timeout_factor: 1.0,
            cost_actions: CostActions::default(),
        }
    }

    /// Cache TTL after the cost guardrail; never shorter than the base
    pub fn cache_ttl(&self, base_secs: u64) -> u64 {
        match self.cost_actions.cache_ttl_factor {
            Some(factor) if factor > 1.0 => (base_secs as f64 * factor).round() as u64,
            _ => base_secs,
        }
    }

    /// Scale a timeout by the degrade multiplier
    pub fn scale_timeout(&self, base: Duration) -> Duration {
        base.mul_f64(self.timeout_factor.max(1.0))
    }
}

/// Evaluates the degrade policy against the rolling metrics
pub struct DegradePolicy {
    config: DegradeConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl DegradePolicy {
    pub fn new(config: DegradeConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { config, metrics }
    }

    /// Derive a fresh decision from the current metric windows
    pub fn evaluate(&self) -> DegradeDecision {
        let mut decision = DegradeDecision::inactive();
        if !self.config.enabled {
            self.metrics.set_gauge(names::DEGRADE_ACTIVE, 0.0);
            return decision;
        }

        let latencies = self.metrics.get_metric_values(
            names::RAG_LATENCY,
            Duration::from_secs(self.config.latency_window_secs),
        );
        if latencies.len() >= self.config.min_samples {
            let p95 = percentile(&latencies, 95.0).unwrap_or(0.0);
            decision.flags.latency_p95_ms = Some((p95 * 100.0).round() / 100.0);
            if p95 >= self.config.latency_threshold_ms {
                decision
                    .reasons
                    .push(format!("rag_latency_p95>{}ms", self.config.latency_threshold_ms));
                decision.retrieval.top_k = Some(self.config.low_top_k.max(2));
                decision.retrieval.expand_query = Some(false);
                decision.retrieval.rerank_results = Some(false);
                decision.retrieval.include_citations = Some(true);
                decision.retrieval.retrieval_method = Some(RetrievalMethod::Dense);
                decision.generation.skip_revision = true;
                decision.flags.skip_multi_hop = true;
                decision.timeout_factor = self.config.timeout_factor.max(1.0);
            }
        } else {
            decision.flags.latency_samples = Some(latencies.len());
        }

        let costs = self.metrics.get_metric_values(
            names::LLM_COST,
            Duration::from_secs(self.config.cost_window_secs),
        );
        if let Some(&latest) = costs.last() {
            decision.flags.cost_latest_usd = Some((latest * 10_000.0).round() / 10_000.0);
            if latest > self.config.cost_cap_usd {
                decision
                    .reasons
                    .push(format!("cost_per_answer>{}", self.config.cost_cap_usd));
                if self.config.rerank_top_k > 0 {
                    decision.retrieval.rerank_top_k = Some(self.config.rerank_top_k);
                    decision.cost_actions.rerank_top_k = Some(self.config.rerank_top_k);
                }
                if self.config.prefer_small_delta > 0.0 {
                    decision.flags.prefer_small_delta = Some(self.config.prefer_small_delta);
                    decision.cost_actions.prefer_small_delta = Some(self.config.prefer_small_delta);
                }
                if self.config.cache_ttl_factor > 1.0 {
                    decision.flags.cache_ttl_factor = Some(self.config.cache_ttl_factor);
                    decision.cost_actions.cache_ttl_factor = Some(self.config.cache_ttl_factor);
                }
            }
        }

        decision.active = !decision.reasons.is_empty();
        if decision.active {
            warn!(reasons = ?decision.reasons, "Degrade mode active");
        }
        self.metrics
            .set_gauge(names::DEGRADE_ACTIVE, if decision.active { 1.0 } else { 0.0 });
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astrorag_common::RollingMetrics;

    fn policy(metrics: Arc<RollingMetrics>) -> DegradePolicy {
        DegradePolicy::new(DegradeConfig::default(), metrics)
    }

    #[test]
    fn test_inactive_without_enough_samples() {
        let metrics = Arc::new(RollingMetrics::default());
        for _ in 0..5 {
            metrics.record_histogram(names::RAG_LATENCY, 9000.0);
        }
        let decision = policy(metrics.clone()).evaluate();
        assert!(!decision.active);
        assert_eq!(decision.flags.latency_samples, Some(5));
        assert_eq!(metrics.gauge_value(names::DEGRADE_ACTIVE), Some(0.0));
    }

    #[test]
    fn test_latency_activation_is_monotonic() {
        let metrics = Arc::new(RollingMetrics::default());
        for _ in 0..25 {
            metrics.record_histogram(names::RAG_LATENCY, 3000.0);
        }
        let decision = policy(metrics.clone()).evaluate();
        assert!(decision.active);
        assert_eq!(decision.retrieval.top_k, Some(5));
        assert_eq!(decision.retrieval.expand_query, Some(false));
        assert_eq!(decision.retrieval.rerank_results, Some(false));
        assert_eq!(decision.retrieval.retrieval_method, Some(RetrievalMethod::Dense));
        assert!(decision.flags.skip_multi_hop);
        assert!(decision.generation.skip_revision);
        assert!((decision.timeout_factor - 1.1).abs() < 1e-9);
        assert_eq!(metrics.gauge_value(names::DEGRADE_ACTIVE), Some(1.0));

        metrics.clear(names::RAG_LATENCY);
        assert!(!policy(metrics.clone()).evaluate().active);

        for _ in 0..25 {
            metrics.record_histogram(names::RAG_LATENCY, 400.0);
        }
        let calm = policy(metrics.clone()).evaluate();
        assert!(!calm.active);
        assert_eq!(calm.flags.latency_p95_ms, Some(400.0));
        assert!((calm.timeout_factor - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cost_guardrail() {
        let metrics = Arc::new(RollingMetrics::default());
        metrics.record_histogram(names::LLM_COST, 0.002);
        metrics.record_histogram(names::LLM_COST, 0.05);
        let decision = policy(metrics).evaluate();
        assert!(decision.active);
        assert_eq!(decision.reasons, vec!["cost_per_answer>0.01".to_string()]);
        assert_eq!(decision.cost_actions.rerank_top_k, Some(8));
        assert_eq!(decision.cost_actions.prefer_small_delta, Some(0.2));
        assert_eq!(decision.cache_ttl(1000), 1500);
        // cost alone does not touch retrieval depth
        assert_eq!(decision.retrieval.top_k, None);
    }

    #[test]
    fn test_ttl_never_shrinks() {
        let mut decision = DegradeDecision::inactive();
        decision.cost_actions.cache_ttl_factor = Some(0.5);
        assert_eq!(decision.cache_ttl(600), 600);
    }

    #[test]
    fn test_disabled() {
        let metrics = Arc::new(RollingMetrics::default());
        for _ in 0..25 {
            metrics.record_histogram(names::RAG_LATENCY, 9000.0);
        }
        let config = DegradeConfig {
            enabled: false,
            ..DegradeConfig::default()
        };
        assert!(!DegradePolicy::new(config, metrics).evaluate().active);
    }
}
