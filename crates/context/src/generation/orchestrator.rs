//! Generation orchestrator
//!
//! Per call: classify intent, estimate confidence, pick a tier ladder, then
//! walk it provider by provider until one backend answers. Exhaustion is not
//! an error here; the caller keeps its draft.

use super::health::ProviderHealthMonitor;
use super::pool::ProviderPool;
use super::prompt::{PromptBuilder, PromptContext, ToneAdapter};
use super::repair::{repair_output, validate_payload};
use super::routing::{
    ConfidenceEstimator, ConfidenceLevel, IntentClass, IntentClassifier, ModelSelector, ModelTier,
};
use super::{extract_cost_usd, GenerationRequest};
use crate::coverage::CoverageReport;
use crate::degrade::DegradeDecision;
use astrorag_common::config::RouterConfig;
use astrorag_common::metrics::{names, record_provider_attempt, MetricsSink};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Inputs for one revision call
pub struct RevisionInput<'a> {
    pub query: &'a str,
    pub max_latency_ms: u64,
    pub max_tokens: u32,
    pub coverage: &'a CoverageReport,
    pub doc_scores: &'a [f64],
    pub citation_count: usize,
    pub topic_count: usize,
    pub degrade: &'a DegradeDecision,
    pub prompt: PromptContext<'a>,
}

/// Routing snapshot surfaced in the debug block
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub classification: IntentClass,
    pub confidence_level: ConfidenceLevel,
    pub confidence_score: f64,
    pub tiers: Vec<ModelTier>,
    pub model: Option<String>,
    pub provider: Option<String>,
    /// Failed attempts as `provider@tier`
    pub fallbacks: Vec<String>,
    pub attempts: usize,
    pub latency_ms: Option<f64>,
    pub lora: Option<String>,
    pub validation_error: Option<String>,
    pub health_snapshot: Map<String, Value>,
    pub degrade_active: bool,
    pub force_upgrade: bool,
}

/// Successful generation
#[derive(Debug, Clone)]
pub struct RoutingOutcome {
    pub provider: String,
    pub tier: ModelTier,
    pub model: String,
    pub payload: Value,
    pub validation_error: Option<String>,
    pub tokens_used: u64,
    pub cost_usd: Option<f64>,
    pub latency_ms: f64,
}

pub struct GenerationOrchestrator {
    pool: Arc<ProviderPool>,
    health: Arc<ProviderHealthMonitor>,
    selector: ModelSelector,
    classifier: IntentClassifier,
    estimator: ConfidenceEstimator,
    prompts: PromptBuilder,
    tone: ToneAdapter,
    metrics: Arc<dyn MetricsSink>,
}

impl GenerationOrchestrator {
    pub fn new(
        config: &RouterConfig,
        pool: Arc<ProviderPool>,
        health: Arc<ProviderHealthMonitor>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let selector = ModelSelector::from_config(config, &pool.names());
        Self {
            pool,
            health,
            selector,
            classifier: IntentClassifier::new(config.policy_keyword_list()),
            estimator: ConfidenceEstimator::new(config.low_confidence, config.high_confidence),
            prompts: PromptBuilder::new(),
            tone: ToneAdapter::new(config.lora_enabled),
            metrics,
        }
    }

    pub fn health(&self) -> &ProviderHealthMonitor {
        &self.health
    }

    pub fn pool(&self) -> &ProviderPool {
        &self.pool
    }

    fn tier_ladder(&self, class: IntentClass, level: ConfidenceLevel, degrade: &DegradeDecision) -> Vec<ModelTier> {
        let mut tiers = self.selector.tier_order(class, level, degrade.active);
        if degrade.generation.force_upgrade {
            tiers.retain(|t| *t != ModelTier::Large);
            tiers.insert(0, ModelTier::Large);
        }
        tiers
    }

    /// Route and run one revision; `None` outcome when every provider failed
    pub async fn revise(&self, input: &RevisionInput<'_>) -> (RoutingDecision, Option<RoutingOutcome>) {
        let class = self.classifier.classify(
            input.query,
            input.max_latency_ms,
            input.coverage.passed,
            input.topic_count,
        );
        let score = self.estimator.estimate(
            input.coverage.score,
            input.doc_scores,
            input.citation_count,
            input.topic_count,
            input.coverage.passed,
        );
        let bias = input.degrade.cost_actions.prefer_small_delta.unwrap_or(0.0);
        let level = self.estimator.level((score + bias).min(1.0));
        self.metrics.record_histogram(names::ROUTER_CONFIDENCE, score);

        let tiers = self.tier_ladder(class, level, input.degrade);
        let lora = self.tone.prefix(class);
        let messages = self.prompts.messages(&input.prompt, lora);

        let mut decision = RoutingDecision {
            classification: class,
            confidence_level: level,
            confidence_score: (score * 1000.0).round() / 1000.0,
            tiers: tiers.clone(),
            model: None,
            provider: None,
            fallbacks: Vec::new(),
            attempts: 0,
            latency_ms: None,
            lora: lora.map(str::to_string),
            validation_error: None,
            health_snapshot: Map::new(),
            degrade_active: input.degrade.active,
            force_upgrade: input.degrade.generation.force_upgrade,
        };

        let mut outcome = None;
        'ladder: for tier in tiers {
            let Some(profile) = self.selector.profile(tier) else {
                continue;
            };
            let mut tried: Vec<String> = Vec::new();

            while let Some(provider) =
                self.selector
                    .choose_provider(tier, &self.health, &self.pool.available(), &tried)
            {
                tried.push(provider.clone());
                decision.attempts += 1;

                let request = GenerationRequest {
                    messages: messages.clone(),
                    model: profile.model.clone(),
                    json_mode: true,
                    max_tokens: input.max_tokens,
                    timeout: input.degrade.scale_timeout(profile.timeout),
                };

                let started = Instant::now();
                match self.pool.generate_with(&provider, &request).await {
                    Ok(response) => {
                        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                        self.health.record_success(&provider, latency_ms);
                        record_provider_attempt(&provider, true);
                        self.metrics.record_histogram(names::PROVIDER_LATENCY, latency_ms);
                        self.metrics
                            .record_histogram(names::PROVIDER_HEALTH, self.health.score(&provider));

                        let cost_usd = extract_cost_usd(&response.raw);
                        if let Some(cost) = cost_usd {
                            self.metrics.record_histogram(names::LLM_COST, cost);
                        }

                        let repaired = repair_output(&response.content);
                        let validation_error = match validate_payload(&repaired.value) {
                            Ok(_) => repaired.repair_note,
                            Err(e) => {
                                warn!(provider = %provider, error = %e, "Backend output failed validation");
                                Some(e.to_string())
                            }
                        };

                        info!(
                            provider = %provider,
                            tier = tier.as_str(),
                            latency_ms,
                            tokens = response.tokens_used,
                            "Generation succeeded"
                        );

                        decision.model = Some(profile.model.clone());
                        decision.provider = Some(provider.clone());
                        decision.latency_ms = Some(latency_ms);
                        decision.validation_error = validation_error.clone();

                        outcome = Some(RoutingOutcome {
                            provider,
                            tier,
                            model: profile.model.clone(),
                            payload: repaired.value,
                            validation_error,
                            tokens_used: response.tokens_used,
                            cost_usd,
                            latency_ms,
                        });
                        break 'ladder;
                    }
                    Err(e) => {
                        self.health.record_failure(&provider);
                        record_provider_attempt(&provider, false);
                        warn!(provider = %provider, tier = tier.as_str(), error = %e, "Generation attempt failed");
                        decision.fallbacks.push(format!("{}@{}", provider, tier.as_str()));
                    }
                }
            }
        }

        if outcome.is_none() {
            warn!(attempts = decision.attempts, "Generation ladder exhausted, keeping draft");
        }
        decision.health_snapshot = self.health.snapshot();
        (decision, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::prompt::Style;
    use crate::generation::{ProviderEntry, ScriptStep, ScriptedBackend};
    use astrorag_common::metrics::RollingMetrics;
    use serde_json::json;
    use std::time::Duration;

    fn coverage(passed: bool) -> CoverageReport {
        CoverageReport {
            passed,
            score: if passed { 1.0 } else { 0.0 },
            issues: vec![],
            schools: vec!["classical".into()],
            topics: vec![],
            required_topic: None,
        }
    }

    fn orchestrator(backends: Vec<(&str, Arc<ScriptedBackend>)>) -> GenerationOrchestrator {
        let entries = backends
            .into_iter()
            .map(|(name, b)| ProviderEntry::new(name, Duration::from_secs(90), b))
            .collect();
        GenerationOrchestrator::new(
            &RouterConfig::default(),
            Arc::new(ProviderPool::new(entries)),
            Arc::new(ProviderHealthMonitor::new()),
            Arc::new(RollingMetrics::default()),
        )
    }

    async fn run(orch: &GenerationOrchestrator, degrade: &DegradeDecision) -> (RoutingDecision, Option<RoutingOutcome>) {
        let draft = json!({"answer": {"general_profile": "Draft text."}, "citations": []});
        let report = coverage(true);
        let input = RevisionInput {
            query: "What does my Sun in Leo mean?",
            max_latency_ms: 1600,
            max_tokens: 1000,
            coverage: &report,
            doc_scores: &[0.9, 0.8],
            citation_count: 3,
            topic_count: 2,
            degrade,
            prompt: PromptContext {
                mode: "natal",
                language: "en",
                style: Style::Accessible,
                coverage_score: 1.0,
                coverage_passed: true,
                summary: "Sun in Leo",
                conflicts: &[],
                draft: &draft,
            },
        };
        orch.revise(&input).await
    }

    #[tokio::test]
    async fn test_echo_backend_returns_draft() {
        let backend = Arc::new(ScriptedBackend::echo("primary"));
        let orch = orchestrator(vec![("primary", backend.clone())]);
        let (decision, outcome) = run(&orch, &DegradeDecision::inactive()).await;

        let outcome = outcome.unwrap();
        assert_eq!(outcome.payload["answer"]["general_profile"], "Draft text.");
        assert!(outcome.validation_error.is_none());
        assert_eq!(decision.provider.as_deref(), Some("primary"));
        assert_eq!(decision.classification, IntentClass::Simple);
        assert_eq!(decision.tiers[0], ModelTier::Small);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_failover_to_second_provider() {
        let primary = Arc::new(ScriptedBackend::failing("primary"));
        let fallback = Arc::new(ScriptedBackend::echo("fallback"));
        let orch = orchestrator(vec![("primary", primary.clone()), ("fallback", fallback.clone())]);
        let (decision, outcome) = run(&orch, &DegradeDecision::inactive()).await;

        assert_eq!(outcome.unwrap().provider, "fallback");
        assert_eq!(decision.fallbacks, vec!["primary@small".to_string()]);
        assert_eq!(decision.attempts, 2);
        assert!(orch.health().score("primary") < 1.0);
    }

    #[tokio::test]
    async fn test_exhaustion_yields_no_outcome() {
        let orch = orchestrator(vec![("primary", Arc::new(ScriptedBackend::failing("primary")))]);
        let (decision, outcome) = run(&orch, &DegradeDecision::inactive()).await;
        assert!(outcome.is_none());
        // the failed provider is cooling down, so later tiers find nothing
        assert_eq!(decision.attempts, 1);
        assert!(decision.provider.is_none());
    }

    #[tokio::test]
    async fn test_force_upgrade_puts_large_first() {
        let backend = Arc::new(ScriptedBackend::echo("primary"));
        let orch = orchestrator(vec![("primary", backend.clone())]);
        let mut degrade = DegradeDecision::inactive();
        degrade.generation.force_upgrade = true;
        let (decision, outcome) = run(&orch, &degrade).await;
        assert_eq!(decision.tiers[0], ModelTier::Large);
        let outcome = outcome.unwrap();
        assert_eq!(outcome.tier, ModelTier::Large);
        assert_eq!(outcome.model, "gpt-4o");
        assert_eq!(backend.models(), vec!["gpt-4o".to_string()]);
    }

    #[tokio::test]
    async fn test_tier_model_reaches_backend() {
        let backend = Arc::new(ScriptedBackend::echo("primary"));
        let orch = orchestrator(vec![("primary", backend.clone())]);
        let (decision, _) = run(&orch, &DegradeDecision::inactive()).await;
        assert_eq!(decision.tiers[0], ModelTier::Small);
        assert_eq!(decision.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(backend.models(), vec!["gpt-4o-mini".to_string()]);
    }

    #[tokio::test]
    async fn test_tier_provider_lists_route_requests() {
        let primary = Arc::new(ScriptedBackend::echo("primary_openai"));
        let fallback = Arc::new(ScriptedBackend::echo("fallback_openai"));
        let orch = orchestrator(vec![
            ("primary_openai", primary.clone()),
            ("fallback_openai", fallback.clone()),
        ]);

        let (decision, _) = run(&orch, &DegradeDecision::inactive()).await;
        assert_eq!(decision.provider.as_deref(), Some("primary_openai"));

        let mut degrade = DegradeDecision::inactive();
        degrade.generation.force_upgrade = true;
        let (decision, _) = run(&orch, &degrade).await;
        assert_eq!(decision.provider.as_deref(), Some("fallback_openai"));
        assert_eq!(fallback.models(), vec!["gpt-4o".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_output_flagged_not_raised() {
        let backend = Arc::new(ScriptedBackend::new(
            "primary",
            vec![ScriptStep::Reply("not json at all".into())],
        ));
        let orch = orchestrator(vec![("primary", backend)]);
        let (decision, outcome) = run(&orch, &DegradeDecision::inactive()).await;
        let outcome = outcome.unwrap();
        assert_eq!(outcome.validation_error.as_deref(), Some("invalid_json"));
        assert_eq!(outcome.payload["limits"]["hallucination_risk"], "high");
        assert_eq!(decision.validation_error.as_deref(), Some("invalid_json"));
    }
}
