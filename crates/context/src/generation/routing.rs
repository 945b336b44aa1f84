//! Intent classification, confidence estimation and tier selection

use super::health::ProviderHealthMonitor;
use astrorag_common::config::RouterConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SIMPLE_LATENCY_MS: u64 = 900;
const COMPLEX_QUERY_CHARS: usize = 220;
const COMPLEX_TOPIC_COUNT: usize = 4;

/// Coarse request intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentClass {
    PolicyRisk,
    Simple,
    Complex,
}

impl IntentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentClass::PolicyRisk => "policy_risk",
            IntentClass::Simple => "simple",
            IntentClass::Complex => "complex",
        }
    }
}

pub struct IntentClassifier {
    policy_keywords: Vec<String>,
}

impl IntentClassifier {
    pub fn new(policy_keywords: Vec<String>) -> Self {
        Self { policy_keywords }
    }

    pub fn classify(&self, query: &str, max_latency_ms: u64, coverage_passed: bool, topic_count: usize) -> IntentClass {
        let lowered = query.to_lowercase();
        if self.policy_keywords.iter().any(|k| lowered.contains(k.as_str())) {
            return IntentClass::PolicyRisk;
        }
        if max_latency_ms <= SIMPLE_LATENCY_MS {
            return IntentClass::Simple;
        }
        if query.chars().count() > COMPLEX_QUERY_CHARS || query.matches('?').count() > 1 {
            return IntentClass::Complex;
        }
        if !coverage_passed || topic_count >= COMPLEX_TOPIC_COUNT {
            return IntentClass::Complex;
        }
        IntentClass::Simple
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

pub struct ConfidenceEstimator {
    low: f64,
    high: f64,
}

impl ConfidenceEstimator {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Weighted blend of coverage, document scores, citation count and topic spread
    pub fn estimate(
        &self,
        coverage_score: f64,
        doc_scores: &[f64],
        citation_count: usize,
        topic_count: usize,
        coverage_passed: bool,
    ) -> f64 {
        let mean_doc = if doc_scores.is_empty() {
            0.0
        } else {
            doc_scores.iter().sum::<f64>() / doc_scores.len() as f64
        };
        let mut score = coverage_score * 0.45
            + mean_doc.min(1.0) * 0.25
            + (citation_count.min(5) as f64 / 5.0) * 0.2
            + (topic_count as f64 / 4.0).min(0.2);
        if coverage_passed {
            score += 0.15;
        }
        score.clamp(0.0, 1.0)
    }

    pub fn level(&self, score: f64) -> ConfidenceLevel {
        if score < self.low {
            ConfidenceLevel::Low
        } else if score < self.high {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::High
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Small,
    Medium,
    Large,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Small => "small",
            ModelTier::Medium => "medium",
            ModelTier::Large => "large",
        }
    }
}

/// Static description of one model tier
#[derive(Debug, Clone, Serialize)]
pub struct ModelProfile {
    pub tier: ModelTier,
    pub display_name: String,
    pub model: String,
    /// Provider names in preference order
    pub candidates: Vec<String>,
    pub max_context: u32,
    pub cost_weight: f64,
    #[serde(skip)]
    pub timeout: Duration,
}

/// Tier ladder and provider choice
pub struct ModelSelector {
    profiles: Vec<ModelProfile>,
    health_floor: f64,
}

impl ModelSelector {
    pub fn new(profiles: Vec<ModelProfile>, health_floor: f64) -> Self {
        Self { profiles, health_floor }
    }

    /// One profile per tier from the router settings
    ///
    /// Tier provider lists keep only registered names; a tier naming none of
    /// them falls back to every registered provider.
    pub fn from_config(config: &RouterConfig, registered: &[String]) -> Self {
        let profile = |tier: ModelTier, display: &str, context, weight, timeout_ms| {
            let mut candidates: Vec<String> = config
                .tier_providers(tier.as_str())
                .into_iter()
                .filter(|name| registered.contains(name))
                .collect();
            if candidates.is_empty() {
                candidates = registered.to_vec();
            }
            ModelProfile {
                tier,
                display_name: display.to_string(),
                model: config.tier_model(tier.as_str()).to_string(),
                candidates,
                max_context: context,
                cost_weight: weight,
                timeout: Duration::from_millis(timeout_ms),
            }
        };
        Self::new(
            vec![
                profile(ModelTier::Small, "Compact", 8_000, 0.6, config.small_timeout_ms),
                profile(ModelTier::Medium, "Standard", 32_000, 1.0, config.medium_timeout_ms),
                profile(ModelTier::Large, "Extended", 200_000, 1.6, config.large_timeout_ms),
            ],
            config.health_floor,
        )
    }

    pub fn profile(&self, tier: ModelTier) -> Option<&ModelProfile> {
        self.profiles.iter().find(|p| p.tier == tier)
    }

    /// Ordered tiers for this request
    pub fn tier_order(&self, class: IntentClass, level: ConfidenceLevel, degrade_active: bool) -> Vec<ModelTier> {
        use ModelTier::{Large, Medium, Small};

        if class == IntentClass::PolicyRisk {
            return vec![Large, Medium, Small];
        }
        if degrade_active {
            return match level {
                ConfidenceLevel::Low => vec![Medium, Large, Small],
                ConfidenceLevel::Medium => vec![Medium, Small, Large],
                ConfidenceLevel::High => vec![Small, Medium, Large],
            };
        }
        match (class, level) {
            (IntentClass::Complex, ConfidenceLevel::Low) => vec![Large, Medium, Small],
            (IntentClass::Complex, _) => vec![Medium, Large, Small],
            (IntentClass::Simple, ConfidenceLevel::High) => vec![Small, Medium, Large],
            _ => vec![Medium, Small, Large],
        }
    }

    /// Healthiest available candidate at or above the floor, else the healthiest overall
    pub fn choose_provider(
        &self,
        tier: ModelTier,
        health: &ProviderHealthMonitor,
        available: &[String],
        exclude: &[String],
    ) -> Option<String> {
        let candidates: Vec<String> = self
            .profile(tier)?
            .candidates
            .iter()
            .filter(|c| available.contains(c) && !exclude.contains(c))
            .cloned()
            .collect();

        let healthy: Vec<String> = candidates
            .iter()
            .filter(|c| health.score(c) >= self.health_floor)
            .cloned()
            .collect();
        let pool = if healthy.is_empty() { &candidates } else { &healthy };
        health.best(pool).map(|(name, _)| name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> ModelSelector {
        ModelSelector::from_config(
            &RouterConfig::default(),
            &["primary_openai".to_string(), "fallback_openai".to_string()],
        )
    }

    #[test]
    fn test_classifier_rules() {
        let classifier = IntentClassifier::new(RouterConfig::default().policy_keyword_list());
        assert_eq!(
            classifier.classify("Is this a financial risk?", 1600, true, 1),
            IntentClass::PolicyRisk
        );
        assert_eq!(classifier.classify("Sun in Leo?", 800, false, 6), IntentClass::Simple);
        assert_eq!(classifier.classify("When? Why?", 1600, true, 1), IntentClass::Complex);
        assert_eq!(classifier.classify("Sun in Leo", 1600, false, 1), IntentClass::Complex);
        assert_eq!(classifier.classify("Sun in Leo", 1600, true, 2), IntentClass::Simple);
    }

    #[test]
    fn test_confidence_blend() {
        let estimator = ConfidenceEstimator::new(0.55, 0.75);
        let score = estimator.estimate(1.0, &[0.8, 0.6], 5, 4, true);
        // 0.45 + 0.175 + 0.2 + 0.2 + 0.15 clipped
        assert_eq!(score, 1.0);
        assert_eq!(estimator.level(score), ConfidenceLevel::High);

        let low = estimator.estimate(0.0, &[], 1, 0, false);
        assert!((low - 0.04).abs() < 1e-9);
        assert_eq!(estimator.level(low), ConfidenceLevel::Low);
        assert_eq!(estimator.level(0.6), ConfidenceLevel::Medium);
    }

    #[test]
    fn test_tier_table() {
        let s = selector();
        use ModelTier::*;
        assert_eq!(s.tier_order(IntentClass::PolicyRisk, ConfidenceLevel::High, false)[0], Large);
        assert_eq!(s.tier_order(IntentClass::Simple, ConfidenceLevel::High, false)[0], Small);
        assert_eq!(s.tier_order(IntentClass::Complex, ConfidenceLevel::Low, false)[0], Large);
        assert_eq!(s.tier_order(IntentClass::Complex, ConfidenceLevel::High, false)[0], Medium);
        assert_eq!(
            s.tier_order(IntentClass::Simple, ConfidenceLevel::Low, true),
            vec![Medium, Large, Small]
        );
        assert_eq!(s.tier_order(IntentClass::PolicyRisk, ConfidenceLevel::High, true)[0], Large);
    }

    #[test]
    fn test_choose_provider_skips_unhealthy() {
        let s = selector();
        let health = ProviderHealthMonitor::new();
        for _ in 0..5 {
            health.record_success("primary_openai", 3600.0);
        }
        for _ in 0..7 {
            health.record_failure("primary_openai");
        }
        let available = vec!["primary_openai".to_string(), "fallback_openai".to_string()];
        assert_eq!(
            s.choose_provider(ModelTier::Small, &health, &available, &[]),
            Some("fallback_openai".to_string())
        );
        assert_eq!(
            s.choose_provider(ModelTier::Small, &health, &available, &["fallback_openai".to_string()]),
            Some("primary_openai".to_string())
        );
        assert_eq!(s.choose_provider(ModelTier::Small, &health, &[], &[]), None);
    }

    #[test]
    fn test_choose_provider_prefers_healthiest_above_floor() {
        let s = selector();
        let health = ProviderHealthMonitor::new();
        for _ in 0..5 {
            health.record_failure("primary_openai");
        }
        assert!((health.score("primary_openai") - 0.5).abs() < 1e-9);
        assert_eq!(health.score("fallback_openai"), 1.0);

        let available = vec!["primary_openai".to_string(), "fallback_openai".to_string()];
        assert_eq!(
            s.choose_provider(ModelTier::Small, &health, &available, &[]),
            Some("fallback_openai".to_string())
        );
    }

    #[test]
    fn test_profiles_follow_tier_settings() {
        let s = selector();
        let small = s.profile(ModelTier::Small).unwrap();
        let large = s.profile(ModelTier::Large).unwrap();
        assert_eq!(small.model, "gpt-4o-mini");
        assert_eq!(large.model, "gpt-4o");
        assert_ne!(small.model, large.model);
        assert_eq!(small.candidates[0], "primary_openai");
        assert_eq!(large.candidates[0], "fallback_openai");
    }

    #[test]
    fn test_unregistered_tier_providers_fall_back_to_all() {
        let config = RouterConfig {
            large_providers: "ghost, fallback_openai".to_string(),
            medium_providers: "ghost".to_string(),
            ..RouterConfig::default()
        };
        let registered = vec!["primary_openai".to_string(), "fallback_openai".to_string()];
        let s = ModelSelector::from_config(&config, &registered);
        assert_eq!(s.profile(ModelTier::Large).unwrap().candidates, vec!["fallback_openai".to_string()]);
        assert_eq!(s.profile(ModelTier::Medium).unwrap().candidates, registered);
    }
}
