//! Rolling provider health

use astrorag_common::metrics::percentile;
use dashmap::DashMap;
use std::collections::VecDeque;

const WINDOW: usize = 30;
const LATENCY_BASELINE_MS: f64 = 1400.0;
const LATENCY_SPAN_MS: f64 = 2000.0;
const MAX_LATENCY_PENALTY: f64 = 0.4;
const FAILURE_STEP: f64 = 0.1;
const MAX_FAILURE_PENALTY: f64 = 0.6;

#[derive(Debug, Default)]
struct HealthWindow {
    latencies: VecDeque<f64>,
    failures: u32,
}

impl HealthWindow {
    fn p95(&self) -> f64 {
        let samples: Vec<f64> = self.latencies.iter().copied().collect();
        percentile(&samples, 95.0).unwrap_or(0.0)
    }

    fn score(&self) -> f64 {
        let latency_penalty = if self.latencies.is_empty() {
            0.0
        } else {
            ((self.p95() - LATENCY_BASELINE_MS) / LATENCY_SPAN_MS).clamp(0.0, MAX_LATENCY_PENALTY)
        };
        let failure_penalty = (self.failures as f64 * FAILURE_STEP).min(MAX_FAILURE_PENALTY);
        (1.0 - latency_penalty - failure_penalty).clamp(0.0, 1.0)
    }
}

/// Per-provider health score in [0, 1]
///
/// Recent latency p95 above 1.4s and consecutive failures both lower the
/// score. Each success forgives one failure.
#[derive(Debug, Default)]
pub struct ProviderHealthMonitor {
    windows: DashMap<String, HealthWindow>,
}

impl ProviderHealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, provider: &str, latency_ms: f64) {
        let mut window = self.windows.entry(provider.to_string()).or_default();
        window.latencies.push_back(latency_ms);
        while window.latencies.len() > WINDOW {
            window.latencies.pop_front();
        }
        window.failures = window.failures.saturating_sub(1);
    }

    pub fn record_failure(&self, provider: &str) {
        self.windows.entry(provider.to_string()).or_default().failures += 1;
    }

    /// Unknown providers are fully healthy
    pub fn score(&self, provider: &str) -> f64 {
        self.windows.get(provider).map(|w| w.score()).unwrap_or(1.0)
    }

    /// Best score among the given providers
    pub fn best(&self, providers: &[String]) -> Option<(String, f64)> {
        providers
            .iter()
            .map(|p| (p.clone(), self.score(p)))
            .fold(None, |best, (name, score)| match best {
                Some((_, s)) if s >= score => best,
                _ => Some((name, score)),
            })
    }

    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        self.windows
            .iter()
            .map(|e| {
                let score = (e.value().score() * 1000.0).round() / 1000.0;
                (e.key().clone(), serde_json::json!(score))
            })
            .collect()
    }
}
