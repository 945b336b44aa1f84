//! Multi-hop query planner
//!
//! Provides:
//! - Plan derivation from coverage issues
//! - Budget-bounded hop execution against auxiliary connectors
//! - Early stop on the first hop that returns evidence

mod connectors;

pub use connectors::{ChartSummaryConnector, Connector, KnowledgeGraphConnector};

use crate::coverage::CoverageReport;
use crate::profile::Profile;
use astrorag_common::metrics::{names, MetricsSink};
use astrorag_search::RetrievalResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Connector a step is routed to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Knowledge-graph lookup
    Kg,
    /// Tabular profile summary
    Sql,
}

/// Single plan step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(rename = "step_type")]
    pub kind: StepKind,
    pub topic: String,
    pub reason: String,
    /// Estimated cost charged against the hop budget
    pub cost_ms: u64,
    /// Not executed because the budget could not absorb it
    #[serde(default)]
    pub skipped: bool,
    /// Source ids of the documents the hop returned
    #[serde(default)]
    pub docs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl PlanStep {
    fn new(kind: StepKind, topic: impl Into<String>, reason: impl Into<String>, cost_ms: u64) -> Self {
        Self {
            kind,
            topic: topic.into(),
            reason: reason.into(),
            cost_ms,
            skipped: false,
            docs: Vec::new(),
            error: None,
            elapsed_ms: 0,
        }
    }
}

/// Result of running a plan
#[derive(Debug, Clone, Default)]
pub struct MultiHopOutcome {
    pub steps: Vec<PlanStep>,
    pub documents: Vec<RetrievalResult>,
    /// Estimated budget consumed
    pub spent_ms: u64,
    pub budget_ms: u64,
}

/// Planner configuration
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Hard cap on total hop time
    pub budget_cap_ms: u64,
    /// Estimated cost per hop
    pub hop_cost_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            budget_cap_ms: 1500,
            hop_cost_ms: 150,
        }
    }
}

/// Drafts and executes follow-up lookups for coverage gaps
pub struct QueryPlanner {
    config: PlannerConfig,
    kg: Arc<dyn Connector>,
    sql: Arc<dyn Connector>,
}

impl QueryPlanner {
    pub fn new(config: PlannerConfig, kg: Arc<dyn Connector>, sql: Arc<dyn Connector>) -> Self {
        Self { config, kg, sql }
    }

    /// Planner over the bundled connectors
    pub fn with_defaults(config: PlannerConfig) -> Self {
        Self::new(
            config,
            Arc::new(KnowledgeGraphConnector),
            Arc::new(ChartSummaryConnector),
        )
    }

    /// Derive steps from the coverage issues
    pub fn plan(&self, elements: &[String], coverage: &CoverageReport) -> Vec<PlanStep> {
        let cost = self.config.hop_cost_ms;
        let mut steps = Vec::new();

        for issue in &coverage.issues {
            let lower = issue.to_lowercase();
            let topic = if lower.contains("zodiacal") {
                Some("zodiacal_releasing".to_string())
            } else if lower.contains("profection") {
                Some("profection".to_string())
            } else if lower.contains("firdaria") {
                Some("firdaria".to_string())
            } else if lower.contains("traditional") {
                Some("traditional_sources".to_string())
            } else if lower.contains("modern") {
                Some("modern_sources".to_string())
            } else if lower.contains("coverage score") {
                elements.first().map(|e| e.to_lowercase())
            } else {
                None
            };
            if let Some(topic) = topic {
                steps.push(PlanStep::new(StepKind::Kg, topic, issue.clone(), cost));
            }
        }

        if steps.is_empty() {
            for element in elements.iter().take(2) {
                steps.push(PlanStep::new(
                    StepKind::Kg,
                    element.to_lowercase(),
                    "boost coverage for key element",
                    cost,
                ));
            }
        }

        let timing_topics = ["zodiacal_releasing", "profection", "firdaria"];
        if coverage.topics.iter().any(|t| timing_topics.contains(&t.as_str())) {
            steps.push(PlanStep::new(
                StepKind::Sql,
                "timing_overview",
                "enrich timing context from chart",
                cost,
            ));
        } else {
            steps.push(PlanStep::new(
                StepKind::Sql,
                "core_overview",
                "summarize chart core placements",
                cost,
            ));
        }

        let mut seen = HashSet::new();
        steps.retain(|step| seen.insert((step.kind, step.topic.clone())));
        steps
    }

    /// Execute the plan within the remaining latency budget
    pub async fn run(
        &self,
        elements: &[String],
        coverage: &CoverageReport,
        profile: &Profile,
        remaining_ms: u64,
        metrics: &dyn MetricsSink,
    ) -> MultiHopOutcome {
        let budget_ms = remaining_ms.min(self.config.budget_cap_ms);
        let mut outcome = MultiHopOutcome {
            budget_ms,
            ..MultiHopOutcome::default()
        };

        let mut found = false;
        for mut step in self.plan(elements, coverage) {
            if found {
                break;
            }
            if outcome.spent_ms + step.cost_ms > budget_ms {
                debug!(topic = %step.topic, cost_ms = step.cost_ms, budget_ms, "Hop skipped");
                step.skipped = true;
                outcome.steps.push(step);
                continue;
            }

            let connector = match step.kind {
                StepKind::Kg => &self.kg,
                StepKind::Sql => &self.sql,
            };
            let started = Instant::now();
            match connector.fetch(&step.topic, profile).await {
                Ok(docs) => {
                    step.docs = docs.iter().map(|d| d.source_id.clone()).collect();
                    found = !docs.is_empty();
                    outcome.documents.extend(docs);
                }
                Err(e) => {
                    warn!(connector = connector.name(), topic = %step.topic, error = %e, "Hop failed");
                    step.error = Some(e.to_string());
                }
            }
            step.elapsed_ms = started.elapsed().as_millis() as u64;
            outcome.spent_ms += step.cost_ms;
            metrics.record_histogram(names::MULTI_HOP_SPENT, outcome.spent_ms as f64);
            outcome.steps.push(step);
        }

        info!(
            steps = outcome.steps.len(),
            documents = outcome.documents.len(),
            spent_ms = outcome.spent_ms,
            budget_ms,
            "Multi-hop plan executed"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astrorag_common::errors::{AppError, Result};
    use astrorag_common::RollingMetrics;
    use async_trait::async_trait;
    use std::time::Duration;

    fn coverage(issues: &[&str], topics: &[&str]) -> CoverageReport {
        CoverageReport {
            passed: false,
            score: 0.0,
            issues: issues.iter().map(|s| s.to_string()).collect(),
            schools: Vec::new(),
            topics: topics.iter().map(|s| s.to_string()).collect(),
            required_topic: None,
        }
    }

    struct Failing;

    #[async_trait]
    impl Connector for Failing {
        async fn fetch(&self, _topic: &str, _profile: &Profile) -> Result<Vec<RetrievalResult>> {
            Err(AppError::StoreUnavailable {
                store: "kg".into(),
                message: "down".into(),
            })
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_plan_from_issues() {
        let planner = QueryPlanner::with_defaults(PlannerConfig::default());
        let report = coverage(
            &[
                "Coverage score below threshold (0.7).",
                "Modern source not found.",
                "Required topic 'zodiacal_releasing' missing in evidence.",
            ],
            &["profection"],
        );
        let steps = planner.plan(&["almuten".to_string()], &report);
        let topics: Vec<&str> = steps.iter().map(|s| s.topic.as_str()).collect();
        assert_eq!(
            topics,
            vec!["almuten", "modern_sources", "zodiacal_releasing", "timing_overview"]
        );
        assert_eq!(steps.last().map(|s| s.kind), Some(StepKind::Sql));
    }

    #[test]
    fn test_plan_falls_back_to_elements_and_dedupes() {
        let planner = QueryPlanner::with_defaults(PlannerConfig::default());
        let steps = planner.plan(
            &["Firdaria".to_string(), "firdaria".to_string(), "sect".to_string()],
            &coverage(&[], &[]),
        );
        let topics: Vec<&str> = steps.iter().map(|s| s.topic.as_str()).collect();
        assert_eq!(topics, vec!["firdaria", "core_overview"]);
    }

    #[tokio::test]
    async fn test_run_stops_on_first_evidence() {
        let planner = QueryPlanner::with_defaults(PlannerConfig::default());
        let metrics = RollingMetrics::default();
        let report = coverage(&["Required topic 'zodiacal_releasing' missing in evidence."], &[]);
        let outcome = planner.run(&[], &report, &Profile::new(), 1600, &metrics).await;

        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.documents[0].source_id, "kg::zodiacal_releasing");
        assert_eq!(outcome.spent_ms, 150);
        assert_eq!(outcome.budget_ms, 1500);
        assert_eq!(
            metrics.get_metric_values(names::MULTI_HOP_SPENT, Duration::from_secs(60)),
            vec![150.0]
        );
    }

    #[tokio::test]
    async fn test_run_skips_over_budget() {
        let planner = QueryPlanner::with_defaults(PlannerConfig {
            budget_cap_ms: 1500,
            hop_cost_ms: 150,
        });
        let metrics = RollingMetrics::default();
        let report = coverage(&["Modern source not found."], &[]);
        let outcome = planner.run(&[], &report, &Profile::new(), 100, &metrics).await;

        assert!(outcome.steps.iter().all(|s| s.skipped));
        assert!(outcome.documents.is_empty());
        assert_eq!(outcome.spent_ms, 0);
    }

    #[tokio::test]
    async fn test_connector_failure_is_flagged() {
        let planner = QueryPlanner::new(
            PlannerConfig::default(),
            Arc::new(Failing),
            Arc::new(ChartSummaryConnector),
        );
        let metrics = RollingMetrics::default();
        let report = coverage(&["Modern source not found."], &[]);
        let outcome = planner.run(&[], &report, &Profile::new(), 1500, &metrics).await;

        assert!(outcome.steps[0].error.is_some());
        // core_overview over an empty profile yields nothing, so both steps run
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.spent_ms, 300);
    }
}
