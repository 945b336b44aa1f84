//! Evidence coverage gate
//!
//! Scores how well the retrieved documents span the elements a query needs.
//! A failing gate hands its issues to the multi-hop planner.

use astrorag_search::RetrievalResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Technique keywords and the topic tag each one requires, checked in order
const TECHNIQUE_TOPICS: &[(&[&str], &str)] = &[
    (&["zodiacal", "releasing", "zr"], "zodiacal_releasing"),
    (&["profection", "profections", "profeksiyon"], "profection"),
    (&["firdaria"], "firdaria"),
    (&["almuten"], "almuten"),
];

/// Coverage gate result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoverageReport {
    #[serde(rename = "pass")]
    pub passed: bool,
    pub score: f64,
    pub issues: Vec<String>,
    pub schools: Vec<String>,
    pub topics: Vec<String>,
    pub required_topic: Option<String>,
}

/// Coverage gate
#[derive(Debug, Clone)]
pub struct CoverageGate {
    threshold: f64,
}

impl CoverageGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Evaluate the evidence set against the required elements
    pub fn evaluate(&self, elements: &[String], documents: &[RetrievalResult], query: &str) -> CoverageReport {
        let required: Vec<String> = elements
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        let contents: Vec<String> = documents
            .iter()
            .map(|d| d.content.to_lowercase())
            .collect();

        let score = if required.is_empty() {
            1.0
        } else {
            let matched = required
                .iter()
                .filter(|element| {
                    let spaced = element.replace('_', " ");
                    contents
                        .iter()
                        .any(|c| c.contains(element.as_str()) || c.contains(&spaced))
                })
                .count();
            (matched as f64 / required.len() as f64).min(1.0)
        };

        let schools: BTreeSet<String> = documents
            .iter()
            .filter_map(|d| d.school())
            .map(str::to_string)
            .collect();
        let topics: BTreeSet<String> = documents
            .iter()
            .filter_map(|d| d.topic())
            .map(str::to_string)
            .collect();

        let has_classical = schools.iter().any(|s| {
            let s = s.to_lowercase();
            s.contains("traditional") || s.contains("classical")
        });
        let has_modern = schools.iter().any(|s| s.to_lowercase().contains("modern"));

        let required_topic = required_technique(&required, query);

        let mut issues = Vec::new();
        if documents.is_empty() {
            issues.push("No documents retrieved for coverage gate.".to_string());
        }
        if score < self.threshold {
            issues.push(format!("Coverage score below threshold ({}).", self.threshold));
        }
        if !has_classical {
            issues.push("Traditional/classical source not found.".to_string());
        }
        if !has_modern {
            issues.push("Modern source not found.".to_string());
        }

        let mut passed = score >= self.threshold && has_classical;
        if let Some(topic) = &required_topic {
            if !topics.contains(topic) {
                issues.push(format!("Required topic '{}' missing in evidence.", topic));
                passed = false;
            }
        }

        CoverageReport {
            passed,
            score: (score * 1000.0).round() / 1000.0,
            issues,
            schools: schools.into_iter().collect(),
            topics: topics.into_iter().collect(),
            required_topic,
        }
    }
}

impl Default for CoverageGate {
    fn default() -> Self {
        Self::new(0.7)
    }
}

/// Topic tag demanded by a technique named in the elements or the query
pub fn required_technique(elements: &[String], query: &str) -> Option<String> {
    let mut text = elements.join(" ");
    text.push(' ');
    text.push_str(&query.to_lowercase());
    let words = astrorag_common::text::tokenize(&text);

    TECHNIQUE_TOPICS
        .iter()
        .find(|(keywords, _)| {
            keywords.iter().any(|k| words.iter().any(|w| w == k))
        })
        .map(|(_, topic)| topic.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use astrorag_search::RetrievalMethod;
    use serde_json::json;

    fn doc(id: &str, content: &str, topic: &str, school: &str) -> RetrievalResult {
        RetrievalResult {
            content: content.to_string(),
            score: 0.8,
            source_id: id.to_string(),
            method: RetrievalMethod::Hybrid,
            metadata: json!({ "topic": topic, "school": school })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        }
    }

    #[test]
    fn test_no_required_topics_scores_one() {
        let gate = CoverageGate::default();
        let docs = vec![doc("a", "Essential dignities", "dignity", "classical")];
        let report = gate.evaluate(&[], &docs, "what is dignity");
        assert_eq!(report.score, 1.0);
        assert!(report.passed);
    }

    #[test]
    fn test_both_required_present() {
        let gate = CoverageGate::default();
        let docs = vec![
            doc("a", "The almuten is the strongest planet", "almuten", "traditional"),
            doc("b", "Sect divides day and night charts", "sect", "traditional"),
        ];
        let elements = vec!["almuten".to_string(), "sect".to_string()];
        let report = gate.evaluate(&elements, &docs, "almuten and sect");
        assert_eq!(report.score, 1.0);
        assert!(report.passed);
        assert_eq!(report.required_topic.as_deref(), Some("almuten"));
    }

    #[test]
    fn test_none_present_fails() {
        let gate = CoverageGate::default();
        let docs = vec![doc("a", "Antiscia mirror the solstices", "antiscia", "traditional")];
        let elements = vec!["firdaria".to_string(), "profection".to_string()];
        let report = gate.evaluate(&elements, &docs, "periods");
        assert_eq!(report.score, 0.0);
        assert!(!report.passed);
        assert!(report.issues.iter().any(|i| i.contains("below threshold")));
    }

    #[test]
    fn test_named_technique_requires_topic_tag() {
        let gate = CoverageGate::default();
        let docs = vec![doc(
            "a",
            "Peak periods and loosing of the bond",
            "profection",
            "traditional",
        )];
        let report = gate.evaluate(&[], &docs, "When is my zodiacal releasing peak?");
        assert_eq!(report.required_topic.as_deref(), Some("zodiacal_releasing"));
        assert!(!report.passed);
        assert!(report
            .issues
            .iter()
            .any(|i| i == "Required topic 'zodiacal_releasing' missing in evidence."));
    }

    #[test]
    fn test_modern_missing_is_only_an_issue() {
        let gate = CoverageGate::default();
        let docs = vec![doc("a", "Rulership is the strongest dignity", "dignity", "classical")];
        let report = gate.evaluate(&[], &docs, "dignity");
        assert!(report.passed);
        assert!(report.issues.iter().any(|i| i.contains("Modern")));
    }

    #[test]
    fn test_empty_documents() {
        let gate = CoverageGate::default();
        let report = gate.evaluate(&["almuten".to_string()], &[], "almuten");
        assert!(!report.passed);
        assert_eq!(report.score, 0.0);
    }
}
