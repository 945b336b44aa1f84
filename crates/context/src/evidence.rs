//! Evidence pack: per-document tone, per-topic conflicts and diversity stats

use astrorag_search::RetrievalResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const POSITIVE_MARKERS: &[&str] = &["support", "benefit", "favorable", "harmon", "opportunity", "peak"];
const NEGATIVE_MARKERS: &[&str] = &["challenge", "difficult", "caution", "warning", "malefic", "tension"];

const SUPPORTIVE_CUES: &[&str] = &["support", "benefit", "harmon", "positive", "favorable"];
const CHALLENGING_CUES: &[&str] = &["challenge", "difficult", "malefic", "caution", "warning", "tension"];

const SNIPPET_CHARS: usize = 200;

/// Summary of one retrieved document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceDocument {
    pub source_id: String,
    pub score: f64,
    pub topic: String,
    pub school: String,
    pub language: String,
    pub tone: String,
    pub snippet: String,
}

/// Documents on one topic that disagree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conflict {
    pub topic: String,
    pub summary: String,
    pub documents: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Diversity {
    pub total: usize,
    pub unique_topics: usize,
    pub unique_schools: usize,
    pub unique_languages: usize,
    pub elements_covered: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvidencePack {
    pub documents: Vec<EvidenceDocument>,
    pub diversity: Diversity,
    pub conflicts: Vec<Conflict>,
}

impl EvidencePack {
    /// Build the pack from the final evidence set
    pub fn build(documents: &[RetrievalResult], main_elements: &[String]) -> Self {
        if documents.is_empty() {
            return Self::default();
        }

        let mut processed = Vec::with_capacity(documents.len());
        let mut by_topic: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut schools = BTreeSet::new();
        let mut languages = BTreeSet::new();

        for doc in documents {
            let topic = doc.topic().unwrap_or("unknown").to_string();
            let school = doc.school().unwrap_or("unknown").to_string();
            let language = doc.language().unwrap_or("unknown").to_string();
            schools.insert(school.clone());
            languages.insert(language.clone());

            by_topic.entry(topic.clone()).or_default().push(processed.len());
            processed.push(EvidenceDocument {
                source_id: doc.source_id.clone(),
                score: (doc.score * 1000.0).round() / 1000.0,
                topic,
                school,
                language,
                tone: classify_tone(&doc.content, doc.meta_str("tone")),
                snippet: astrorag_common::text::truncate_chars(&doc.content, SNIPPET_CHARS)
                    .trim()
                    .to_string(),
            });
        }

        let mut conflicts = Vec::new();
        for (topic, indices) in &by_topic {
            if topic == "unknown" {
                continue;
            }
            let docs: Vec<&EvidenceDocument> = indices.iter().map(|&i| &processed[i]).collect();
            let ids = || docs.iter().map(|d| d.source_id.clone()).collect::<Vec<_>>();

            let tones: BTreeSet<&str> = docs
                .iter()
                .map(|d| d.tone.as_str())
                .filter(|t| *t != "neutral")
                .collect();
            if tones.len() > 1 {
                conflicts.push(Conflict {
                    topic: topic.clone(),
                    summary: format!(
                        "mixed tones detected ({})",
                        tones.into_iter().collect::<Vec<_>>().join(", ")
                    ),
                    documents: ids(),
                });
                continue;
            }
            if tones.is_empty() {
                let has_cue = |cues: &[&str]| {
                    docs.iter().any(|d| {
                        let lower = d.snippet.to_lowercase();
                        cues.iter().any(|c| lower.contains(c))
                    })
                };
                if has_cue(SUPPORTIVE_CUES) && has_cue(CHALLENGING_CUES) {
                    conflicts.push(Conflict {
                        topic: topic.clone(),
                        summary: "supportive and challenging cues appear together".to_string(),
                        documents: ids(),
                    });
                }
            }
        }

        let elements_covered = main_elements
            .iter()
            .filter(|e| !e.is_empty())
            .map(|e| e.to_lowercase())
            .collect::<BTreeSet<_>>()
            .len();

        Self {
            diversity: Diversity {
                total: processed.len(),
                unique_topics: by_topic.len(),
                unique_schools: schools.len(),
                unique_languages: languages.len(),
                elements_covered,
            },
            documents: processed,
            conflicts,
        }
    }

    /// Compact summary attached to the payload
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "diversity": self.diversity,
            "conflicts": self.conflicts,
            "top_snippets": self
                .documents
                .iter()
                .take(3)
                .map(|d| serde_json::json!({ "source_id": d.source_id, "snippet": d.snippet }))
                .collect::<Vec<_>>(),
        })
    }

    /// Tone counts across documents
    pub fn tone_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for doc in &self.documents {
            *counts.entry(doc.tone.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Label a document supportive, challenging or neutral
pub fn classify_tone(content: &str, metadata_tone: Option<&str>) -> String {
    if content.is_empty() {
        return "neutral".to_string();
    }
    let text = content.to_lowercase();
    let positive = POSITIVE_MARKERS.iter().filter(|m| text.contains(*m)).count();
    let negative = NEGATIVE_MARKERS.iter().filter(|m| text.contains(*m)).count();

    if positive > negative {
        "supportive".to_string()
    } else if negative > positive {
        "challenging".to_string()
    } else {
        metadata_tone.unwrap_or("neutral").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astrorag_search::RetrievalMethod;
    use serde_json::json;

    fn doc(id: &str, content: &str, meta: serde_json::Value) -> RetrievalResult {
        RetrievalResult {
            content: content.to_string(),
            score: 0.81234,
            source_id: id.to_string(),
            method: RetrievalMethod::Hybrid,
            metadata: meta.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_classify_tone() {
        assert_eq!(classify_tone("A peak period that brings opportunity", None), "supportive");
        assert_eq!(classify_tone("Caution: a difficult transit", None), "challenging");
        assert_eq!(classify_tone("Plain description", Some("positive")), "positive");
        assert_eq!(classify_tone("", Some("positive")), "neutral");
    }

    #[test]
    fn test_mixed_tones_conflict() {
        let docs = vec![
            doc("a", "Saturn brings support and benefit", json!({"topic": "saturn", "school": "traditional"})),
            doc("b", "Saturn is a difficult malefic", json!({"topic": "saturn", "school": "modern"})),
            doc("c", "Sect matters", json!({"topic": "sect", "language": "en"})),
        ];
        let pack = EvidencePack::build(&docs, &["Saturn".to_string(), "saturn".to_string()]);
        assert_eq!(pack.conflicts.len(), 1);
        assert_eq!(pack.conflicts[0].summary, "mixed tones detected (challenging, supportive)");
        assert_eq!(pack.conflicts[0].documents, vec!["a", "b"]);
        assert_eq!(pack.diversity.total, 3);
        assert_eq!(pack.diversity.unique_topics, 2);
        assert_eq!(pack.diversity.unique_schools, 3);
        assert_eq!(pack.diversity.elements_covered, 1);
        assert_eq!(pack.documents[0].score, 0.812);
    }

    #[test]
    fn test_cue_conflict_when_tones_neutral() {
        let docs = vec![doc(
            "a",
            "Positive harmony yet tension with caution and harmonious support",
            json!({"topic": "venus"}),
        )];
        // two positive markers vs two negative: neutral tone, cues still conflict
        let pack = EvidencePack::build(&docs, &[]);
        assert_eq!(pack.documents[0].tone, "neutral");
        assert_eq!(pack.conflicts.len(), 1);
    }

    #[test]
    fn test_empty() {
        let pack = EvidencePack::build(&[], &[]);
        assert_eq!(pack.diversity.total, 0);
        assert!(pack.summary()["conflicts"].as_array().map(Vec::is_empty).unwrap_or(false));
    }
}
