//! Auxiliary connectors queried by multi-hop plan steps

use crate::profile::Profile;
use astrorag_common::errors::Result;
use astrorag_search::{RetrievalMethod, RetrievalResult};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// A structured lookup source for supplemental evidence
#[async_trait]
pub trait Connector: Send + Sync {
    /// Supplemental documents for a topic; empty when the connector knows nothing
    async fn fetch(&self, topic: &str, profile: &Profile) -> Result<Vec<RetrievalResult>>;

    fn name(&self) -> &str;
}

struct KgEntry {
    topic: &'static str,
    content: &'static str,
    metadata_topic: &'static str,
    school: &'static str,
    source: &'static str,
}

const KG_ENTRIES: &[KgEntry] = &[
    KgEntry {
        topic: "zodiacal_releasing",
        content: "Zodiacal Releasing divides time into chapters ruled by the sign of the Lot of Spirit. Angular periods to Fortune mark peaks, while Loosing of the Bond resets the storyline.",
        metadata_topic: "zodiacal_releasing",
        school: "traditional",
        source: "kg_hellenistic",
    },
    KgEntry {
        topic: "profection",
        content: "Annual profection advances the Ascendant one sign per year, activating the natal house and its ruler. The year-lord's condition colours the agenda for the profected topics.",
        metadata_topic: "profection",
        school: "traditional",
        source: "kg_traditional",
    },
    KgEntry {
        topic: "firdaria",
        content: "Firdaria allocates planetary periods according to sect. Major lords set the overarching tone while minor lords modulate events.",
        metadata_topic: "firdaria",
        school: "persian",
        source: "kg_persian",
    },
    KgEntry {
        topic: "traditional_sources",
        content: "Traditional authors emphasise testimonies that repeat across time-lord systems, giving priority to planets with multiple dignities.",
        metadata_topic: "methodology",
        school: "traditional",
        source: "kg_method",
    },
    KgEntry {
        topic: "modern_sources",
        content: "Modern practice blends psychological framing with classical timing, translating technical indicators into actionable coaching language.",
        metadata_topic: "methodology",
        school: "modern",
        source: "kg_method",
    },
];

const KG_SCORE: f64 = 0.85;
const TIMING_SCORE: f64 = 0.9;
const CORE_SCORE: f64 = 0.75;

fn metadata(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Knowledge-graph connector over canned topic entries
#[derive(Debug, Default, Clone)]
pub struct KnowledgeGraphConnector;

#[async_trait]
impl Connector for KnowledgeGraphConnector {
    async fn fetch(&self, topic: &str, _profile: &Profile) -> Result<Vec<RetrievalResult>> {
        let wanted = topic.trim().to_lowercase().replace(' ', "_");
        Ok(KG_ENTRIES
            .iter()
            .filter(|entry| entry.topic == wanted)
            .map(|entry| RetrievalResult {
                content: entry.content.to_string(),
                score: KG_SCORE,
                source_id: format!("kg::{}", entry.topic),
                method: RetrievalMethod::Kg,
                metadata: metadata(json!({
                    "topic": entry.metadata_topic,
                    "school": entry.school,
                    "language": "en",
                    "source": entry.source,
                })),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "kg"
    }
}

/// Tabular summarizer over the computed profile
#[derive(Debug, Default, Clone)]
pub struct ChartSummaryConnector;

impl ChartSummaryConnector {
    fn summary(topic: &str, content: String, score: f64) -> RetrievalResult {
        RetrievalResult {
            content,
            score,
            source_id: format!("sql::{}", topic),
            method: RetrievalMethod::Sql,
            metadata: metadata(json!({
                "topic": topic,
                "school": "chart_data",
                "language": "en",
                "source": "sql_cache",
            })),
        }
    }

    /// Current time-lord periods: releasing, profection and firdaria
    pub fn timing_lines(profile: &Profile) -> Vec<String> {
        let mut lines = Vec::new();

        let periods = profile
            .get("zodiacal_releasing")
            .and_then(|zr| zr.get("current_periods"));
        if let Some(l1) = periods.and_then(|p| p.get("l1")) {
            lines.push(format!(
                "Current ZR L1 ruled by {} ({}) peaking={}",
                text(l1, "ruler"),
                text(l1, "sign"),
                l1.get("is_peak").and_then(Value::as_bool).unwrap_or(false)
            ));
        }
        if let Some(l2) = periods.and_then(|p| p.get("l2")) {
            lines.push(format!(
                "ZR L2 sub-period ruler {} tone={}",
                text(l2, "ruler"),
                text(l2, "tone")
            ));
        }

        if let Some(profection) = profile.get("profection") {
            lines.push(format!(
                "Annual profection activates house {} ({}), year lord {}",
                text(profection, "profected_house"),
                text(profection, "profected_sign"),
                text(profection, "year_lord")
            ));
        }

        if let Some(firdaria) = profile.get("firdaria") {
            if let Some(major) = firdaria.get("current_major") {
                lines.push(format!(
                    "Firdaria major {} through {}",
                    text(major, "lord"),
                    text(major, "end_date")
                ));
            }
            if let Some(minor) = firdaria.get("current_minor") {
                lines.push(format!(
                    "Firdaria minor {} until {}",
                    text(minor, "lord"),
                    text(minor, "end_date")
                ));
            }
        }
        lines
    }

    /// Almuten winner plus the luminaries and Mercury
    pub fn core_notes(profile: &Profile) -> Vec<String> {
        let mut notes = Vec::new();
        if let Some(winner) = profile
            .get("almuten")
            .and_then(|a| a.get("winner"))
            .and_then(Value::as_str)
        {
            notes.push(format!("Almuten Figuris: {}", winner));
        }
        if let Some(planets) = profile.get("planets") {
            for name in ["Sun", "Moon", "Mercury"] {
                if let Some(info) = planets.get(name) {
                    notes.push(format!(
                        "{} in {} {}°",
                        name,
                        text(info, "sign"),
                        text(info, "degree_in_sign")
                    ));
                }
            }
        }
        notes
    }
}

#[async_trait]
impl Connector for ChartSummaryConnector {
    async fn fetch(&self, topic: &str, profile: &Profile) -> Result<Vec<RetrievalResult>> {
        if topic == "timing_overview" {
            let lines = Self::timing_lines(profile);
            if lines.is_empty() {
                return Ok(Vec::new());
            }
            return Ok(vec![Self::summary(topic, lines.join(" "), TIMING_SCORE)]);
        }

        let notes = Self::core_notes(profile);
        if notes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Self::summary("core_overview", notes.join(" | "), CORE_SCORE)])
    }

    fn name(&self) -> &str {
        "sql"
    }
}

fn text(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "unknown".to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{CalculatorProfileBuilder, ProfileBuilder};
    use crate::schema::{Mode, SubjectProfile};

    #[tokio::test]
    async fn test_kg_entries() {
        let kg = KnowledgeGraphConnector;
        let docs = kg.fetch("zodiacal_releasing", &Profile::new()).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source_id, "kg::zodiacal_releasing");
        assert_eq!(docs[0].score, 0.85);
        assert_eq!(docs[0].method, RetrievalMethod::Kg);

        let modern = kg.fetch("modern_sources", &Profile::new()).await.unwrap();
        assert_eq!(modern[0].school(), Some("modern"));

        assert!(kg.fetch("horary", &Profile::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chart_summaries_from_profile() {
        let subject = SubjectProfile {
            date: "1990-06-15".to_string(),
            time: Some("14:30".to_string()),
            timezone: "UTC".to_string(),
            lat: 41.01,
            lng: 28.97,
        };
        let profile = CalculatorProfileBuilder::fixture()
            .build(Some(&subject), Mode::Natal)
            .await
            .unwrap();
        let sql = ChartSummaryConnector;

        let timing = sql.fetch("timing_overview", &profile).await.unwrap();
        assert_eq!(timing[0].source_id, "sql::timing_overview");
        assert!(timing[0].content.contains("Current ZR L1 ruled by Sun (Leo) peaking=true"));
        assert!(timing[0].content.contains("Firdaria major Jupiter"));

        let core = sql.fetch("core_overview", &profile).await.unwrap();
        assert_eq!(core[0].score, 0.75);
        assert!(core[0].content.starts_with("Almuten Figuris: Mercury"));
    }

    #[tokio::test]
    async fn test_empty_profile_yields_nothing() {
        let sql = ChartSummaryConnector;
        assert!(sql.fetch("timing_overview", &Profile::new()).await.unwrap().is_empty());
        assert!(sql.fetch("core_overview", &Profile::new()).await.unwrap().is_empty());
    }
}
