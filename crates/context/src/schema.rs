//! Request and answer contracts for the answer endpoint

use astrorag_common::errors::{AppError, Result};
use astrorag_search::CitationEntry;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Supported interpretation modes
pub const MODES: [&str; 6] = ["natal", "transit", "technique", "definition", "synastry", "mixed"];

/// Interpretation mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Natal,
    Transit,
    Technique,
    Definition,
    Synastry,
    Mixed,
}

impl Mode {
    /// Parse a caller-supplied mode; case and surrounding whitespace are ignored
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "natal" => Ok(Mode::Natal),
            "transit" => Ok(Mode::Transit),
            "technique" => Ok(Mode::Technique),
            "definition" => Ok(Mode::Definition),
            "synastry" => Ok(Mode::Synastry),
            "mixed" => Ok(Mode::Mixed),
            _ => Err(AppError::InvalidMode {
                mode: value.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Natal => "natal",
            Mode::Transit => "transit",
            Mode::Technique => "technique",
            Mode::Definition => "definition",
            Mode::Synastry => "synastry",
            Mode::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Locale {
    #[serde(rename = "tr-TR")]
    TrTr,
    #[default]
    #[serde(rename = "en-US")]
    EnUs,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::TrTr => "tr-TR",
            Locale::EnUs => "en-US",
        }
    }

    /// Two-letter language code
    pub fn language(&self) -> &'static str {
        match self {
            Locale::TrTr => "tr",
            Locale::EnUs => "en",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserLevel {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl UserLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserLevel::Beginner => "beginner",
            UserLevel::Intermediate => "intermediate",
            UserLevel::Advanced => "advanced",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocaleSettings {
    #[serde(default)]
    pub locale: Locale,
    #[serde(default)]
    pub user_level: UserLevel,
}

/// Quality/cost balance for experiments
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AbProfile {
    QualityFirst,
    CostFirst,
    #[default]
    Balanced,
}

impl AbProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbProfile::QualityFirst => "quality-first",
            AbProfile::CostFirst => "cost-first",
            AbProfile::Balanced => "balanced",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AbFlags {
    #[serde(default)]
    pub profile: AbProfile,
}

/// Latency, cost and token budgets
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Constraints {
    #[validate(range(min = 100, max = 10_000))]
    #[serde(default = "default_max_latency")]
    pub max_latency_ms: u64,

    #[validate(range(min = 0.0))]
    #[serde(default = "default_max_cost")]
    pub max_cost_usd: f64,

    #[validate(range(min = 200, max = 12_000))]
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_latency_ms: default_max_latency(),
            max_cost_usd: default_max_cost(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_latency() -> u64 { 1600 }
fn default_max_cost() -> f64 { 0.10 }
fn default_max_tokens() -> u32 { 3000 }
fn default_timezone() -> String { "UTC".to_string() }
fn default_mode() -> String { "natal".to_string() }

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SessionContext {
    #[validate(length(max = 64))]
    pub user_id: Option<String>,
    #[validate(length(max = 64))]
    pub conversation_id: Option<String>,
}

/// Subject birth data used to build the profile
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubjectProfile {
    /// YYYY-MM-DD
    #[validate(length(min = 1))]
    pub date: String,
    /// HH:MM, 24h
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
}

impl SubjectProfile {
    fn check_formats(&self) -> Result<()> {
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").map_err(|_| AppError::Validation {
            message: "date must be in YYYY-MM-DD format".to_string(),
            field: Some("subject_profile.date".to_string()),
        })?;
        if let Some(time) = &self.time {
            NaiveTime::parse_from_str(time, "%H:%M").map_err(|_| AppError::Validation {
                message: "time must be in HH:MM 24h format".to_string(),
                field: Some("subject_profile.time".to_string()),
            })?;
        }
        Ok(())
    }
}

/// Top-level answer request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AnswerRequest {
    #[validate(length(min = 3, max = 2000))]
    pub query: String,

    #[serde(default)]
    #[validate(nested)]
    pub subject_profile: Option<SubjectProfile>,

    #[serde(default)]
    pub locale: LocaleSettings,

    #[serde(default = "default_mode")]
    pub mode: String,

    #[serde(default)]
    #[validate(nested)]
    pub constraints: Constraints,

    #[serde(default)]
    pub ab_flags: AbFlags,

    #[serde(default)]
    #[validate(nested)]
    pub session: SessionContext,
}

impl AnswerRequest {
    /// Minimal request with defaults for everything but the query
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            subject_profile: None,
            locale: LocaleSettings::default(),
            mode: default_mode(),
            constraints: Constraints::default(),
            ab_flags: AbFlags::default(),
            session: SessionContext::default(),
        }
    }

    /// Validate field ranges and formats, returning the parsed mode
    pub fn check(&self) -> Result<Mode> {
        if self.query.trim().is_empty() {
            return Err(AppError::MissingField {
                field: "query".to_string(),
            });
        }
        self.validate().map_err(|e| {
            let field = e.field_errors().keys().next().map(|k| k.to_string());
            AppError::Validation {
                message: e.to_string(),
                field,
            }
        })?;
        if let Some(profile) = &self.subject_profile {
            profile.check_formats()?;
        }
        Mode::parse(&self.mode)
    }

    pub fn language(&self) -> &'static str {
        self.locale.locale.language()
    }
}

/// Explicit timing range
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingWindow {
    pub range: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Structured answer body
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnswerBody {
    pub general_profile: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub watchouts: Vec<String>,
    #[serde(default)]
    pub timing: Vec<TimingWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collective_note: Option<String>,
    #[serde(default)]
    pub secondary_refs: Vec<String>,
}

/// Run metadata attached to every answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerLimits {
    pub coverage_ok: bool,
    pub hallucination_risk: String,
    #[serde(default)]
    pub processing_time_ms: u64,
    #[serde(default)]
    pub latency_budget_ms: u64,
    #[serde(default)]
    pub coverage_score: Option<f64>,
    #[serde(default)]
    pub citation_alignment: Option<f64>,
    #[serde(default)]
    pub claims_supported_ratio: Option<f64>,
    /// Set when backend output needed repair or failed validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
}

impl Default for AnswerLimits {
    fn default() -> Self {
        Self {
            coverage_ok: true,
            hallucination_risk: "medium".to_string(),
            processing_time_ms: 0,
            latency_budget_ms: 0,
            coverage_score: None,
            citation_alignment: None,
            claims_supported_ratio: None,
            validation: None,
        }
    }
}

/// Composite answer payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerPayload {
    pub answer: AnswerBody,
    pub citations: Vec<CitationEntry>,
    pub confidence: f64,
    pub limits: AnswerLimits,
    #[serde(default)]
    pub evidence_summary: serde_json::Value,
}

impl AnswerPayload {
    /// Enforce the answer contract: at least one citation, ordered line ranges, bounded confidence
    pub fn check_contract(&mut self) -> Result<()> {
        if self.citations.is_empty() {
            return Err(AppError::CitationsRequired);
        }
        if let Some(bad) = self.citations.iter().find(|c| c.line_end < c.line_start) {
            return Err(AppError::Validation {
                message: format!("citation {} has line_end before line_start", bad.doc_id),
                field: Some("citations".to_string()),
            });
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_from_minimal_json() {
        let req: AnswerRequest = serde_json::from_value(json!({"query": "What is my almuten?"})).unwrap();
        assert_eq!(req.check().unwrap(), Mode::Natal);
        assert_eq!(req.constraints.max_latency_ms, 1600);
        assert_eq!(req.constraints.max_tokens, 3000);
        assert_eq!(req.language(), "en");
        assert_eq!(req.ab_flags.profile, AbProfile::Balanced);
    }

    #[test]
    fn test_mode_is_normalized() {
        let mut req = AnswerRequest::new("Zodiacal releasing peaks");
        req.mode = "  TeChNiQuE ".to_string();
        assert_eq!(req.check().unwrap(), Mode::Technique);

        req.mode = "horary".to_string();
        assert!(matches!(req.check(), Err(AppError::InvalidMode { .. })));
    }

    #[test]
    fn test_range_violations() {
        let mut req = AnswerRequest::new("ok");
        assert!(matches!(req.check(), Err(AppError::Validation { .. })));

        req.query = "valid query".to_string();
        req.constraints.max_latency_ms = 50;
        let err = req.check().unwrap_err();
        assert!(err.is_caller_input());

        req.constraints.max_latency_ms = 1600;
        req.subject_profile = Some(SubjectProfile {
            date: "1990-13-40".to_string(),
            time: None,
            timezone: "UTC".to_string(),
            lat: 41.0,
            lng: 29.0,
        });
        match req.check() {
            Err(AppError::Validation { field, .. }) => assert_eq!(field.as_deref(), Some("subject_profile.date")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_locale_wire_names() {
        let req: AnswerRequest = serde_json::from_value(json!({
            "query": "yükselen burç",
            "locale": {"locale": "tr-TR", "user_level": "advanced"},
            "ab_flags": {"profile": "cost-first"}
        }))
        .unwrap();
        assert_eq!(req.language(), "tr");
        assert_eq!(req.locale.user_level, UserLevel::Advanced);
        assert_eq!(req.ab_flags.profile, AbProfile::CostFirst);
    }

    #[test]
    fn test_contract_requires_citations() {
        let mut payload = AnswerPayload {
            answer: AnswerBody::default(),
            citations: vec![],
            confidence: 1.4,
            limits: AnswerLimits::default(),
            evidence_summary: serde_json::Value::Null,
        };
        assert!(matches!(payload.check_contract(), Err(AppError::CitationsRequired)));
    }
}
