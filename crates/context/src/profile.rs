//! Subject profile collaborators
//!
//! The pipeline only consumes a nested attribute map and a ranked topic list.
//! Calculators behind [`Calculator`] fill named sections of the map; the
//! bundled ones produce a fixed demonstration profile plus real profection
//! arithmetic so local runs and tests are deterministic.

use crate::schema::{Mode, SubjectProfile, TimingWindow};
use astrorag_common::errors::Result;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Nested attribute map keyed by stable section names
pub type Profile = Map<String, Value>;

/// Nested value under `path`, one map key per segment
pub fn lookup<'a>(profile: &'a Profile, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter().try_fold(profile.get(*first)?, |value, key| value.get(*key))
}

/// Builds a profile for a subject
#[async_trait]
pub trait ProfileBuilder: Send + Sync {
    async fn build(&self, subject: Option<&SubjectProfile>, mode: Mode) -> Result<Profile>;
}

/// One named profile section
pub trait Calculator: Send + Sync {
    /// Section key written into the profile
    fn key(&self) -> &'static str;

    fn compute(&self, subject: &SubjectProfile, on: NaiveDate) -> Option<Value>;
}

/// Runs every calculator and collects their sections
pub struct CalculatorProfileBuilder {
    calculators: Vec<Arc<dyn Calculator>>,
    today: Option<NaiveDate>,
}

impl CalculatorProfileBuilder {
    pub fn new(calculators: Vec<Arc<dyn Calculator>>) -> Self {
        Self {
            calculators,
            today: None,
        }
    }

    /// Fixture calculators for local development and tests
    pub fn fixture() -> Self {
        Self::new(vec![
            Arc::new(PlacementsFixture),
            Arc::new(AlmutenFixture),
            Arc::new(ReleasingFixture),
            Arc::new(FirdariaFixture),
            Arc::new(AnnualProfection),
        ])
    }

    /// Pin the reference date
    pub fn on(mut self, date: NaiveDate) -> Self {
        self.today = Some(date);
        self
    }
}

#[async_trait]
impl ProfileBuilder for CalculatorProfileBuilder {
    async fn build(&self, subject: Option<&SubjectProfile>, _mode: Mode) -> Result<Profile> {
        let mut profile = Profile::new();
        let Some(subject) = subject else {
            return Ok(profile);
        };
        let on = self.today.unwrap_or_else(|| Utc::now().date_naive());
        for calculator in &self.calculators {
            if let Some(section) = calculator.compute(subject, on) {
                profile.insert(calculator.key().to_string(), section);
            }
        }
        Ok(profile)
    }
}

const SIGNS: [&str; 12] = [
    "Aries", "Taurus", "Gemini", "Cancer", "Leo", "Virgo",
    "Libra", "Scorpio", "Sagittarius", "Capricorn", "Aquarius", "Pisces",
];

const SIGN_RULERS: [&str; 12] = [
    "Mars", "Venus", "Mercury", "Moon", "Sun", "Mercury",
    "Venus", "Mars", "Jupiter", "Saturn", "Saturn", "Jupiter",
];

const HOUSE_TOPICS: [&[&str]; 12] = [
    &["self", "body", "vitality"],
    &["resources", "income"],
    &["siblings", "communication", "short journeys"],
    &["home", "family", "roots"],
    &["children", "creativity", "pleasure"],
    &["health", "work", "routines"],
    &["partnership", "open enemies"],
    &["shared resources", "crisis"],
    &["travel", "philosophy", "higher learning"],
    &["career", "reputation", "authority", "public life"],
    &["friends", "alliances", "hopes"],
    &["retreat", "hidden matters"],
];

/// Annual profection from an Aries ascendant
pub struct AnnualProfection;

impl Calculator for AnnualProfection {
    fn key(&self) -> &'static str {
        "profection"
    }

    fn compute(&self, subject: &SubjectProfile, on: NaiveDate) -> Option<Value> {
        let born = NaiveDate::parse_from_str(&subject.date, "%Y-%m-%d").ok()?;
        let mut age = on.year() - born.year();
        if (on.month(), on.day()) < (born.month(), born.day()) {
            age -= 1;
        }
        let age = usize::try_from(age).ok()?;
        let index = age % 12;
        Some(json!({
            "age": age,
            "profected_house": index + 1,
            "profected_sign": SIGNS[index],
            "year_lord": SIGN_RULERS[index],
            "activated_topics": HOUSE_TOPICS[index],
        }))
    }
}

pub struct PlacementsFixture;

impl Calculator for PlacementsFixture {
    fn key(&self) -> &'static str {
        "planets"
    }

    fn compute(&self, _subject: &SubjectProfile, _on: NaiveDate) -> Option<Value> {
        Some(json!({
            "Sun": {"sign": "Gemini", "degree_in_sign": 24.5},
            "Moon": {"sign": "Scorpio", "degree_in_sign": 20.3},
            "Mercury": {"sign": "Gemini", "degree_in_sign": 15.2},
            "Venus": {"sign": "Taurus", "degree_in_sign": 15.8},
            "Mars": {"sign": "Aquarius", "degree_in_sign": 15.1},
            "Jupiter": {"sign": "Leo", "degree_in_sign": 0.7},
            "Saturn": {"sign": "Capricorn", "degree_in_sign": 15.4},
        }))
    }
}

pub struct AlmutenFixture;

impl Calculator for AlmutenFixture {
    fn key(&self) -> &'static str {
        "almuten"
    }

    fn compute(&self, _subject: &SubjectProfile, _on: NaiveDate) -> Option<Value> {
        Some(json!({
            "winner": "Mercury",
            "scores": {"Sun": 8, "Moon": 6, "Mercury": 12, "Venus": 7, "Mars": 5, "Jupiter": 9, "Saturn": 10},
        }))
    }
}

pub struct ReleasingFixture;

impl Calculator for ReleasingFixture {
    fn key(&self) -> &'static str {
        "zodiacal_releasing"
    }

    fn compute(&self, _subject: &SubjectProfile, _on: NaiveDate) -> Option<Value> {
        Some(json!({
            "lot_used": "Spirit",
            "current_periods": {
                "l1": {"sign": "Leo", "ruler": "Sun", "start_date": "2020-01-01", "end_date": "2039-01-01", "is_peak": true, "tone": "positive"},
                "l2": {"sign": "Virgo", "ruler": "Mercury", "start_date": "2023-01-01", "end_date": "2024-07-01", "is_peak": false, "tone": "neutral"},
            },
        }))
    }
}

pub struct FirdariaFixture;

impl Calculator for FirdariaFixture {
    fn key(&self) -> &'static str {
        "firdaria"
    }

    fn compute(&self, _subject: &SubjectProfile, _on: NaiveDate) -> Option<Value> {
        Some(json!({
            "current_major": {"lord": "Jupiter", "start_date": "2020-01-01", "end_date": "2032-01-01"},
            "current_minor": {"lord": "Venus", "start_date": "2023-01-01", "end_date": "2024-05-01"},
        }))
    }
}

/// Ranked themes and a first-pass narrative for a profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThemeSummary {
    /// Top themes, most relevant first (at most three)
    pub main_elements: Vec<String>,
    pub supporting_elements: Vec<String>,
    pub summary: String,
    pub strengths: Vec<String>,
    pub warnings: Vec<String>,
    pub timing: Vec<TimingWindow>,
    pub confidence: f64,
}

/// Ranks topics for a profile and query
pub trait ThemeSummarizer: Send + Sync {
    fn summarize(&self, profile: &Profile, query: &str, language: &str) -> ThemeSummary;
}

const QUERY_THEMES: &[(&str, &str)] = &[
    ("zodiacal releasing", "zodiacal releasing"),
    ("releasing", "zodiacal releasing"),
    ("zr", "zodiacal releasing"),
    ("profection", "profection"),
    ("profeksiyon", "profection"),
    ("firdaria", "firdaria"),
    ("almuten", "almuten"),
    ("antiscia", "antiscia"),
    ("dignity", "dignity"),
    ("sect", "sect"),
    ("saturn", "saturn"),
    ("venus", "venus"),
    ("moon", "moon"),
    ("ascendant", "ascendant"),
    ("yükselen", "ascendant"),
    ("synastry", "synastry"),
    ("transit", "transit"),
];

const PROFILE_THEMES: &[(&str, &str)] = &[
    ("almuten", "almuten"),
    ("profection", "profection"),
    ("zodiacal_releasing", "zodiacal releasing"),
    ("firdaria", "firdaria"),
];

/// Keyword summarizer over query mentions, then profile sections
#[derive(Debug, Default, Clone)]
pub struct KeywordThemeSummarizer;

impl KeywordThemeSummarizer {
    fn ranked_elements(profile: &Profile, query: &str) -> Vec<String> {
        let words: Vec<String> = astrorag_common::text::tokenize(query);
        let lowered = query.to_lowercase();
        let mut ranked: Vec<String> = Vec::new();

        for (needle, theme) in QUERY_THEMES {
            let hit = if needle.contains(' ') {
                lowered.contains(needle)
            } else {
                words.iter().any(|w| w == needle || w.starts_with(needle))
            };
            if hit && !ranked.iter().any(|t| t == theme) {
                ranked.push(theme.to_string());
            }
        }
        for (key, theme) in PROFILE_THEMES {
            if profile.contains_key(*key) && !ranked.iter().any(|t| t == theme) {
                ranked.push(theme.to_string());
            }
        }
        ranked
    }

    fn timing(profile: &Profile) -> Vec<TimingWindow> {
        let mut windows = Vec::new();
        if let Some(l1) = lookup(profile, &["zodiacal_releasing", "current_periods", "l1"]) {
            if let (Some(start), Some(end)) = (l1["start_date"].as_str(), l1["end_date"].as_str()) {
                windows.push(TimingWindow {
                    range: format!("{} → {}", start, end),
                    note: Some(format!(
                        "ZR L1 {} ruled by {}",
                        l1["sign"].as_str().unwrap_or("?"),
                        l1["ruler"].as_str().unwrap_or("?")
                    )),
                });
            }
        }
        if let Some(major) = lookup(profile, &["firdaria", "current_major"]) {
            if let (Some(start), Some(end)) = (major["start_date"].as_str(), major["end_date"].as_str()) {
                windows.push(TimingWindow {
                    range: format!("{} → {}", start, end),
                    note: Some(format!("Firdaria major {}", major["lord"].as_str().unwrap_or("?"))),
                });
            }
        }
        windows
    }
}

impl ThemeSummarizer for KeywordThemeSummarizer {
    fn summarize(&self, profile: &Profile, query: &str, language: &str) -> ThemeSummary {
        let ranked = Self::ranked_elements(profile, query);
        let main_elements: Vec<String> = ranked.iter().take(3).cloned().collect();
        let supporting_elements: Vec<String> = ranked.iter().skip(3).take(3).cloned().collect();

        let mut strengths = Vec::new();
        let mut warnings = Vec::new();
        if let Some(winner) = lookup(profile, &["almuten", "winner"]).and_then(Value::as_str) {
            strengths.push(format!(
                "{} as almuten figuris gives the chart a clear ruling voice and a dependable way to act on it.",
                winner
            ));
        }
        if let Some(l1) = lookup(profile, &["zodiacal_releasing", "current_periods", "l1"]) {
            if l1["is_peak"].as_bool() == Some(true) {
                strengths.push(format!(
                    "The current releasing chapter in {} is a peak period that supports visible progress.",
                    l1["sign"].as_str().unwrap_or("this sign")
                ));
            }
        }
        if let Some(lord) = lookup(profile, &["profection", "year_lord"]).and_then(Value::as_str) {
            warnings.push(format!(
                "{} rules the profected year, so its condition sets the pace for the activated topics.",
                lord
            ));
        }

        let topics = if main_elements.is_empty() {
            "general chart themes".to_string()
        } else {
            main_elements.join(", ")
        };
        let summary = if language == "tr" {
            format!("Bu yorum şu temalara odaklanır: {}.", topics)
        } else {
            format!("This reading focuses on {}.", topics)
        };

        let confidence = if profile.is_empty() { 0.45 } else { 0.7 };

        ThemeSummary {
            main_elements,
            supporting_elements,
            summary,
            strengths,
            warnings,
            timing: Self::timing(profile),
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(date: &str) -> SubjectProfile {
        SubjectProfile {
            date: date.to_string(),
            time: Some("14:35".to_string()),
            timezone: "Europe/Istanbul".to_string(),
            lat: 41.0,
            lng: 29.0,
        }
    }

    #[test]
    fn test_profection_age_and_house() {
        let on = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let section = AnnualProfection.compute(&subject("1991-07-21"), on).unwrap();
        assert_eq!(section["age"], 32);
        assert_eq!(section["profected_house"], 9);
        assert_eq!(section["profected_sign"], "Sagittarius");
        assert_eq!(section["year_lord"], "Jupiter");
    }

    #[tokio::test]
    async fn test_builder_without_subject_is_empty() {
        let builder = CalculatorProfileBuilder::fixture();
        let profile = builder.build(None, Mode::Definition).await.unwrap();
        assert!(profile.is_empty());
    }

    #[tokio::test]
    async fn test_summary_ranks_query_mentions_first() {
        let builder = CalculatorProfileBuilder::fixture().on(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        let profile = builder.build(Some(&subject("1991-07-21")), Mode::Natal).await.unwrap();
        let summary = KeywordThemeSummarizer.summarize(&profile, "When is my firdaria shift?", "en");
        assert_eq!(summary.main_elements[0], "firdaria");
        assert_eq!(summary.main_elements.len(), 3);
        assert!(!summary.strengths.is_empty());
        assert_eq!(summary.timing.len(), 2);
    }

    #[test]
    fn test_summary_without_profile_uses_query() {
        let summary = KeywordThemeSummarizer.summarize(&Profile::new(), "Zodiacal releasing peak periods", "en");
        assert_eq!(summary.main_elements, vec!["zodiacal releasing".to_string()]);
        assert!(summary.timing.is_empty());
    }

    #[test]
    fn test_lookup_walks_nested_sections() {
        let mut profile = Profile::new();
        profile.insert("almuten".into(), json!({"winner": "Venus"}));
        profile.insert(
            "zodiacal_releasing".into(),
            json!({"current_periods": {"l1": {"sign": "Leo", "is_peak": true}}}),
        );

        assert_eq!(lookup(&profile, &["almuten", "winner"]), Some(&json!("Venus")));
        assert_eq!(
            lookup(&profile, &["zodiacal_releasing", "current_periods", "l1", "sign"]),
            Some(&json!("Leo"))
        );
        assert!(lookup(&profile, &["almuten", "runner_up"]).is_none());
        assert!(lookup(&profile, &["firdaria", "current_major"]).is_none());
        assert!(lookup(&profile, &[]).is_none());
    }
}
