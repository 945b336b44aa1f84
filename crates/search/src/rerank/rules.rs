//! Rule-based relevance scoring for astrological content

use super::RerankContext;
use crate::retrieval::RetrievalResult;

const TOPIC_BOOSTS: &[(&str, f64)] = &[
    ("almuten", 1.3),
    ("zodiacal_releasing", 1.2),
    ("profection", 1.2),
    ("firdaria", 1.1),
    ("dignity", 1.2),
    ("sect", 1.1),
    ("antiscia", 1.0),
    ("aspect", 1.0),
];

const SOURCE_CREDIBILITY: &[(&str, f64)] = &[
    ("traditional_astrology", 1.3),
    ("hellenistic_timing", 1.2),
    ("persian_periods", 1.1),
    ("modern_synthesis", 0.9),
    ("experimental", 0.8),
];

const LANGUAGE_PREFERENCE: &[(&str, f64)] = &[("en", 1.0), ("tr", 1.0)];

pub(crate) const TECHNICAL_TERMS: &[&str] = &[
    "dignity", "rulership", "exaltation", "triplicity", "term", "face",
    "sect", "diurnal", "nocturnal", "malefic", "benefic",
    "almuten", "hyleg", "alcocoden", "reception", "antiscia",
    "profection", "firdaria", "zodiacal releasing", "progression",
    "transit", "aspect", "conjunction", "opposition", "trine", "square", "sextile",
];

const QUALITY_INDICATORS: &[&str] = &[
    "according to", "traditional", "hellenistic", "medieval",
    "calculation", "method", "technique", "interpretation",
];

const QUALITY_DETRACTORS: &[&str] = &["maybe", "possibly", "unclear", "uncertain", "vague"];

fn lookup(table: &[(&str, f64)], key: &str) -> Option<f64> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn count_present(terms: &[&str], content: &str) -> usize {
    terms.iter().filter(|t| content.contains(*t)).count()
}

/// Multiplicative rule score; 1.0 is neutral
pub fn rule_score(result: &RetrievalResult, query: &str, context: &RerankContext) -> f64 {
    let mut score = 1.0;
    let content = result.content.to_lowercase();
    let query = query.to_lowercase();

    if let Some(boost) = result.topic().and_then(|t| lookup(TOPIC_BOOSTS, t)) {
        score *= boost;
    }
    if let Some(credibility) = result.meta_str("source").and_then(|s| lookup(SOURCE_CREDIBILITY, s)) {
        score *= credibility;
    }
    if let Some(pref) = lookup(LANGUAGE_PREFERENCE, result.language().unwrap_or("en")) {
        score *= pref;
    }

    // Length curve over raw characters
    let length = result.content.chars().count();
    if length < 50 {
        score *= 0.7;
    } else if length > 500 {
        score *= 0.8;
    } else if (100..=300).contains(&length) {
        score *= 1.1;
    }

    let words = content.split_whitespace().count().max(1);
    let density = count_present(TECHNICAL_TERMS, &content) as f64 / words as f64;
    if density > 0.05 {
        score *= 1.2;
    } else if density > 0.02 {
        score *= 1.1;
    }

    let indicators = count_present(QUALITY_INDICATORS, &content);
    if indicators > 0 {
        score *= 1.0 + indicators as f64 * 0.05;
    }
    let detractors = count_present(QUALITY_DETRACTORS, &content);
    if detractors > 0 {
        score *= 1.0 - detractors as f64 * 0.1;
    }

    // Query overlap: exact substring hits count double, partial word hits once
    let terms: Vec<&str> = query.split_whitespace().collect();
    if !terms.is_empty() {
        let content_words: Vec<&str> = content.split_whitespace().collect();
        let exact = terms.iter().filter(|t| content.contains(*t)).count();
        let partial = terms
            .iter()
            .filter(|t| content_words.iter().any(|w| w.contains(*t)))
            .count();
        let matched = (exact * 2 + partial) as f64 / terms.len() as f64;
        score *= 1.0 + matched * 0.3;
    }

    match context.user_level.as_str() {
        "beginner" if content.contains("traditional") => score *= 1.1,
        "advanced" if content.contains("calculation") => score *= 1.1,
        _ => {}
    }
    for element in &context.chart_elements {
        if !element.is_empty() && content.contains(&element.to_lowercase()) {
            score *= 1.05;
        }
    }

    score
}

/// Human-readable explanation of the rule score
pub fn rule_reason(result: &RetrievalResult, score: f64) -> String {
    let mut reasons = Vec::new();

    if let Some(topic) = result.topic() {
        if lookup(TOPIC_BOOSTS, topic).is_some_and(|b| b > 1.1) {
            reasons.push(format!("High relevance topic: {}", topic));
        }
    }
    if let Some(source) = result.meta_str("source") {
        if lookup(SOURCE_CREDIBILITY, source).is_some_and(|c| c > 1.1) {
            reasons.push(format!("Credible source: {}", source));
        }
    }
    let terms = count_present(TECHNICAL_TERMS, &result.content.to_lowercase());
    if terms > 3 {
        reasons.push(format!("Rich technical content ({} terms)", terms));
    }
    if score > 1.3 {
        reasons.push("High overall relevance".to_string());
    } else if score < 0.8 {
        reasons.push("Lower relevance factors".to_string());
    }

    if reasons.is_empty() {
        "Standard relevance".to_string()
    } else {
        reasons.join("; ")
    }
}
