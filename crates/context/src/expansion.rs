//! Query expansion - widens retrieval recall for astrological queries
//!
//! Provides:
//! - Bilingual (English/Turkish) synonym lookup in both directions
//! - Contextual trigger rules (keyword set → related concepts)
//! - A templated hypothetical answer used only as an internal query aid

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

const SYNONYMS: &[(&str, &[&str])] = &[
    ("ascendant", &["asc", "rising", "yükselen", "asandan"]),
    ("midheaven", &["mc", "medium coeli", "gökyüzü ortası", "zenit"]),
    ("descendant", &["desc", "batı", "batan"]),
    ("imum coeli", &["ic", "gece yarısı", "nadir"]),
    ("sun", &["sol", "güneş", "solar"]),
    ("moon", &["luna", "ay", "lunar"]),
    ("mercury", &["merkür", "hermes"]),
    ("venus", &["venüs", "aphrodite", "zühre"]),
    ("mars", &["merih", "ares"]),
    ("jupiter", &["jüpiter", "müşteri", "zeus"]),
    ("saturn", &["satürn", "zuhal", "kronos"]),
    ("uranus", &["uranüs"]),
    ("neptune", &["neptün"]),
    ("pluto", &["plüton"]),
    ("aries", &["koç", "ram"]),
    ("taurus", &["boğa", "bull"]),
    ("gemini", &["ikizler", "twins"]),
    ("cancer", &["yengeç", "crab"]),
    ("leo", &["aslan", "lion"]),
    ("virgo", &["başak", "virgin"]),
    ("libra", &["terazi", "scales"]),
    ("scorpio", &["akrep", "scorpion"]),
    ("sagittarius", &["yay", "archer"]),
    ("capricorn", &["oğlak", "goat"]),
    ("aquarius", &["kova", "water bearer"]),
    ("pisces", &["balık", "fish"]),
    ("conjunction", &["kavuşum", "birleşim", "0°"]),
    ("opposition", &["karşıt", "180°"]),
    ("trine", &["üçgen", "120°", "trigon"]),
    ("square", &["kare", "90°", "tetragone"]),
    ("sextile", &["altıgen", "60°", "hexagon"]),
    ("first house", &["1. ev", "ascendant house", "identity"]),
    ("seventh house", &["7. ev", "partnership house", "marriage"]),
    ("tenth house", &["10. ev", "career house", "reputation"]),
    ("zodiacal releasing", &["zr", "zodiak salıverme", "zodyak releasing"]),
    ("profection", &["profeksiyon", "annual profection", "yıllık profeksiyon"]),
    ("firdaria", &["persian periods", "fars dönemleri"]),
    ("almuten", &["almuten figuris", "güçlü gezegen"]),
    ("antiscia", &["antisya", "gölge noktalar", "solstitial points"]),
    ("dignity", &["değerlik", "essential dignity", "temel değerlik"]),
    ("reception", &["kabul", "mutual reception", "karşılıklı kabul"]),
    ("sect", &["fırka", "day/night", "gündüz/gece"]),
    ("transit", &["geçiş", "current position", "şimdiki konum"]),
    ("progression", &["progresyon", "secondary progression"]),
    ("solar arc", &["güneş yayı", "solar arc direction"]),
    ("return", &["dönüş", "solar return", "güneş dönüşü"]),
    ("lot of fortune", &["talih noktası", "part of fortune"]),
    ("lot of spirit", &["ruh noktası", "part of spirit"]),
    ("retrograde", &["geri gidiş", "retrograd", "rx"]),
    ("combust", &["yanık", "under beams"]),
];

struct ContextRule {
    triggers: &'static [&'static str],
    additions: &'static [&'static str],
}

const CONTEXT_RULES: &[ContextRule] = &[
    // planet
    ContextRule {
        triggers: &["sun", "moon", "mercury", "venus", "mars", "jupiter", "saturn"],
        additions: &["dignity", "aspect", "house", "sign"],
    },
    // timing
    ContextRule {
        triggers: &["timing", "when", "period", "phase"],
        additions: &["zodiacal releasing", "profection", "firdaria", "transit", "progression"],
    },
    // relationship
    ContextRule {
        triggers: &["relationship", "marriage", "partner", "love"],
        additions: &["seventh house", "venus", "mars", "descendant"],
    },
    // career
    ContextRule {
        triggers: &["career", "job", "work", "profession"],
        additions: &["tenth house", "midheaven", "saturn", "sun"],
    },
    // identity
    ContextRule {
        triggers: &["identity", "personality", "self", "character"],
        additions: &["first house", "ascendant", "sun", "moon"],
    },
];

const PER_TERM_LIMIT: usize = 3;
const PER_RULE_LIMIT: usize = 3;
const KEY_TERM_LIMIT: usize = 5;

/// Which source produced an expansion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionKind {
    Original,
    Synonym,
    Contextual,
    Hypothetical,
}

impl ExpansionKind {
    pub fn confidence(&self) -> f64 {
        match self {
            ExpansionKind::Original => 0.9,
            ExpansionKind::Synonym => 0.8,
            ExpansionKind::Contextual => 0.7,
            ExpansionKind::Hypothetical => 0.6,
        }
    }
}

/// Question shape used to pick a hypothetical-answer template
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    What,
    How,
    When,
    Why,
}

impl QuestionKind {
    fn detect(query_lower: &str) -> Self {
        if query_lower.starts_with("how") {
            QuestionKind::How
        } else if query_lower.starts_with("when") {
            QuestionKind::When
        } else if query_lower.starts_with("why") {
            QuestionKind::Why
        } else {
            QuestionKind::What
        }
    }

    fn template(&self, query: &str) -> String {
        match self {
            QuestionKind::What => format!(
                "This astrological concept explains {}. It involves planetary dignities, house rulerships, aspects and is used for interpretation and timing.",
                query
            ),
            QuestionKind::How => format!(
                "To understand {} in astrology, one must consider essential dignities, accidental conditions, time-lord periods. The process involves calculation, analysis, synthesis.",
                query
            ),
            QuestionKind::When => format!(
                "The timing of {} can be determined through zodiacal releasing, profections, transits. Key indicators include peaks, loosing of bond, angular periods.",
                query
            ),
            QuestionKind::Why => format!(
                "The astrological significance of {} stems from traditional astrological doctrine. This is important because it reveals core life themes and timing.",
                query
            ),
        }
    }
}

/// One expansion term with its provenance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expansion {
    pub term: String,
    pub kind: ExpansionKind,
    pub confidence: f64,
}

/// Expanded query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandedQuery {
    pub original_query: String,
    pub expansions: Vec<Expansion>,
    pub synonyms: Vec<String>,
    pub contextual_terms: Vec<String>,
    /// Internal retrieval aid; never shown to callers or sent for generation
    pub hypothetical: Option<String>,
    pub question: QuestionKind,
    pub confidence: f64,
}

impl ExpandedQuery {
    /// Expansion terms, excluding the original query
    pub fn expanded_terms(&self) -> Vec<&str> {
        self.expansions
            .iter()
            .filter(|e| e.kind != ExpansionKind::Original)
            .map(|e| e.term.as_str())
            .collect()
    }

    /// Query text handed to retrieval: original plus expansion terms
    pub fn retrieval_query(&self) -> String {
        let mut parts = vec![self.original_query.clone()];
        parts.extend(self.expanded_terms().into_iter().map(str::to_string));
        parts.join(" ")
    }

    /// Passthrough used when expansion is disabled
    pub fn unexpanded(query: &str) -> Self {
        Self {
            original_query: query.to_string(),
            expansions: vec![Expansion {
                term: query.to_string(),
                kind: ExpansionKind::Original,
                confidence: ExpansionKind::Original.confidence(),
            }],
            synonyms: Vec::new(),
            contextual_terms: Vec::new(),
            hypothetical: None,
            question: QuestionKind::detect(&query.to_lowercase()),
            confidence: 1.0,
        }
    }
}

/// Expansion statistics for debug output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpansionStats {
    pub original_length: usize,
    pub total_expansions: usize,
    pub synonym_count: usize,
    pub contextual_count: usize,
    pub has_hypothetical: bool,
    pub confidence: f64,
    pub expansion_ratio: f64,
}

/// Query expander configuration
#[derive(Debug, Clone)]
pub struct ExpanderConfig {
    /// Cap on the combined expansion list
    pub max_expansions: usize,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self { max_expansions: 10 }
    }
}

/// Query expander
pub struct QueryExpander {
    config: ExpanderConfig,

    /// Canonical term → synonyms
    synonyms: HashMap<&'static str, Vec<&'static str>>,

    /// Synonym → canonical term and sibling synonyms
    reverse: HashMap<&'static str, Vec<&'static str>>,

    /// Every known term, sorted for deterministic key-term extraction
    vocabulary: BTreeSet<&'static str>,
}

impl QueryExpander {
    pub fn new(config: ExpanderConfig) -> Self {
        let mut synonyms = HashMap::new();
        let mut reverse: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        let mut vocabulary = BTreeSet::new();

        for (canonical, alternatives) in SYNONYMS {
            synonyms.insert(*canonical, alternatives.to_vec());
            vocabulary.insert(*canonical);
            for alternative in alternatives.iter() {
                vocabulary.insert(*alternative);
                let entry = reverse.entry(*alternative).or_default();
                if !entry.contains(canonical) {
                    entry.push(*canonical);
                }
                for sibling in alternatives.iter().filter(|s| *s != alternative) {
                    if !entry.contains(sibling) {
                        entry.push(*sibling);
                    }
                }
            }
        }

        Self {
            config,
            synonyms,
            reverse,
            vocabulary,
        }
    }

    /// Combined expansion: each source gets a third of the budget, then the union is capped
    pub fn expand(&self, query: &str) -> ExpandedQuery {
        let lowered = query.to_lowercase();
        let share = (self.config.max_expansions / 3).max(1);

        let synonyms = self.synonym_terms(&lowered, share);
        let contextual_terms = self.contextual_terms(&lowered, share);
        let question = QuestionKind::detect(lowered.trim_start());
        let key_terms = self.key_terms(&lowered);

        let mut expansions = vec![Expansion {
            term: query.to_string(),
            kind: ExpansionKind::Original,
            confidence: ExpansionKind::Original.confidence(),
        }];
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let sources = [
            (ExpansionKind::Synonym, &synonyms),
            (ExpansionKind::Contextual, &contextual_terms),
            (ExpansionKind::Hypothetical, &key_terms),
        ];
        for (kind, terms) in sources {
            for term in terms.iter() {
                if expansions.len() > self.config.max_expansions {
                    break;
                }
                if seen.insert(term.clone()) {
                    expansions.push(Expansion {
                        term: term.clone(),
                        kind,
                        confidence: kind.confidence(),
                    });
                }
            }
        }

        ExpandedQuery {
            original_query: query.to_string(),
            expansions,
            synonyms,
            contextual_terms,
            hypothetical: Some(question.template(query)),
            question,
            confidence: ExpansionKind::Original.confidence(),
        }
    }

    fn synonym_terms(&self, lowered: &str, limit: usize) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for term in lowered.split_whitespace() {
            let term = term.trim_matches(|c: char| c.is_ascii_punctuation() && c != '/');
            let direct = self.synonyms.get(term).into_iter().flatten();
            let reverse = self.reverse.get(term).into_iter().flatten();
            for candidate in direct.take(PER_TERM_LIMIT).chain(reverse.take(PER_TERM_LIMIT)) {
                if *candidate != term && !out.iter().any(|o| o == candidate) {
                    out.push(candidate.to_string());
                }
            }
        }
        out.truncate(limit);
        out
    }

    fn contextual_terms(&self, lowered: &str, limit: usize) -> Vec<String> {
        let words: Vec<String> = astrorag_common::text::tokenize(lowered);
        let mut out: Vec<String> = Vec::new();
        for rule in CONTEXT_RULES {
            if rule.triggers.iter().any(|t| words.iter().any(|w| w == t)) {
                for addition in rule.additions.iter().take(PER_RULE_LIMIT) {
                    if !out.iter().any(|o| o == addition) {
                        out.push(addition.to_string());
                    }
                }
            }
        }
        out.truncate(limit);
        out
    }

    /// Known terms present in the query; single words must match a whole token
    fn key_terms(&self, lowered: &str) -> Vec<String> {
        let words: Vec<String> = astrorag_common::text::tokenize(lowered);
        self.vocabulary
            .iter()
            .filter(|term| {
                if term.contains(' ') || !term.chars().all(char::is_alphanumeric) {
                    lowered.contains(*term)
                } else {
                    words.iter().any(|w| w == *term)
                }
            })
            .take(KEY_TERM_LIMIT)
            .map(|t| t.to_string())
            .collect()
    }

    /// Follow-up questions for planets, timing and houses
    pub fn suggest_related_queries(&self, query: &str, max_suggestions: usize) -> Vec<String> {
        let lowered = query.to_lowercase();
        let mut suggestions = Vec::new();

        if ["sun", "moon", "mercury", "venus", "mars", "jupiter", "saturn"]
            .iter()
            .any(|p| lowered.contains(p))
        {
            suggestions.extend([
                "What are the essential dignities?",
                "How do planetary aspects work?",
                "What is sect in astrology?",
            ]);
        }
        if ["when", "timing", "period"].iter().any(|t| lowered.contains(t)) {
            suggestions.extend([
                "How does zodiacal releasing work?",
                "What are annual profections?",
                "How to interpret transits?",
            ]);
        }
        if lowered.contains("house") {
            suggestions.extend([
                "What do the astrological houses mean?",
                "How are house rulers determined?",
                "What is whole sign houses?",
            ]);
        }

        suggestions.into_iter().take(max_suggestions).map(str::to_string).collect()
    }

    pub fn stats(&self, expanded: &ExpandedQuery) -> ExpansionStats {
        let original_length = expanded.original_query.split_whitespace().count();
        let total = expanded.expanded_terms().len();
        ExpansionStats {
            original_length,
            total_expansions: total,
            synonym_count: expanded.synonyms.len(),
            contextual_count: expanded.contextual_terms.len(),
            has_hypothetical: expanded.hypothetical.is_some(),
            confidence: expanded.confidence,
            expansion_ratio: total as f64 / original_length.max(1) as f64,
        }
    }
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self::new(ExpanderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synonyms_both_directions() {
        let expander = QueryExpander::default();
        let direct = expander.synonym_terms("saturn return", 10);
        assert!(direct.contains(&"satürn".to_string()));

        let reverse = expander.synonym_terms("yükselen burç", 10);
        assert_eq!(reverse[0], "ascendant");
    }

    #[test]
    fn test_contextual_rules() {
        let expander = QueryExpander::default();
        let terms = expander.contextual_terms("when will my career change", 10);
        assert!(terms.contains(&"zodiacal releasing".to_string()));
        assert!(terms.contains(&"tenth house".to_string()));
        assert!(!terms.contains(&"transit".to_string()));
    }

    #[test]
    fn test_combined_is_capped_and_tagged() {
        let expander = QueryExpander::new(ExpanderConfig { max_expansions: 6 });
        let expanded = expander.expand("When does my Saturn profection year peak?");
        let terms = expanded.expanded_terms();
        assert!(terms.len() <= 6);
        assert_eq!(expanded.expansions[0].kind, ExpansionKind::Original);
        assert_eq!(expanded.question, QuestionKind::When);
        assert!(expanded
            .expansions
            .iter()
            .all(|e| (e.confidence - e.kind.confidence()).abs() < f64::EPSILON));
        let unique: BTreeSet<&str> = terms.iter().copied().collect();
        assert_eq!(unique.len(), terms.len());
        assert!(expanded.hypothetical.as_deref().unwrap_or("").starts_with("The timing of"));
    }

    #[test]
    fn test_key_terms_need_whole_words() {
        let expander = QueryExpander::default();
        // "ay" must not match inside "day"
        let terms = expander.key_terms("a sunny day");
        assert!(!terms.contains(&"ay".to_string()));
        assert!(!terms.contains(&"sun".to_string()));
    }

    #[test]
    fn test_suggestions() {
        let expander = QueryExpander::default();
        let s = expander.suggest_related_queries("When is my Venus period?", 5);
        assert_eq!(s.len(), 5);
        assert_eq!(s[0], "What are the essential dignities?");
    }

    #[test]
    fn test_unexpanded_passthrough() {
        let q = ExpandedQuery::unexpanded("almuten");
        assert_eq!(q.retrieval_query(), "almuten");
    }
}
