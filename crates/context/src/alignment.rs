//! Claim-to-citation alignment
//!
//! Each claim is scored against every cited document as the better of two
//! signals: the share of its significant tokens found verbatim in the
//! document, and the best Ratcliff/Obershelp similarity over sliding windows.

use crate::schema::AnswerBody;
use astrorag_common::config::AlignmentConfig;
use astrorag_common::text::{sentences, tokenize};
use astrorag_search::{CitationEntry, RetrievalResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const STOP_WORDS: &[&str] = &[
    "this", "that", "with", "have", "from", "about", "your", "their", "will", "into", "over",
    "under", "above", "below", "through", "there", "which", "while", "where", "when", "also",
    "very", "much", "many", "some", "more", "less", "than", "such", "each", "other", "most",
    "like", "just", "even", "because", "should", "could", "would", "might", "being", "having",
];
const MIN_TOKEN_CHARS: usize = 4;
const SPAN_PADDING: usize = 60;

/// One scored claim
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimAlignment {
    pub text: String,
    pub origin: String,
    pub score: f64,
    pub citation_id: Option<String>,
    pub citation_n: Option<usize>,
    pub doc_id: Option<String>,
    pub span: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlignmentReport {
    pub score: Option<f64>,
    pub supported_ratio: Option<f64>,
    pub threshold: f64,
    pub claims: Vec<ClaimAlignment>,
    /// Why scoring was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AlignmentReport {
    fn skipped(threshold: f64, reason: &str) -> Self {
        Self {
            score: None,
            supported_ratio: None,
            threshold,
            claims: Vec::new(),
            reason: Some(reason.to_string()),
        }
    }

    /// True when either aggregate falls below `breach`
    pub fn breached(&self, breach: f64) -> bool {
        self.score.is_some_and(|s| s < breach) || self.supported_ratio.is_some_and(|r| r < breach)
    }
}

/// Claim-like statements from an answer body with their origin
pub fn extract_claims(answer: &AnswerBody) -> Vec<(String, String)> {
    let mut claims: Vec<(String, String)> = sentences(&answer.general_profile)
        .into_iter()
        .map(|s| (s, "general_profile".to_string()))
        .collect();

    let listed = |name: &str, items: &[String]| -> Vec<(String, String)> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.trim().to_string(), format!("{}[{}]", name, i)))
            .collect()
    };
    claims.extend(listed("strengths", &answer.strengths));
    claims.extend(listed("watchouts", &answer.watchouts));
    claims.extend(answer.timing.iter().enumerate().map(|(i, window)| {
        let text = window.note.clone().unwrap_or_else(|| window.range.clone());
        (text.trim().to_string(), format!("timing[{}]", i))
    }));
    claims.extend(listed("secondary_refs", &answer.secondary_refs));

    let mut seen = HashSet::new();
    claims
        .into_iter()
        .filter(|(text, _)| !text.is_empty() && seen.insert(text.to_lowercase()))
        .collect()
}

fn significant_tokens(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS && !STOP_WORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn lower_chars(text: &str) -> Vec<char> {
    text.chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect()
}

/// Longest common block of `a[a0..a1]` and `b[b0..b1]` as (start_a, start_b, len)
fn longest_match(a: &[char], b: &[char], (a0, a1): (usize, usize), (b0, b1): (usize, usize)) -> (usize, usize, usize) {
    let mut best = (a0, b0, 0);
    let mut prev = vec![0usize; b1 - b0 + 1];
    let mut row = vec![0usize; b1 - b0 + 1];
    for i in a0..a1 {
        for j in b0..b1 {
            let k = j - b0 + 1;
            row[k] = if a[i] == b[j] { prev[k - 1] + 1 } else { 0 };
            if row[k] > best.2 {
                best = (i + 1 - row[k], j + 1 - row[k], row[k]);
            }
        }
        std::mem::swap(&mut prev, &mut row);
        row.iter_mut().for_each(|v| *v = 0);
    }
    best
}

/// Ratcliff/Obershelp similarity `2 * M / (|a| + |b|)`
pub fn similarity_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let mut matched = 0usize;
    let mut stack = vec![((0, a.len()), (0, b.len()))];
    while let Some((ra, rb)) = stack.pop() {
        if ra.0 >= ra.1 || rb.0 >= rb.1 {
            continue;
        }
        let (i, j, len) = longest_match(a, b, ra, rb);
        if len == 0 {
            continue;
        }
        matched += len;
        stack.push(((ra.0, i), (rb.0, j)));
        stack.push(((i + len, ra.1), (j + len, rb.1)));
    }
    2.0 * matched as f64 / total as f64
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

struct DocMatch {
    score: f64,
    span: String,
}

pub struct ClaimAligner {
    config: AlignmentConfig,
}

impl ClaimAligner {
    pub fn new(config: AlignmentConfig) -> Self {
        Self { config }
    }

    pub fn breach_threshold(&self) -> f64 {
        self.config.breach_threshold
    }

    fn windows(&self, len: usize) -> Vec<(usize, usize)> {
        let size = self.config.window_size.max(1);
        let step = self.config.window_step.max(1);
        if len <= size {
            return vec![(0, len)];
        }
        let mut out = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + size).min(len);
            out.push((start, end));
            if end == len {
                break;
            }
            start += step;
        }
        out
    }

    fn match_document(&self, claim: &str, tokens: &[String], content: &str) -> DocMatch {
        let original: Vec<char> = content.chars().collect();
        let lowered = lower_chars(content);
        let lowered_text: String = lowered.iter().collect();
        let claim_chars = lower_chars(claim);

        let mut first_hit: Option<(usize, usize)> = None;
        let mut found = 0usize;
        for token in tokens {
            if let Some(byte) = lowered_text.find(token.as_str()) {
                found += 1;
                if first_hit.is_none() {
                    first_hit = Some((lowered_text[..byte].chars().count(), token.chars().count()));
                }
            }
        }
        let token_fraction = if tokens.is_empty() {
            0.0
        } else {
            found as f64 / tokens.len() as f64
        };

        let (window_score, window) = self
            .windows(lowered.len())
            .into_iter()
            .map(|(s, e)| (similarity_ratio(&claim_chars, &lowered[s..e]), (s, e)))
            .fold((0.0, (0, 0)), |best, cur| if cur.0 > best.0 { cur } else { best });

        let (start, end) = match first_hit {
            Some((pos, len)) if token_fraction >= window_score => (
                pos.saturating_sub(SPAN_PADDING),
                (pos + len + SPAN_PADDING).min(original.len()),
            ),
            _ => window,
        };

        DocMatch {
            score: token_fraction.max(window_score),
            span: original[start..end].iter().collect::<String>().trim().to_string(),
        }
    }

    /// Score every claim of `answer` against the documents behind `citations`
    pub fn score(&self, answer: &AnswerBody, citations: &[CitationEntry], documents: &[RetrievalResult]) -> AlignmentReport {
        let threshold = self.config.support_threshold;
        let claims = extract_claims(answer);
        if claims.is_empty() {
            return AlignmentReport::skipped(threshold, "no_claims");
        }
        if citations.is_empty() {
            return AlignmentReport::skipped(threshold, "no_citations");
        }

        let by_id: HashMap<&str, &RetrievalResult> =
            documents.iter().map(|d| (d.source_id.as_str(), d)).collect();
        let cited: Vec<(&CitationEntry, &RetrievalResult)> = citations
            .iter()
            .filter_map(|c| by_id.get(c.doc_id.as_str()).map(|d| (c, *d)))
            .collect();
        if cited.is_empty() {
            return AlignmentReport::skipped(threshold, "no_documents");
        }

        let scored: Vec<ClaimAlignment> = claims
            .into_iter()
            .map(|(text, origin)| {
                let tokens = significant_tokens(&text);
                let best = cited
                    .iter()
                    .map(|(citation, doc)| (citation, self.match_document(&text, &tokens, &doc.content)))
                    .fold(None::<(&&CitationEntry, DocMatch)>, |best, cur| match best {
                        Some(b) if b.1.score >= cur.1.score => Some(b),
                        _ => Some(cur),
                    });

                match best {
                    Some((citation, found)) => ClaimAlignment {
                        text,
                        origin,
                        score: round3(found.score),
                        citation_id: Some(citation.id.clone()),
                        citation_n: Some(citation.n),
                        doc_id: Some(citation.doc_id.clone()),
                        span: Some(found.span),
                    },
                    None => ClaimAlignment {
                        text,
                        origin,
                        score: 0.0,
                        citation_id: None,
                        citation_n: None,
                        doc_id: None,
                        span: None,
                    },
                }
            })
            .collect();

        let count = scored.len() as f64;
        let mean = scored.iter().map(|c| c.score).sum::<f64>() / count;
        let supported = scored.iter().filter(|c| c.score >= threshold).count() as f64 / count;

        AlignmentReport {
            score: Some(round3(mean)),
            supported_ratio: Some(round3(supported)),
            threshold,
            claims: scored,
            reason: None,
        }
    }
}

/// Copy the best supporting span of each claim onto its citation
pub fn attach_spans(citations: &mut [CitationEntry], report: &AlignmentReport) {
    for claim in &report.claims {
        let (Some(id), Some(span)) = (&claim.citation_id, &claim.span) else {
            continue;
        };
        if let Some(citation) = citations.iter_mut().find(|c| &c.id == id && c.span.is_empty()) {
            citation.span = span.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TimingWindow;
    use astrorag_search::{CitationBuilder, RetrievalMethod};
    use serde_json::Map;

    fn doc(id: &str, content: &str) -> RetrievalResult {
        RetrievalResult {
            content: content.to_string(),
            score: 0.8,
            source_id: id.to_string(),
            method: RetrievalMethod::Hybrid,
            metadata: Map::new(),
        }
    }

    fn aligner() -> ClaimAligner {
        ClaimAligner::new(AlignmentConfig::default())
    }

    #[test]
    fn test_similarity_ratio() {
        let a: Vec<char> = "abcd".chars().collect();
        let b: Vec<char> = "bcde".chars().collect();
        assert!((similarity_ratio(&a, &b) - 0.75).abs() < 1e-9);
        assert_eq!(similarity_ratio(&a, &a), 1.0);
        assert_eq!(similarity_ratio(&a, &[]), 0.0);
    }

    #[test]
    fn test_claims_extracted_and_deduped() {
        let answer = AnswerBody {
            general_profile: "Saturn returns test patience. Saturn returns test patience!".into(),
            strengths: vec!["Discipline".into()],
            watchouts: vec![],
            timing: vec![TimingWindow { range: "2025-2026".into(), note: None }],
            collective_note: None,
            secondary_refs: vec![],
        };
        let claims = extract_claims(&answer);
        assert_eq!(claims.len(), 3);
        assert_eq!(claims[1].1, "strengths[0]");
        assert_eq!(claims[2], ("2025-2026".to_string(), "timing[0]".to_string()));
    }

    #[test]
    fn test_supported_claims_score_high() {
        let docs = vec![
            doc("profection_basics", "Annual profections advance the ascendant one sign per year, and the ruler of that sign becomes the lord of the year."),
            doc("antiscia", "Antiscia reflect planets across the solstice axis."),
        ];
        let citations = CitationBuilder::new().build(&docs);
        let answer = AnswerBody {
            general_profile: "Annual profections advance the ascendant one sign per year.".into(),
            strengths: vec!["Quantum banana telescopes".into()],
            ..AnswerBody::default()
        };

        let report = aligner().score(&answer, &citations, &docs);
        assert!(report.reason.is_none());
        assert_eq!(report.claims.len(), 2);
        assert_eq!(report.claims[0].score, 1.0);
        assert_eq!(report.claims[0].doc_id.as_deref(), Some("profection_basics"));
        assert!(report.claims[1].score < 0.6);
        assert_eq!(report.supported_ratio, Some(0.5));
        assert!(report.breached(0.75));

        let mut cited = citations.clone();
        attach_spans(&mut cited, &report);
        assert!(cited[0].span.contains("profections"));
    }

    #[test]
    fn test_skip_reasons() {
        let answer = AnswerBody {
            general_profile: "Mars rules Aries.".into(),
            ..AnswerBody::default()
        };
        let a = aligner();
        assert_eq!(a.score(&AnswerBody::default(), &[], &[]).reason.as_deref(), Some("no_claims"));
        assert_eq!(a.score(&answer, &[], &[]).reason.as_deref(), Some("no_citations"));

        let citations = CitationBuilder::new().build(&[doc("mars", "Mars rules Aries.")]);
        let report = a.score(&answer, &citations, &[]);
        assert_eq!(report.reason.as_deref(), Some("no_documents"));
        assert!(!report.breached(0.75));
    }

    #[test]
    fn test_long_documents_use_windows() {
        let filler = "Lorem ipsum dolor sit amet consectetur. ".repeat(30);
        let content = format!("{}The lord of the year governs the annual themes.{}", filler, filler);
        let docs = vec![doc("long", &content)];
        let citations = CitationBuilder::new().build(&docs);
        let answer = AnswerBody {
            general_profile: "The lord of the year governs the annual themes.".into(),
            ..AnswerBody::default()
        };
        let report = aligner().score(&answer, &citations, &docs);
        assert_eq!(report.claims[0].score, 1.0);
        assert!(report.claims[0].span.as_deref().unwrap_or("").contains("lord"));
    }
}
