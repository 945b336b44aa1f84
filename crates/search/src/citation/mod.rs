//! Citation building
//!
//! Turns retained retrieval results into answer citations:
//! - Locators (section, line range) from chunk metadata, else index-based
//! - Short snippets cut at a sentence or word boundary
//! - Per-source title/author/credibility lookups
//! - Paragraph coverage repair for backend-provided mappings

use crate::retrieval::{Metadata, RetrievalResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Maximum snippet length in characters
pub const SNIPPET_MAX_CHARS: usize = 100;

const MIN_CREDIBILITY: f64 = 0.5;
const SOURCE_KINDS: f64 = 4.0;

/// Known source metadata
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
    pub title: &'static str,
    pub author: &'static str,
    pub credibility: f64,
    pub kind: &'static str,
}

const SOURCES: &[(&str, SourceInfo)] = &[
    (
        "traditional_astrology",
        SourceInfo {
            title: "Traditional Astrological Principles",
            author: "Classical Sources",
            credibility: 0.9,
            kind: "traditional",
        },
    ),
    (
        "hellenistic_timing",
        SourceInfo {
            title: "Hellenistic Time-Lord Techniques",
            author: "Ancient Practitioners",
            credibility: 0.95,
            kind: "traditional",
        },
    ),
    (
        "persian_periods",
        SourceInfo {
            title: "Persian Firdaria System",
            author: "Medieval Persian Astrologers",
            credibility: 0.85,
            kind: "traditional",
        },
    ),
    (
        "essential_dignities",
        SourceInfo {
            title: "Essential Dignity Tables",
            author: "Traditional Compilation",
            credibility: 0.9,
            kind: "calculation",
        },
    ),
    (
        "hellenistic_foundations",
        SourceInfo {
            title: "Hellenistic Astrological Foundations",
            author: "Hellenistic Astrologers",
            credibility: 0.95,
            kind: "traditional",
        },
    ),
    (
        "traditional_techniques",
        SourceInfo {
            title: "Traditional Astrological Techniques",
            author: "Classical Methods",
            credibility: 0.85,
            kind: "traditional",
        },
    ),
    (
        "modern_synthesis",
        SourceInfo {
            title: "Modern Psychological Synthesis",
            author: "Contemporary Practitioners",
            credibility: 0.7,
            kind: "modern",
        },
    ),
];

/// Look up a known source by key
pub fn source_info(key: &str) -> Option<&'static SourceInfo> {
    SOURCES.iter().find(|(k, _)| *k == key).map(|(_, info)| info)
}

/// One answer citation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitationEntry {
    /// 1-based citation number
    pub n: usize,
    /// `cite_{source_id}_{hash8}`
    pub id: String,
    pub doc_id: String,
    pub section: u32,
    pub line_start: u32,
    pub line_end: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraph: Option<usize>,
    /// Supporting text found during claim alignment
    #[serde(default)]
    pub span: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tradition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default)]
    pub credibility: f64,
    #[serde(default)]
    pub source_type: String,
}

/// Citation quality report
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CitationValidation {
    pub total_citations: usize,
    pub valid_citations: usize,
    pub missing_titles: usize,
    pub missing_authors: usize,
    pub low_credibility: usize,
    pub average_credibility: f64,
    pub source_types: BTreeMap<String, usize>,
    pub issues: Vec<String>,
}

/// Builds citations from retrieval results
#[derive(Debug, Clone, Default)]
pub struct CitationBuilder;

impl CitationBuilder {
    pub fn new() -> Self {
        Self
    }

    /// One citation per result, in result order
    pub fn build(&self, results: &[RetrievalResult]) -> Vec<CitationEntry> {
        results
            .iter()
            .enumerate()
            .map(|(index, result)| self.build_one(index, result))
            .collect()
    }

    fn build_one(&self, index: usize, result: &RetrievalResult) -> CitationEntry {
        let source = result.meta_str("source").map(str::to_string);
        let info = source.as_deref().and_then(source_info);
        let (section, line_start, line_end) = locator(&result.metadata, index);

        CitationEntry {
            n: index + 1,
            id: citation_id(&result.source_id, &result.content),
            doc_id: result.source_id.clone(),
            section,
            line_start,
            line_end,
            paragraph: None,
            span: String::new(),
            title: Some(
                info.map(|i| i.title.to_string())
                    .or_else(|| result.meta_str("title").map(str::to_string))
                    .unwrap_or_else(|| format!("Source {}", index + 1)),
            ),
            source,
            tradition: result
                .meta_str("tradition")
                .map(str::to_string)
                .or_else(|| info.map(|i| i.kind.to_string())),
            language: result.language().map(str::to_string),
            source_url: result.meta_str("source_url").map(str::to_string),
            snippet: Some(snippet(&result.content)),
            credibility: info.map(|i| i.credibility).unwrap_or(MIN_CREDIBILITY),
            source_type: info.map(|i| i.kind).unwrap_or("unknown").to_string(),
        }
    }

    /// Check titles and credibility; missing authors are counted, not flagged
    pub fn validate_citations(&self, citations: &[CitationEntry]) -> CitationValidation {
        let mut report = CitationValidation {
            total_citations: citations.len(),
            ..Default::default()
        };

        if citations.is_empty() {
            report.issues.push("No citations provided".to_string());
            return report;
        }

        for citation in citations {
            let mut valid = true;

            if citation.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
                report.missing_titles += 1;
                report.issues.push(format!("Citation {} missing title", citation.id));
                valid = false;
            }
            let has_author = citation
                .source
                .as_deref()
                .and_then(source_info)
                .is_some();
            if !has_author {
                report.missing_authors += 1;
            }
            if citation.credibility < MIN_CREDIBILITY {
                report.low_credibility += 1;
                report.issues.push(format!(
                    "Citation {} has low credibility ({})",
                    citation.id, citation.credibility
                ));
            }
            *report.source_types.entry(citation.source_type.clone()).or_insert(0) += 1;
            if valid {
                report.valid_citations += 1;
            }
        }

        report.average_credibility = credibility_score(citations);
        report
    }
}

/// Mean credibility; zero for no citations
pub fn credibility_score(citations: &[CitationEntry]) -> f64 {
    if citations.is_empty() {
        return 0.0;
    }
    citations.iter().map(|c| c.credibility).sum::<f64>() / citations.len() as f64
}

/// Distinct source types over the four known kinds, capped at 1.0
pub fn source_diversity(citations: &[CitationEntry]) -> f64 {
    if citations.is_empty() {
        return 0.0;
    }
    let kinds: HashSet<&str> = citations.iter().map(|c| c.source_type.as_str()).collect();
    (kinds.len() as f64 / SOURCE_KINDS).min(1.0)
}

/// Stable citation id from source id and content
pub fn citation_id(source_id: &str, content: &str) -> String {
    let digest = hex::encode(Sha256::digest(content.as_bytes()));
    format!("cite_{}_{}", source_id, &digest[..8])
}

/// Short preview; the first sentence when it fits, else a word-boundary cut
pub fn snippet(content: &str) -> String {
    if content.chars().count() <= SNIPPET_MAX_CHARS {
        return content.to_string();
    }

    let first = content.split(". ").next().unwrap_or(content);
    if first.chars().count() <= SNIPPET_MAX_CHARS - 1 {
        return format!("{}.", first.trim_end_matches('.'));
    }

    let budget = SNIPPET_MAX_CHARS - 3;
    let mut out = String::new();
    for word in first.split_whitespace() {
        let needed = if out.is_empty() { word.chars().count() } else { out.chars().count() + 1 + word.chars().count() };
        if needed > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.is_empty() {
        out = first.chars().take(budget).collect();
    }
    out.push_str("...");
    out
}

fn meta_int(metadata: &Metadata, key: &str) -> Option<u32> {
    match metadata.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Section and line range; falls back to the result index and a zero range
fn locator(metadata: &Metadata, index: usize) -> (u32, u32, u32) {
    let fallback = u32::try_from(index).unwrap_or(u32::MAX);
    let section = meta_int(metadata, "section")
        .or_else(|| meta_int(metadata, "chunk_index"))
        .unwrap_or(fallback);
    let line_start = meta_int(metadata, "line_start").unwrap_or(0);
    let line_end = meta_int(metadata, "line_end").unwrap_or(0).max(line_start);
    (section, line_start, line_end)
}

/// Non-empty paragraphs of an answer, split on blank lines
pub fn paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n").filter(|p| !p.trim().is_empty()).collect()
}

/// Ensure every non-empty paragraph is referenced by at least one citation.
///
/// Out-of-range paragraph indices are cleared. Unmapped paragraphs are
/// assigned round-robin: an unassigned citation takes the paragraph, an
/// already-assigned one is duplicated so its own mapping is kept. Returns the
/// repaired list and the paragraph indices that were back-filled.
pub fn ensure_paragraph_coverage(
    answer_text: &str,
    citations: Vec<CitationEntry>,
) -> (Vec<CitationEntry>, Vec<usize>) {
    let count = paragraphs(answer_text).len();
    if count == 0 || citations.is_empty() {
        return (citations, Vec::new());
    }

    let mut normalized: Vec<CitationEntry> = citations
        .into_iter()
        .map(|mut c| {
            if c.paragraph.is_some_and(|p| p >= count) {
                c.paragraph = None;
            }
            c
        })
        .collect();
    let assigned: BTreeSet<usize> = normalized.iter().filter_map(|c| c.paragraph).collect();
    let originals = normalized.len();

    let mut backfilled = Vec::new();
    let mut cursor = 0usize;
    for paragraph in (0..count).filter(|p| !assigned.contains(p)) {
        let target = cursor % originals;
        cursor += 1;
        if normalized[target].paragraph.is_none() {
            normalized[target].paragraph = Some(paragraph);
        } else {
            let mut copy = normalized[target].clone();
            copy.paragraph = Some(paragraph);
            normalized.push(copy);
        }
        backfilled.push(paragraph);
    }

    (normalized, backfilled)
}
