//! Draft composition and guardrail notes

use crate::alignment::AlignmentReport;
use crate::coverage::CoverageReport;
use crate::degrade::DegradeDecision;
use crate::evidence::EvidencePack;
use crate::profile::ThemeSummary;
use crate::quality::QualityReport;
use crate::schema::{AnswerBody, AnswerLimits, AnswerPayload};
use astrorag_common::text::truncate_chars;
use astrorag_search::CitationEntry;

const EVIDENCE_NOTE_CHARS: usize = 120;
const EVIDENCE_SENTENCES: usize = 3;

struct Phrases {
    strength: &'static str,
    watchout: &'static str,
    evidence_note: &'static str,
    collective: &'static str,
    collective_conflict: &'static str,
    mythic: &'static str,
}

const EN: Phrases = Phrases {
    strength: "Chart shows resilient mindset and adaptability.",
    watchout: "Monitor collective outer planet transits for broader shifts.",
    evidence_note: "Key note from sources: ",
    collective: "This interpretation is built on general astrological principles.",
    collective_conflict: "These influences carry generational or collective tones; filter them at a personal level.",
    mythic: "Saturn = Kronos, lord of time.",
};

const TR: Phrases = Phrases {
    strength: "Harita, dayanıklı bir zihin yapısı ve uyum yeteneği gösteriyor.",
    watchout: "Daha geniş değişimler için kolektif dış gezegen transitlerini izleyin.",
    evidence_note: "Kaynaklardan öne çıkan not: ",
    collective: "Bu yorum, genel astrolojik ilkeler temel alınarak oluşturuldu.",
    collective_conflict: "Bu etkiler jenerasyonel veya kolektif tonlar içerir; kişisel düzeyde filtreleyin.",
    mythic: "Satürn = Kronos, zamanın efendisi.",
};

fn phrases(language: &str) -> &'static Phrases {
    if language == "tr" {
        &TR
    } else {
        &EN
    }
}

/// Everything the draft is composed from
pub struct DraftInput<'a> {
    pub query: &'a str,
    pub language: &'a str,
    pub theme: &'a ThemeSummary,
    pub evidence: &'a EvidencePack,
    pub citations: Vec<CitationEntry>,
    pub coverage: &'a CoverageReport,
    pub latency_budget_ms: u64,
}

fn mentions_saturn(theme: &ThemeSummary, query: &str) -> bool {
    let lowered = query.to_lowercase();
    lowered.contains("saturn")
        || lowered.contains("satürn")
        || theme.main_elements.iter().any(|e| e == "saturn")
}

/// Compose the pre-generation answer from the theme summary and evidence
pub fn compose_draft(input: DraftInput<'_>) -> AnswerPayload {
    let words = phrases(input.language);
    let theme = input.theme;

    let mut opening = theme.summary.clone();
    if !theme.supporting_elements.is_empty() {
        let supporting = theme.supporting_elements.join(", ");
        opening.push_str(&if input.language == "tr" {
            format!(" Destekleyici temalar: {}.", supporting)
        } else {
            format!(" Supporting themes include {}.", supporting)
        });
    }

    let evidence: Vec<String> = input
        .citations
        .iter()
        .take(EVIDENCE_SENTENCES)
        .filter_map(|c| c.snippet.as_ref().map(|s| format!("{} [{}]", s.trim(), c.n)))
        .collect();
    let general_profile = if evidence.is_empty() {
        opening
    } else {
        format!("{}\n\n{}", opening, evidence.join(" "))
    };

    let strengths = if theme.strengths.is_empty() {
        vec![words.strength.to_string()]
    } else {
        theme.strengths.clone()
    };

    let mut watchouts = if theme.warnings.is_empty() {
        vec![words.watchout.to_string()]
    } else {
        theme.warnings.clone()
    };
    if let Some(first) = input.evidence.documents.first() {
        watchouts.push(format!(
            "{}{}...",
            words.evidence_note,
            truncate_chars(&first.snippet, EVIDENCE_NOTE_CHARS)
        ));
    }

    let collective_note = if input.evidence.conflicts.is_empty() {
        words.collective
    } else {
        words.collective_conflict
    };

    let secondary_refs = if mentions_saturn(theme, input.query) {
        vec![words.mythic.to_string()]
    } else {
        Vec::new()
    };

    let has_snippets = !input.evidence.documents.is_empty();
    let coverage_ok = input.coverage.passed;
    let confidence = theme.confidence * (0.5 + 0.5 * input.coverage.score);

    AnswerPayload {
        answer: AnswerBody {
            general_profile,
            strengths,
            watchouts,
            timing: theme.timing.clone(),
            collective_note: Some(collective_note.to_string()),
            secondary_refs,
        },
        citations: input.citations,
        confidence: (confidence * 1000.0).round() / 1000.0,
        limits: AnswerLimits {
            coverage_ok,
            hallucination_risk: if coverage_ok && has_snippets { "low" } else { "medium" }.to_string(),
            latency_budget_ms: input.latency_budget_ms,
            coverage_score: Some(input.coverage.score),
            ..AnswerLimits::default()
        },
        evidence_summary: input.evidence.summary(),
    }
}

/// Inputs for the guardrail note catalogue
pub struct GuardrailInput<'a> {
    pub payload: &'a AnswerPayload,
    pub coverage: &'a CoverageReport,
    pub degrade: &'a DegradeDecision,
    pub quality: &'a QualityReport,
    pub fallback_served: bool,
    pub alignment: &'a AlignmentReport,
    pub breach_threshold: f64,
    pub upgrade_requested: bool,
    pub evidence: &'a EvidencePack,
    pub backfilled: &'a [usize],
    pub retrieval_failures: &'a [String],
    pub revision_note: Option<&'a str>,
}

/// Human-readable notes describing every guardrail that fired
pub fn guardrail_notes(input: &GuardrailInput<'_>) -> Vec<String> {
    let mut notes = Vec::new();

    if input.payload.citations.is_empty() {
        notes.push("No citations attached; coverage considered partial.".to_string());
    }
    if input.payload.limits.hallucination_risk != "low" {
        notes.push("Hallucination risk unknown; user guidance recommended.".to_string());
    }
    notes.extend(input.coverage.issues.iter().cloned());
    notes.extend(
        input
            .retrieval_failures
            .iter()
            .map(|f| format!("Retrieval backend degraded: {}", f)),
    );

    if input.degrade.active {
        notes.push(format!("Degrade mode active: {}", input.degrade.reasons.join(", ")));
        if let Some(p95) = input.degrade.flags.latency_p95_ms {
            notes.push(format!("Observed rag_latency_p95={:.0} ms during degrade window.", p95));
        }
    }

    if !input.quality.passed {
        let issues = input.quality.issues.join(", ");
        notes.push(format!("Quality filter flagged: {}", issues));
        if input.fallback_served {
            notes.push(format!("Template fallback served due to: {}", issues));
        }
    }

    let alignment = input.alignment;
    match alignment.reason.as_deref() {
        Some("no_citations") => notes.push("Claim alignment skipped: no citations available.".to_string()),
        Some("no_documents") => notes.push("Claim alignment skipped: no documents available.".to_string()),
        Some("no_claims") => notes.push("Claim alignment skipped: no claims detected.".to_string()),
        _ => {
            if let Some(score) = alignment.score.filter(|s| *s < input.breach_threshold) {
                notes.push(format!(
                    "Citation alignment below threshold ({:.2}); observed {:.2}.",
                    input.breach_threshold, score
                ));
            }
            if let Some(ratio) = alignment.supported_ratio.filter(|r| *r < input.breach_threshold) {
                notes.push(format!(
                    "Only {:.2} of claims meet support threshold (≥{:.2}).",
                    ratio, alignment.threshold
                ));
            }
        }
    }
    if input.upgrade_requested {
        notes.push("Citation alignment breach detected; upgrade requested.".to_string());
    }

    if let Some(note) = input.revision_note {
        notes.push(format!("Backend output needed repair: {}", note));
    }

    for conflict in &input.evidence.conflicts {
        notes.push(format!(
            "Conflict detected on topic '{}': {}",
            conflict.topic, conflict.summary
        ));
    }
    for paragraph in input.backfilled {
        notes.push(format!(
            "Paragraph {} had no citation; one was assigned round-robin.",
            paragraph + 1
        ));
    }

    notes
}
