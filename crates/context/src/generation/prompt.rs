//! Prompt construction and tone styling

use super::routing::IntentClass;
use super::ChatMessage;
use crate::evidence::Conflict;
use crate::schema::{AbProfile, UserLevel};
use serde_json::Value;

/// Separates the prompt body from the draft the backend should revise
pub const DRAFT_MARKER: &str = "Draft JSON:";

const SYSTEM_EN: &str = "You are an expert astrologer who writes grounded, cited analysis.";
const SYSTEM_TR: &str = "Temellere dayanan, kaynak gösteren uzman bir astrologsun.";
const COVERAGE_GAP_NOTE: &str = "Flag gaps openly, invite the user to request more details.";

/// Answer register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Technical,
    Accessible,
    Brief,
    Detailed,
}

impl Style {
    pub fn pick(profile: AbProfile, level: UserLevel) -> Self {
        match (profile, level) {
            (AbProfile::CostFirst, _) => Style::Brief,
            (AbProfile::QualityFirst, _) => Style::Detailed,
            (_, UserLevel::Advanced) => Style::Technical,
            _ => Style::Accessible,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Technical => "technical",
            Style::Accessible => "accessible",
            Style::Brief => "brief",
            Style::Detailed => "detailed",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Style::Technical => "Use precise terminology and assume advanced knowledge.",
            Style::Accessible => "Use clear, encouraging language suitable for intermediate students.",
            Style::Brief => "Respond concisely, focusing on the key points.",
            Style::Detailed => "Provide a thorough, structured explanation with context and nuance.",
        }
    }
}

/// Everything the prompt needs from the pipeline
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub mode: &'a str,
    pub language: &'a str,
    pub style: Style,
    pub coverage_score: f64,
    pub coverage_passed: bool,
    pub summary: &'a str,
    pub conflicts: &'a [Conflict],
    pub draft: &'a Value,
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn system_prompt(&self, language: &str, style: Style) -> String {
        let base = if language == "tr" { SYSTEM_TR } else { SYSTEM_EN };
        format!("{} {}", base, style.instruction())
    }

    pub fn user_prompt(&self, ctx: &PromptContext<'_>) -> String {
        let mut requirements = vec![
            "Return a single JSON object with keys answer, citations, confidence, limits.",
            "Keep every claim tied to a numbered citation from the draft.",
            "Do not invent sources that are not in the draft.",
        ];
        if !ctx.coverage_passed {
            requirements.push(COVERAGE_GAP_NOTE);
        }

        let mut prompt = format!(
            "Mode: {}\nStyle: {}\nCoverage Score: {:.2}\nConflicts: {}\nSummary: {}\n\nRequirements:\n",
            ctx.mode,
            ctx.style.as_str(),
            ctx.coverage_score,
            ctx.conflicts.len(),
            ctx.summary
        );
        for requirement in requirements {
            prompt.push_str(&format!("- {}\n", requirement));
        }

        if !ctx.conflicts.is_empty() {
            prompt.push_str("\nConflicts:\n");
            for conflict in ctx.conflicts {
                prompt.push_str(&format!("- {}: {}\n", conflict.topic, conflict.summary));
            }
        }

        prompt.push_str(&format!("\n{}\n{}", DRAFT_MARKER, ctx.draft));
        prompt
    }

    pub fn messages(&self, ctx: &PromptContext<'_>, tone: Option<&str>) -> Vec<ChatMessage> {
        let system = self.system_prompt(ctx.language, ctx.style);
        let system = match tone {
            Some(prefix) => format!("{} {}", prefix, system),
            None => system,
        };
        vec![ChatMessage::system(system), ChatMessage::user(self.user_prompt(ctx))]
    }
}

/// Lightweight adapter-style tone prefix keyed on intent
#[derive(Debug, Clone, Copy)]
pub struct ToneAdapter {
    enabled: bool,
}

impl ToneAdapter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn prefix(&self, class: IntentClass) -> Option<&'static str> {
        if !self.enabled {
            return None;
        }
        Some(match class {
            IntentClass::Simple => "Maintain an encouraging and structured tone.",
            _ => "Adopt a precise, technical tone with explicit citations.",
        })
    }
}
