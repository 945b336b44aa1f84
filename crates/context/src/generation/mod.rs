//! Generation layer
//!
//! Provides:
//! - Backend abstraction over OpenAI-compatible and scripted providers
//! - Provider pool with per-entry cooldowns
//! - Rolling provider health
//! - Intent, confidence and tier routing
//! - Prompt building and output repair
//! - The orchestrator that ties them together

mod health;
mod openai;
mod orchestrator;
mod pool;
mod prompt;
mod repair;
mod routing;
mod scripted;

pub use health::ProviderHealthMonitor;
pub use openai::OpenAiBackend;
pub use orchestrator::{GenerationOrchestrator, RevisionInput, RoutingDecision, RoutingOutcome};
pub use pool::{ProviderEntry, ProviderPool};
pub use prompt::{PromptBuilder, PromptContext, Style, ToneAdapter};
pub use repair::{repair_output, validate_payload, RepairedOutput};
pub use routing::{
    ConfidenceEstimator, ConfidenceLevel, IntentClass, IntentClassifier, ModelProfile, ModelSelector,
    ModelTier,
};
pub use scripted::{ScriptStep, ScriptedBackend};

use astrorag_common::config::AppConfig;
use astrorag_common::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Chat message sent to a backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub json_mode: bool,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Raw backend reply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationResponse {
    pub content: String,
    pub tokens_used: u64,
    /// Full provider payload, kept for usage and cost extraction
    pub raw: Value,
    pub finish_reason: Option<String>,
}

/// A text-generation backend
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse>;

    fn name(&self) -> &str;
}

/// Cost reported by a provider payload, top level first, then under `usage`
pub fn extract_cost_usd(raw: &Value) -> Option<f64> {
    const TOP: [&str; 3] = ["cost_usd", "total_cost_usd", "cost"];
    const USAGE: [&str; 4] = ["cost_usd", "total_cost_usd", "cost", "total_cost"];

    let number = |v: &Value| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    };

    TOP.iter()
        .filter_map(|k| raw.get(*k))
        .find_map(number)
        .or_else(|| {
            let usage = raw.get("usage")?;
            USAGE.iter().filter_map(|k| usage.get(*k)).find_map(number)
        })
}

/// Build one backend per configured provider
///
/// An `openai` provider without a key is replaced by a scripted echo backend
/// so local runs still exercise the routing ladder.
pub fn create_backends(config: &AppConfig) -> Result<Vec<(String, Duration, Arc<dyn GenerationBackend>)>> {
    let mut backends: Vec<(String, Duration, Arc<dyn GenerationBackend>)> = Vec::new();
    for provider in &config.providers {
        let backend: Arc<dyn GenerationBackend> = match (provider.kind.as_str(), provider.api_key.as_ref()) {
            ("openai", Some(key)) => Arc::new(OpenAiBackend::new(provider, key.clone())?),
            ("openai", None) => {
                warn!(provider = %provider.name, "No API key configured, using scripted echo backend");
                Arc::new(ScriptedBackend::echo(&provider.name))
            }
            ("scripted", _) => Arc::new(ScriptedBackend::echo(&provider.name)),
            (other, _) => {
                warn!(provider = %provider.name, kind = other, "Unknown provider kind, using scripted echo backend");
                Arc::new(ScriptedBackend::echo(&provider.name))
            }
        };
        backends.push((provider.name.clone(), provider.cooldown(), backend));
    }
    Ok(backends)
}
