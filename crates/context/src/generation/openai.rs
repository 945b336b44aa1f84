//! OpenAI-compatible chat completions backend

use super::{ChatMessage, GenerationBackend, GenerationRequest, GenerationResponse};
use astrorag_common::config::ProviderConfig;
use astrorag_common::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const TEMPERATURE: f32 = 0.7;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

/// Backend speaking the `/chat/completions` protocol
pub struct OpenAiBackend {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiBackend {
    pub fn new(config: &ProviderConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            name: config.name.clone(),
            client,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key,
        })
    }

    fn unavailable(&self, message: String) -> AppError {
        AppError::ProviderUnavailable {
            provider: self.name.clone(),
            message,
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let body = ChatRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: TEMPERATURE,
            response_format: request.json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::ProviderTimeout {
                        provider: self.name.clone(),
                        timeout_ms: request.timeout.as_millis() as u64,
                    }
                } else {
                    self.unavailable(format!("Request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("API error {}: {}", status, body)));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| self.unavailable(format!("Failed to read response: {}", e)))?;
        let parsed: ChatResponse = serde_json::from_value(raw.clone())
            .map_err(|e| self.unavailable(format!("Failed to parse response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| self.unavailable("Empty response".to_string()))?;
        let tokens_used = parsed.usage.map(|u| u.total_tokens).unwrap_or(0);

        debug!(provider = %self.name, model = %request.model, tokens_used, "Chat completion received");

        Ok(GenerationResponse {
            content: choice.message.content.unwrap_or_default(),
            tokens_used,
            raw,
            finish_reason: choice.finish_reason,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
