//! Deterministic backend for local runs and tests

use super::prompt::DRAFT_MARKER;
use super::{GenerationBackend, GenerationRequest, GenerationResponse};
use astrorag_common::errors::{AppError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Reply with fixed content
    Reply(String),
    /// Fail with a provider error
    Fail(String),
    /// Sleep, then run the inner step
    Delay(Duration, Box<ScriptStep>),
    /// Reply with the draft embedded in the user prompt
    Echo,
}

/// Replays a queue of steps; the last step repeats once the queue drains
pub struct ScriptedBackend {
    name: String,
    steps: Mutex<VecDeque<ScriptStep>>,
    last: Mutex<ScriptStep>,
    calls: AtomicUsize,
    models: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(name: &str, steps: Vec<ScriptStep>) -> Self {
        let last = steps.last().cloned().unwrap_or(ScriptStep::Echo);
        Self {
            name: name.to_string(),
            steps: Mutex::new(steps.into()),
            last: Mutex::new(last),
            calls: AtomicUsize::new(0),
            models: Mutex::new(Vec::new()),
        }
    }

    pub fn echo(name: &str) -> Self {
        Self::new(name, vec![ScriptStep::Echo])
    }

    pub fn failing(name: &str) -> Self {
        Self::new(name, vec![ScriptStep::Fail("scripted outage".to_string())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Models requested so far, in call order
    pub fn models(&self) -> Vec<String> {
        self.models.lock().clone()
    }

    fn next_step(&self) -> ScriptStep {
        match self.steps.lock().pop_front() {
            Some(step) => {
                *self.last.lock() = step.clone();
                step
            }
            None => self.last.lock().clone(),
        }
    }

    fn respond(&self, content: String) -> GenerationResponse {
        let tokens = (content.len() / 4) as u64;
        GenerationResponse {
            raw: json!({ "provider": self.name, "usage": { "total_tokens": tokens } }),
            content,
            tokens_used: tokens,
            finish_reason: Some("stop".to_string()),
        }
    }
}

fn echo_draft(request: &GenerationRequest) -> String {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .and_then(|m| m.content.split_once(DRAFT_MARKER))
        .map(|(_, draft)| draft.trim().to_string())
        .unwrap_or_else(|| "{}".to_string())
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.models.lock().push(request.model.clone());

        let mut step = self.next_step();
        loop {
            match step {
                ScriptStep::Reply(content) => return Ok(self.respond(content)),
                ScriptStep::Echo => return Ok(self.respond(echo_draft(request))),
                ScriptStep::Fail(message) => {
                    return Err(AppError::ProviderUnavailable {
                        provider: self.name.clone(),
                        message,
                    })
                }
                ScriptStep::Delay(wait, inner) => {
                    tokio::time::sleep(wait).await;
                    step = *inner;
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ChatMessage;

    fn request(user: &str) -> GenerationRequest {
        GenerationRequest {
            messages: vec![ChatMessage::system("sys"), ChatMessage::user(user)],
            model: "gpt-4o-mini".to_string(),
            json_mode: true,
            max_tokens: 256,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_echo_returns_draft() {
        let backend = ScriptedBackend::echo("local");
        let prompt = format!("Mode: natal\n{}\n{{\"answer\":{{}}}}", DRAFT_MARKER);
        let response = backend.generate(&request(&prompt)).await.unwrap();
        assert_eq!(response.content, "{\"answer\":{}}");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_steps_replay_then_repeat_last() {
        let backend = ScriptedBackend::new(
            "local",
            vec![ScriptStep::Fail("down".into()), ScriptStep::Reply("ok".into())],
        );
        assert!(backend.generate(&request("q")).await.is_err());
        assert_eq!(backend.generate(&request("q")).await.unwrap().content, "ok");
        assert_eq!(backend.generate(&request("q")).await.unwrap().content, "ok");
        assert_eq!(backend.models().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_then_reply() {
        let backend = ScriptedBackend::new(
            "slow",
            vec![ScriptStep::Delay(Duration::from_secs(5), Box::new(ScriptStep::Reply("late".into())))],
        );
        let response = backend.generate(&request("q")).await.unwrap();
        assert_eq!(response.content, "late");
    }
}
