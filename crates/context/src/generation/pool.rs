//! Provider pool with per-entry cooldown
//!
//! A provider is available iff it has never failed or its cooldown has
//! elapsed since the last failure. Success resets the retry counter.

use super::{GenerationBackend, GenerationRequest, GenerationResponse};
use astrorag_common::errors::{AppError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One registered provider
pub struct ProviderEntry {
    name: String,
    backend: Arc<dyn GenerationBackend>,
    cooldown: Duration,
    last_failure: Mutex<Option<Instant>>,
    retry_count: AtomicU32,
}

impl ProviderEntry {
    pub fn new(name: impl Into<String>, cooldown: Duration, backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            name: name.into(),
            backend,
            cooldown,
            last_failure: Mutex::new(None),
            retry_count: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    pub fn is_available(&self) -> bool {
        match *self.last_failure.lock() {
            None => true,
            Some(at) => at.elapsed() >= self.cooldown,
        }
    }

    fn mark_failure(&self) {
        *self.last_failure.lock() = Some(Instant::now());
        self.retry_count.fetch_add(1, Ordering::SeqCst);
    }

    fn mark_success(&self) {
        self.retry_count.store(0, Ordering::SeqCst);
    }
}

/// Ordered set of providers
pub struct ProviderPool {
    entries: Vec<Arc<ProviderEntry>>,
}

impl ProviderPool {
    pub fn new(entries: Vec<ProviderEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn from_backends(backends: Vec<(String, Duration, Arc<dyn GenerationBackend>)>) -> Self {
        Self::new(
            backends
                .into_iter()
                .map(|(name, cooldown, backend)| ProviderEntry::new(name, cooldown, backend))
                .collect(),
        )
    }

    pub fn entry(&self, name: &str) -> Option<&Arc<ProviderEntry>> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Providers not cooling down, in registration order
    pub fn available(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.is_available())
            .map(|e| e.name.clone())
            .collect()
    }

    /// Call one named provider, bounded by the request timeout
    pub async fn generate_with(&self, name: &str, request: &GenerationRequest) -> Result<GenerationResponse> {
        let entry = self.entry(name).ok_or_else(|| AppError::ProviderUnavailable {
            provider: name.to_string(),
            message: "not registered".to_string(),
        })?;

        if !entry.is_available() {
            return Err(AppError::ProviderUnavailable {
                provider: name.to_string(),
                message: "cooling down".to_string(),
            });
        }

        let outcome = match tokio::time::timeout(request.timeout, entry.backend.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::ProviderTimeout {
                provider: name.to_string(),
                timeout_ms: request.timeout.as_millis() as u64,
            }),
        };

        match &outcome {
            Ok(_) => {
                entry.mark_success();
                debug!(provider = name, "Provider call succeeded");
            }
            Err(e) => {
                entry.mark_failure();
                warn!(provider = name, error = %e, retries = entry.retry_count(), "Provider call failed");
            }
        }
        outcome
    }

    /// Try every available provider in order
    pub async fn generate(&self, request: &GenerationRequest) -> Result<(String, GenerationResponse)> {
        let mut errors = Vec::new();
        for name in self.available() {
            match self.generate_with(&name, request).await {
                Ok(response) => return Ok((name, response)),
                Err(e) => errors.push(format!("{}: {}", name, e)),
            }
        }
        Err(AppError::GenerationExhausted {
            message: if errors.is_empty() {
                "no provider available".to_string()
            } else {
                errors.join("; ")
            },
        })
    }
}
