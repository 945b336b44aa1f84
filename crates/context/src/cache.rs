//! Semantic answer cache
//!
//! Keyed by a request fingerprint, storing the serialized response so a hit
//! returns the exact bytes served the first time. The backend is picked once
//! at startup.

use crate::schema::{AnswerRequest, Mode};
use astrorag_common::cache::{keys, Cache, CacheConfig};
use astrorag_common::config::AppConfig;
use astrorag_common::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::sync::Cache as MokaCache;
use moka::Expiry;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[async_trait]
pub trait SemanticCache: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Result<Option<String>>;

    async fn set(&self, fingerprint: &str, body: &str, ttl: Duration) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Stable hash of the fields that determine an answer
pub fn fingerprint(request: &AnswerRequest, mode: Mode) -> String {
    let profile = request.subject_profile.as_ref();
    let mut fields = BTreeMap::new();
    fields.insert("query", request.query.trim().to_string());
    fields.insert("mode", mode.as_str().to_string());
    fields.insert("locale", request.locale.locale.as_str().to_string());
    fields.insert(
        "date",
        profile.map(|p| p.date.clone()).unwrap_or_else(|| "no-date".to_string()),
    );
    fields.insert(
        "time",
        profile
            .and_then(|p| p.time.clone())
            .unwrap_or_else(|| "no-time".to_string()),
    );
    fields.insert(
        "lat",
        profile.map(|p| p.lat.to_string()).unwrap_or_else(|| "no-lat".to_string()),
    );
    fields.insert(
        "lng",
        profile.map(|p| p.lng.to_string()).unwrap_or_else(|| "no-lng".to_string()),
    );

    let canonical = serde_json::to_string(&fields).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

#[derive(Debug, Clone)]
struct CachedAnswer {
    body: Arc<str>,
    written_at: DateTime<Utc>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CachedAnswer> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &CachedAnswer, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedAnswer,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache with per-entry TTL
pub struct MemorySemanticCache {
    entries: MokaCache<String, CachedAnswer>,
}

impl MemorySemanticCache {
    pub fn new(max_entries: u64) -> Self {
        let entries = MokaCache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self { entries }
    }

    /// Write time of a live entry
    pub fn written_at(&self, fingerprint: &str) -> Option<DateTime<Utc>> {
        self.entries.get(fingerprint).map(|e| e.written_at)
    }
}

#[async_trait]
impl SemanticCache for MemorySemanticCache {
    async fn get(&self, fingerprint: &str) -> Result<Option<String>> {
        let hit = self.entries.get(fingerprint).map(|e| e.body.to_string());
        debug!(fingerprint, hit = hit.is_some(), "Memory cache lookup");
        Ok(hit)
    }

    async fn set(&self, fingerprint: &str, body: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            fingerprint.to_string(),
            CachedAnswer {
                body: Arc::from(body),
                written_at: Utc::now(),
                ttl,
            },
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Redis-backed cache
pub struct RedisSemanticCache {
    cache: Cache,
}

impl RedisSemanticCache {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl SemanticCache for RedisSemanticCache {
    async fn get(&self, fingerprint: &str) -> Result<Option<String>> {
        self.cache.get_raw(&keys::answer(fingerprint)).await
    }

    async fn set(&self, fingerprint: &str, body: &str, ttl: Duration) -> Result<()> {
        self.cache
            .set_raw(&keys::answer(fingerprint), body, ttl.as_secs().max(1))
            .await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Pick the cache backend from configuration
///
/// An unreachable Redis falls back to the in-process cache.
pub async fn create_semantic_cache(config: &AppConfig) -> Arc<dyn SemanticCache> {
    let memory = || -> Arc<dyn SemanticCache> { Arc::new(MemorySemanticCache::new(config.cache.max_entries)) };

    if !config.uses_redis_cache() {
        return memory();
    }
    let Some(url) = config.redis.url.clone() else {
        return memory();
    };

    let redis_config = CacheConfig {
        url,
        default_ttl_secs: config.cache.ttl_secs,
        op_timeout: Duration::from_millis(config.redis.timeout_ms),
        key_prefix: config.cache.key_prefix.clone(),
    };
    match Cache::new(redis_config).await {
        Ok(cache) => Arc::new(RedisSemanticCache::new(cache)),
        Err(e) => {
            warn!(error = %e, "Redis cache unavailable, using in-memory cache");
            memory()
        }
    }
}
