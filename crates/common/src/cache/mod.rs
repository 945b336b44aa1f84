//! Redis cache integration
//!
//! Provides:
//! - Multiplexed connection management
//! - Generic get/set operations with TTL
//! - A bounded timeout on every round-trip

use crate::errors::{AppError, Result};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Redis cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL (redis://host:port)
    pub url: String,
    /// Default TTL in seconds
    pub default_ttl_secs: u64,
    /// Timeout applied to each command
    pub op_timeout: Duration,
    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            default_ttl_secs: 604_800,
            op_timeout: Duration::from_millis(250),
            key_prefix: "astrorag".to_string(),
        }
    }
}

/// Redis cache client
///
/// The multiplexed connection pipelines concurrent commands over one socket,
/// so each operation works on its own clone of the handle.
#[derive(Clone)]
pub struct Cache {
    connection: MultiplexedConnection,
    config: CacheConfig,
}

impl Cache {
    /// Create a new cache client
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = bounded(
            config.op_timeout,
            "connect",
            client.get_multiplexed_async_connection(),
        )
        .await?
        .map_err(|e| AppError::CacheError {
            message: format!("Failed to connect to Redis: {}", e),
        })?;

        Ok(Self {
            connection,
            config,
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    /// Default TTL in seconds
    pub fn default_ttl_secs(&self) -> u64 {
        self.config.default_ttl_secs
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key).await? {
            Some(json) => {
                let parsed = serde_json::from_str(&json).map_err(|e| AppError::CacheError {
                    message: format!("Failed to parse cached value: {}", e),
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Get the stored string for a key
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let value: Option<String> = bounded(self.config.op_timeout, "get", conn.get::<_, Option<String>>(&full_key))
            .await?
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to get key '{}': {}", full_key, e),
            })?;

        if value.is_some() {
            debug!(key = %full_key, "Cache hit");
        } else {
            debug!(key = %full_key, "Cache miss");
        }
        Ok(value)
    }

    /// Set a value in cache with default TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, self.config.default_ttl_secs).await
    }

    /// Set a value in cache with custom TTL
    pub async fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
            message: format!("Failed to serialize value: {}", e),
        })?;
        self.set_raw(key, &json, ttl_secs).await
    }

    /// Store a pre-serialized string with a TTL
    pub async fn set_raw(&self, key: &str, json: &str, ttl_secs: u64) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        bounded(
            self.config.op_timeout,
            "set",
            conn.set_ex::<_, _, ()>(&full_key, json, ttl_secs),
        )
        .await?
        .map_err(|e| AppError::CacheError {
            message: format!("Failed to set key '{}': {}", full_key, e),
        })?;

        debug!(key = %full_key, ttl_secs, "Cache set");
        Ok(())
    }

    /// Delete a key from cache
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let deleted: i32 = bounded(self.config.op_timeout, "del", conn.del::<_, i32>(&full_key))
            .await?
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to delete key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, deleted = deleted > 0, "Cache delete");
        Ok(deleted > 0)
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        bounded(
            self.config.op_timeout,
            "ping",
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await?
        .map_err(|e| AppError::CacheError {
            message: format!("Redis ping failed: {}", e),
        })?;
        Ok(())
    }
}

async fn bounded<F: Future>(limit: Duration, op: &str, fut: F) -> Result<F::Output> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AppError::CacheError {
            message: format!("Redis {} timed out after {}ms", op, limit.as_millis()),
        })
}

/// Cache key builder helpers
pub mod keys {
    /// Build an answer cache key from a request fingerprint
    pub fn answer(fingerprint: &str) -> String {
        format!("answer:{}", fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builders() {
        assert_eq!(keys::answer("abc123"), "answer:abc123");
    }

    #[test]
    fn test_cache_handle_is_shared_not_locked() {
        fn assert_shared<T: Clone + Send + Sync + 'static>() {}
        assert_shared::<MultiplexedConnection>();
        assert_shared::<Cache>();
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result = bounded(Duration::from_millis(5), "get", async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        })
        .await;
        assert!(matches!(result, Err(AppError::CacheError { .. })));
    }
}
