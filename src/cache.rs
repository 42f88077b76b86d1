//! Result caching over a shared key/value store.
//!
//! The store is externally provided (Redis) with an in-memory fallback
//! so the service degrades rather than hard-requiring infrastructure.
//! Store failures on the read path are treated as misses, never as
//! request failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::datasource::ExecutionResult;

/// Minimal key/value contract shared by the result cache and the
/// background job store. Single-key reads and writes only.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value, `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, String>;
    /// Store a value with a TTL in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), String>;
    /// Remove a key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), String>;
}

/// Redis-backed store using a shared connection manager.
#[derive(Clone)]
pub struct RedisStore {
    connection: redis::aio::ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RedisStore")
    }
}

impl RedisStore {
    /// Connect to the given Redis URL.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, String> {
        let mut conn = self.connection.clone();
        redis::AsyncCommands::get::<_, Option<String>>(&mut conn, key)
            .await
            .map_err(|e| e.to_string())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), String> {
        let mut conn = self.connection.clone();
        redis::AsyncCommands::set_ex::<_, _, ()>(&mut conn, key, value, ttl_secs)
            .await
            .map_err(|e| e.to_string())
    }

    async fn delete(&self, key: &str) -> Result<(), String> {
        let mut conn = self.connection.clone();
        redis::AsyncCommands::del::<_, i32>(&mut conn, key)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// In-memory store with TTL semantics, used when no Redis is configured
/// and throughout the test suite.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, String> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), String> {
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), String> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// A cached execution result with its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The exact query text that produced the result.
    pub query_text: String,
    /// The cached result.
    pub result: ExecutionResult,
    /// When the entry was written (RFC 3339).
    pub cached_at: String,
}

/// Result cache keyed by backend identity and exact query text.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn KvStore>,
    ttl_secs: u64,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl ResultCache {
    /// Cache over the given store with the configured TTL.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    /// Deterministic key for (backend identity, trimmed query text).
    #[must_use]
    pub fn key(source_id: &str, query: &str) -> String {
        let encoded = URL_SAFE_NO_PAD.encode(query.trim().as_bytes());
        format!("result:{source_id}:{encoded}")
    }

    /// Look up a cached result. Store failures degrade to a miss.
    pub async fn get(&self, source_id: &str, query: &str) -> Option<CacheEntry> {
        let key = Self::key(source_id, query);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Cache entry unparsable, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Cache get failed, treating as miss");
                None
            }
        }
    }

    /// Store an execution result. Failures are logged and swallowed.
    pub async fn set(&self, source_id: &str, query: &str, result: &ExecutionResult) {
        let entry = CacheEntry {
            query_text: query.trim().to_string(),
            result: result.clone(),
            cached_at: chrono::Utc::now().to_rfc3339(),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Cache entry unserializable, skipping store");
                return;
            }
        };
        let key = Self::key(source_id, query);
        if let Err(e) = self.store.set_ex(&key, &raw, self.ttl_secs).await {
            tracing::warn!(error = %e, "Cache set failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::Row;

    fn sample_result() -> ExecutionResult {
        let mut row = Row::new();
        row.insert("n".into(), serde_json::json!(1));
        ExecutionResult::new(vec![row], 5.0)
    }

    #[test]
    fn key_is_deterministic_and_trims() {
        let a = ResultCache::key("ds1", "SELECT 1");
        let b = ResultCache::key("ds1", "  SELECT 1  ");
        let c = ResultCache::key("ds2", "SELECT 1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("result:ds1:"));
    }

    #[tokio::test]
    async fn round_trip_within_ttl() {
        let cache = ResultCache::new(Arc::new(MemoryStore::new()), 60);
        let result = sample_result();

        cache.set("ds1", "SELECT 1", &result).await;
        let hit = cache.get("ds1", "SELECT 1").await.unwrap();
        assert_eq!(hit.result.row_count, 1);
        assert_eq!(hit.result.rows, result.rows);
        assert_eq!(hit.query_text, "SELECT 1");
    }

    #[tokio::test]
    async fn expired_entries_are_absent() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 0).await.unwrap();
        // TTL of zero expires immediately
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn different_sources_do_not_collide() {
        let cache = ResultCache::new(Arc::new(MemoryStore::new()), 60);
        cache.set("ds1", "SELECT 1", &sample_result()).await;
        assert!(cache.get("ds2", "SELECT 1").await.is_none());
    }

    #[tokio::test]
    async fn failing_store_degrades_to_miss() {
        #[derive(Debug)]
        struct BrokenStore;

        #[async_trait]
        impl KvStore for BrokenStore {
            async fn get(&self, _: &str) -> Result<Option<String>, String> {
                Err("store unreachable".to_string())
            }
            async fn set_ex(&self, _: &str, _: &str, _: u64) -> Result<(), String> {
                Err("store unreachable".to_string())
            }
            async fn delete(&self, _: &str) -> Result<(), String> {
                Err("store unreachable".to_string())
            }
        }

        let cache = ResultCache::new(Arc::new(BrokenStore), 60);
        assert!(cache.get("ds1", "SELECT 1").await.is_none());
        // Set must not panic either
        cache.set("ds1", "SELECT 1", &sample_result()).await;
    }
}
