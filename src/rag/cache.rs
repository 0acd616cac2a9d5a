//! Cache capability and the cache coordinator.
//!
//! Three policies share one backend (§ key shapes):
//! - embedding cache: `emb:{model}:{sha256(text)}`, TTL 1 h, value = raw
//!   little-endian f32 bytes;
//! - query result cache: `q:{fingerprint}`, TTL 30 min, value = serialized
//!   answer payload;
//! - rate limit counters: `rl:user:{id}:minute:{bucket}`, TTL 60 s.
//!
//! The cache is advisory. Any backend failure degrades silently to origin
//! computation - a cache outage must never take queries down with it.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::{AppError, Result};

// ============================================================================
// Cache trait
// ============================================================================

/// Shared cache capability: byte values with TTLs plus atomic counters.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a value, or None when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value with a TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Atomically increment a counter, setting the TTL on first touch.
    /// Returns the counter value after the increment.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64>;
}

// ============================================================================
// In-memory cache
// ============================================================================

#[derive(Debug, Clone)]
enum Slot {
    Bytes(Vec<u8>),
    Counter(i64),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Instant,
}

impl Entry {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Process-local cache. The local-first default and the test double.
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drop expired entries.
    pub fn cleanup_expired(&self) {
        self.entries.write().retain(|_, entry| entry.live());
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.read().values().filter(|e| e.live()).count()
    }

    /// Whether the cache holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read();
        Ok(entries.get(key).filter(|e| e.live()).and_then(|e| match &e.slot {
            Slot::Bytes(b) => Some(b.clone()),
            Slot::Counter(n) => Some(n.to_string().into_bytes()),
        }))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.entries.write().insert(
            key.to_string(),
            Entry {
                slot: Slot::Bytes(value.to_vec()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut entries = self.entries.write();
        let now = Instant::now();
        let entry = entries.get_mut(key).filter(|e| now < e.expires_at);
        match entry {
            Some(entry) => {
                let next = match entry.slot {
                    Slot::Counter(n) => n + 1,
                    Slot::Bytes(_) => 1,
                };
                entry.slot = Slot::Counter(next);
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        slot: Slot::Counter(1),
                        expires_at: now + ttl,
                    },
                );
                Ok(1)
            }
        }
    }
}

// ============================================================================
// Redis cache
// ============================================================================

/// Redis-backed cache. Enabled with the `redis-cache` feature.
#[cfg(feature = "redis-cache")]
pub struct RedisCache {
    manager: redis::aio::ConnectionManager,
}

#[cfg(feature = "redis-cache")]
impl RedisCache {
    /// Connect to Redis at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(Self::cache_err)?;
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(Self::cache_err)?;
        Ok(Self { manager })
    }

    fn cache_err(e: impl std::fmt::Display) -> AppError {
        AppError::AdapterUnavailable {
            adapter: "cache",
            message: e.to_string(),
            refund_txn_id: None,
        }
    }
}

#[cfg(feature = "redis-cache")]
#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(Self::cache_err)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(Self::cache_err)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let n: i64 = conn.incr(key, 1).await.map_err(Self::cache_err)?;
        if n == 1 {
            conn.expire::<_, ()>(key, ttl.as_secs() as i64)
                .await
                .map_err(Self::cache_err)?;
        }
        Ok(n)
    }
}

// ============================================================================
// Cache coordinator
// ============================================================================

use std::sync::Arc;

/// Key builders plus advisory wrappers over the raw cache.
///
/// Every method here swallows backend errors (logged at debug) and behaves
/// like a miss; only the rate limiter's quota decision surfaces an error,
/// and only when the counter itself worked.
pub struct CacheCoordinator {
    cache: Arc<dyn Cache>,
    model_id: String,
    ttl_embedding: Duration,
    ttl_query: Duration,
}

impl CacheCoordinator {
    /// Wrap a cache backend.
    pub fn new(
        cache: Arc<dyn Cache>,
        model_id: String,
        ttl_embedding: Duration,
        ttl_query: Duration,
    ) -> Self {
        Self {
            cache,
            model_id,
            ttl_embedding,
            ttl_query,
        }
    }

    fn sha(input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Key for a cached embedding of `normalized_text`.
    pub fn embedding_key(&self, normalized_text: &str) -> String {
        format!("emb:{}:{}", self.model_id, Self::sha(normalized_text))
    }

    /// Stable fingerprint of a query's normalized inputs.
    pub fn query_fingerprint(
        normalized_query: &str,
        institution: Option<&str>,
        k: u32,
        threshold: f32,
    ) -> String {
        let raw = format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}",
            normalized_query,
            institution.unwrap_or(""),
            k,
            threshold.to_bits()
        );
        format!("q:{}", Self::sha(&raw))
    }

    /// Rate limit key for the current minute bucket.
    pub fn rate_limit_key(user_id: &str, bucket: i64) -> String {
        format!("rl:user:{}:minute:{}", user_id, bucket)
    }

    /// Fetch a cached embedding.
    pub async fn get_embedding(&self, key: &str) -> Option<Vec<f32>> {
        match self.cache.get(key).await {
            Ok(Some(bytes)) if bytes.len() % 4 == 0 => Some(
                bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Embedding cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store an embedding.
    pub async fn put_embedding(&self, key: &str, vector: &[f32]) {
        let bytes: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
        if let Err(e) = self.cache.set(key, &bytes, self.ttl_embedding).await {
            tracing::debug!(error = %e, "Embedding cache write failed");
        }
    }

    /// Fetch a cached JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Query cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a JSON value with the query TTL.
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                if let Err(e) = self.cache.set(key, &bytes, self.ttl_query).await {
                    tracing::debug!(error = %e, "Query cache write failed");
                }
            }
            Err(e) => tracing::debug!(error = %e, "Query cache encode failed"),
        }
    }

    /// Admission control: count this request against the caller's
    /// per-minute quota.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::RateLimited`] above the quota. A broken counter
    /// backend admits the request - the cache stays advisory.
    pub async fn check_rate_limit(&self, user_id: &str, quota: u64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let bucket = now / 60;
        let key = Self::rate_limit_key(user_id, bucket);
        match self.cache.incr(&key, Duration::from_secs(60)).await {
            Ok(n) if n as u64 > quota => Err(AppError::RateLimited {
                retry_after_s: (60 - (now % 60)) as u64,
            }),
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "Rate limit counter failed, admitting request");
                Ok(())
            }
        }
    }
}
