//! TOML-based configuration for the mevzuat server.
//!
//! Settings are loaded once at startup from a TOML file (`mevzuat.toml` by
//! default) plus `.env`. Secrets are never stored in the file; sections
//! reference the environment variable that holds them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;

/// Root configuration loaded from `mevzuat.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerSettings,

    /// Token verification configuration.
    #[serde(default)]
    pub auth: AuthSettings,

    /// Metadata store configuration.
    #[serde(default)]
    pub database: DatabaseSettings,

    /// Blob store configuration.
    #[serde(default)]
    pub blob: BlobSettings,

    /// Vector index configuration.
    #[serde(default)]
    pub vector: VectorSettings,

    /// Embedding service configuration.
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Text extraction service configuration.
    #[serde(default)]
    pub extraction: ExtractionSettings,

    /// Generation provider configuration.
    #[serde(default)]
    pub generation: GenerationSettings,

    /// Retrieval tuning.
    #[serde(default)]
    pub retrieval: RetrievalSettings,

    /// Credit accounting.
    #[serde(default)]
    pub credits: CreditSettings,

    /// Per-user admission quota.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Ingestion worker pool.
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Cache backend and TTLs.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Chunking parameters.
    #[serde(default)]
    pub chunking: ChunkingSettings,

    /// Upload limits.
    #[serde(default)]
    pub upload: UploadSettings,
}

// ============= Server =============

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (default: "127.0.0.1").
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on (default: 3000).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log level: "trace", "debug", "info", "warn", "error" (default: "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Deadline for `/api/user/ask` in seconds (default: 60).
    #[serde(default = "default_ask_deadline")]
    pub ask_deadline_s: u64,
    /// Deadline for `/api/user/search` in seconds (default: 10).
    #[serde(default = "default_search_deadline")]
    pub search_deadline_s: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ask_deadline() -> u64 {
    60
}

fn default_search_deadline() -> u64 {
    10
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            ask_deadline_s: default_ask_deadline(),
            search_deadline_s: default_search_deadline(),
        }
    }
}

// ============= Auth =============

/// Token verification settings. Tokens are minted by the external auth
/// provider; this service only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Environment variable holding the shared HS256 secret.
    #[serde(default = "default_jwt_secret_env")]
    pub jwt_secret_env: String,
}

fn default_jwt_secret_env() -> String {
    "JWT_SECRET".to_string()
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret_env: default_jwt_secret_env(),
        }
    }
}

impl AuthSettings {
    /// Resolve the JWT secret from the environment.
    pub fn jwt_secret(&self) -> anyhow::Result<String> {
        std::env::var(&self.jwt_secret_env)
            .with_context(|| format!("{} must be set", self.jwt_secret_env))
    }
}

// ============= Database =============

/// Metadata store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// libsql URL/path: a local file path or ":memory:".
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "./data/mevzuat.db".to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

// ============= Blob =============

/// Blob store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobSettings {
    /// Root directory for the filesystem blob store.
    #[serde(default = "default_blob_root")]
    pub root: String,
}

fn default_blob_root() -> String {
    "./data/blobs".to_string()
}

impl Default for BlobSettings {
    fn default() -> Self {
        Self {
            root: default_blob_root(),
        }
    }
}

// ============= Vector =============

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSettings {
    /// Backend: "memory" (exact scan, local-first) or "qdrant".
    #[serde(default = "default_vector_backend")]
    pub backend: String,
    /// Logical collection holding all passages.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Qdrant connection, required when backend = "qdrant".
    pub qdrant: Option<QdrantSettings>,
}

fn default_vector_backend() -> String {
    "memory".to_string()
}

fn default_collection() -> String {
    "passages".to_string()
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            collection: default_collection(),
            qdrant: None,
        }
    }
}

/// Qdrant connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantSettings {
    /// Qdrant gRPC URL (default: "http://localhost:6334").
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    /// Environment variable for the API key, when required.
    pub api_key_env: Option<String>,
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

// ============= Embedding =============

/// Embedding service settings. `dim` is the system-wide vector dimension;
/// the startup check refuses to run when it disagrees with the index schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Vector dimension D. Must match the index collection schema.
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
    /// OpenAI-compatible embeddings endpoint base URL.
    #[serde(default = "default_embedding_base")]
    pub base_url: String,
    /// Model identifier sent to the service.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Environment variable holding the API key, when required.
    pub api_key_env: Option<String>,
    /// Maximum passages per embed call (default: 64).
    #[serde(default = "default_embed_batch")]
    pub batch_size: usize,
}

fn default_embedding_dim() -> usize {
    1536
}

fn default_embedding_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embed_batch() -> usize {
    64
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            dim: default_embedding_dim(),
            base_url: default_embedding_base(),
            model: default_embedding_model(),
            api_key_env: None,
            batch_size: default_embed_batch(),
        }
    }
}

// ============= Extraction =============

/// Text extraction service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Extraction service base URL.
    #[serde(default = "default_extraction_base")]
    pub base_url: String,
    /// Environment variable holding the API key, when required.
    pub api_key_env: Option<String>,
    /// Per-call timeout in seconds (default: 120).
    #[serde(default = "default_extraction_timeout")]
    pub timeout_s: u64,
}

fn default_extraction_base() -> String {
    "http://localhost:8070".to_string()
}

fn default_extraction_timeout() -> u64 {
    120
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            base_url: default_extraction_base(),
            api_key_env: None,
            timeout_s: default_extraction_timeout(),
        }
    }
}

// ============= Generation =============

/// Generation provider settings. `primary` and `fallback` name entries in
/// `providers`; the fallback is tried exactly once when the primary fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Name of the primary provider.
    #[serde(default = "default_primary")]
    pub primary: String,
    /// Name of the fallback provider, when configured.
    pub fallback: Option<String>,
    /// Per-provider generation timeout in seconds (default: 30).
    #[serde(default = "default_generation_timeout")]
    pub timeout_s: u64,
    /// Named provider configurations.
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
}

fn default_primary() -> String {
    "openai".to_string()
}

fn default_generation_timeout() -> u64 {
    30
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            fallback: None,
            timeout_s: default_generation_timeout(),
            providers: HashMap::new(),
        }
    }
}

/// LLM provider configuration. Tagged enum based on provider type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderSettings {
    /// OpenAI API (or compatible endpoints).
    OpenAI {
        /// Environment variable containing the API key.
        api_key_env: String,
        /// API base URL (default: `https://api.openai.com/v1`).
        #[serde(default = "default_openai_base")]
        api_base: String,
        /// Model identifier.
        model: String,
    },
    /// Ollama local LLM server.
    Ollama {
        /// Ollama server URL (default: "http://localhost:11434").
        #[serde(default = "default_ollama_url")]
        base_url: String,
        /// Model identifier.
        model: String,
    },
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

// ============= Retrieval =============

/// Retrieval tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Default k when the request omits a limit (default: 5, clamp 1..=20).
    #[serde(default = "default_k")]
    pub k_default: u32,
    /// Default similarity threshold (default: 0.70).
    #[serde(default = "default_threshold")]
    pub threshold_default: f32,
    /// Oversampling factor guarding against post-filter drops (default: 2).
    #[serde(default = "default_oversample")]
    pub oversample: u32,
}

fn default_k() -> u32 {
    5
}

fn default_threshold() -> f32 {
    0.70
}

fn default_oversample() -> u32 {
    2
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k_default: default_k(),
            threshold_default: default_threshold(),
            oversample: default_oversample(),
        }
    }
}

// ============= Credits =============

/// Credit accounting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditSettings {
    /// Credits debited per ask (default: 1). Cache hits are free.
    #[serde(default = "default_cost_per_ask")]
    pub cost_per_ask: i64,
    /// Credits granted to a first-seen user (default: 30).
    #[serde(default = "default_initial_grant")]
    pub initial_grant: i64,
}

fn default_cost_per_ask() -> i64 {
    1
}

fn default_initial_grant() -> i64 {
    30
}

impl Default for CreditSettings {
    fn default() -> Self {
        Self {
            cost_per_ask: default_cost_per_ask(),
            initial_grant: default_initial_grant(),
        }
    }
}

// ============= Rate limit =============

/// Per-user admission quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum asks per user per minute (default: 30).
    #[serde(default = "default_asks_per_minute")]
    pub asks_per_minute: u64,
}

fn default_asks_per_minute() -> u64 {
    30
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            asks_per_minute: default_asks_per_minute(),
        }
    }
}

// ============= Worker =============

/// Ingestion worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Number of concurrent ingestion workers (default: 1).
    #[serde(default = "default_parallelism")]
    pub ingest_parallelism: usize,
    /// Wall-clock limit per ingestion job in seconds (default: 600).
    #[serde(default = "default_job_timeout")]
    pub job_timeout_s: u64,
    /// Age after which a stuck `processing` document is reset (default: 900).
    #[serde(default = "default_stale_processing")]
    pub stale_processing_s: i64,
    /// Sweeper period in seconds (default: 60).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_s: u64,
}

fn default_parallelism() -> usize {
    1
}

fn default_job_timeout() -> u64 {
    600
}

fn default_stale_processing() -> i64 {
    900
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            ingest_parallelism: default_parallelism(),
            job_timeout_s: default_job_timeout(),
            stale_processing_s: default_stale_processing(),
            sweep_interval_s: default_sweep_interval(),
        }
    }
}

// ============= Cache =============

/// Cache backend and TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Backend: "memory" or "redis".
    #[serde(default = "default_cache_backend")]
    pub backend: String,
    /// Environment variable holding the Redis URL, when backend = "redis".
    #[serde(default = "default_redis_url_env")]
    pub redis_url_env: String,
    /// Embedding cache TTL in seconds (default: 3600).
    #[serde(default = "default_ttl_embedding")]
    pub ttl_embedding_s: u64,
    /// Query result cache TTL in seconds (default: 1800).
    #[serde(default = "default_ttl_query")]
    pub ttl_query_s: u64,
}

fn default_cache_backend() -> String {
    "memory".to_string()
}

fn default_redis_url_env() -> String {
    "REDIS_URL".to_string()
}

fn default_ttl_embedding() -> u64 {
    3600
}

fn default_ttl_query() -> u64 {
    1800
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            redis_url_env: default_redis_url_env(),
            ttl_embedding_s: default_ttl_embedding(),
            ttl_query_s: default_ttl_query(),
        }
    }
}

// ============= Chunking =============

/// Chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingSettings {
    /// Target passage length in characters (default: 1200).
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    /// Approximate overlap between adjacent passages (default: 200).
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    /// Page residuals shorter than this are merged forward (default: 300).
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

fn default_target_chars() -> usize {
    1200
}

fn default_overlap_chars() -> usize {
    200
}

fn default_min_chars() -> usize {
    300
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
            overlap_chars: default_overlap_chars(),
            min_chars: default_min_chars(),
        }
    }
}

// ============= Upload =============

/// Upload limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSettings {
    /// Maximum accepted file size in bytes (default: 100 MB, inclusive).
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_max_bytes() -> u64 {
    100_000_000
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
        }
    }
}

// ============= Loading =============

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let settings: Settings = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.embedding.dim > 0, "embedding.dim must be positive");
        anyhow::ensure!(
            self.retrieval.k_default >= 1 && self.retrieval.k_default <= 20,
            "retrieval.k_default must be in 1..=20"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.retrieval.threshold_default),
            "retrieval.threshold_default must be in 0..=1"
        );
        anyhow::ensure!(
            self.chunking.overlap_chars < self.chunking.target_chars,
            "chunking.overlap_chars must be smaller than chunking.target_chars"
        );
        anyhow::ensure!(
            self.worker.ingest_parallelism >= 1,
            "worker.ingest_parallelism must be at least 1"
        );
        if self.vector.backend == "qdrant" {
            anyhow::ensure!(
                self.vector.qdrant.is_some(),
                "vector.qdrant section is required when vector.backend = \"qdrant\""
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.retrieval.k_default, 5);
        assert!((settings.retrieval.threshold_default - 0.70).abs() < f32::EPSILON);
        assert_eq!(settings.retrieval.oversample, 2);
        assert_eq!(settings.credits.cost_per_ask, 1);
        assert_eq!(settings.credits.initial_grant, 30);
        assert_eq!(settings.rate_limit.asks_per_minute, 30);
        assert_eq!(settings.worker.ingest_parallelism, 1);
        assert_eq!(settings.cache.ttl_embedding_s, 3600);
        assert_eq!(settings.cache.ttl_query_s, 1800);
        assert_eq!(settings.chunking.target_chars, 1200);
        assert_eq!(settings.chunking.overlap_chars, 200);
        assert_eq!(settings.chunking.min_chars, 300);
        assert_eq!(settings.upload.max_bytes, 100_000_000);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let raw = r#"
            [embedding]
            dim = 1536

            [generation]
            primary = "openai"
            fallback = "ollama"

            [generation.providers.openai]
            type = "openai"
            api_key_env = "OPENAI_API_KEY"
            model = "gpt-4o-mini"

            [generation.providers.ollama]
            type = "ollama"
            model = "llama3.2"
        "#;
        let settings: Settings = toml::from_str(raw).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.generation.fallback.as_deref(), Some("ollama"));
        assert_eq!(settings.generation.providers.len(), 2);
    }

    #[test]
    fn test_validation_rejects_bad_overlap() {
        let mut settings = Settings::default();
        settings.chunking.overlap_chars = settings.chunking.target_chars;
        assert!(settings.validate().is_err());
    }
}
