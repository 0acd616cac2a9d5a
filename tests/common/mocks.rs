//! Deterministic stub adapters and the test harness.
//!
//! The stubs replace every external capability: embeddings come from a
//! fixed table (with a hash fallback), generation returns canned text or a
//! scripted failure, and extraction serves a configurable page tree. All
//! stubs count their calls so tests can assert what was (not) invoked.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mevzuat::auth::jwt::AuthVerifier;
use mevzuat::db::{InMemoryBlobStore, InMemoryVectorIndex, MetaStore};
use mevzuat::extract::{ExtractedLine, ExtractedPage, ExtractedText, TextExtractor};
use mevzuat::llm::{Completion, FallbackGenerator, GenerateOptions, Generator};
use mevzuat::rag::chunker::ChunkerConfig;
use mevzuat::rag::{
    AnswerComposer, CacheCoordinator, Embedder, InMemoryCache, PassageChunker, QueryPlanner,
    QueryService,
};
use mevzuat::types::{AppError, Claims, Result, UserRole};
use mevzuat::VectorIndex;
use mevzuat::{AppState, CreditLedger, IngestQueue, IngestWorker, Settings};

pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";

pub const TEST_DIM: usize = 3;

/// Mint a bearer token the way the external auth provider would.
pub fn mint_token(sub: &str, email: &str, role: UserRole) -> String {
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: sub.to_string(),
        email: email.to_string(),
        role,
        exp: now + 3600,
        iat: now,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("token encoding")
}

/// Claims matching a minted token, for direct service calls.
pub fn claims_for(sub: &str, email: &str, role: UserRole) -> Claims {
    let now = chrono::Utc::now().timestamp() as usize;
    Claims {
        sub: sub.to_string(),
        email: email.to_string(),
        role,
        exp: now + 3600,
        iat: now,
    }
}

// ============================================================================
// Stub embedder
// ============================================================================

/// Deterministic embedder: exact-text overrides first, then a hash-derived
/// unit vector. Same input always embeds the same way.
pub struct StubEmbedder {
    overrides: RwLock<HashMap<String, Vec<f32>>>,
    pub calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self {
            overrides: RwLock::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Pin the vector returned for an exact (normalized) text.
    pub fn set_vector(&self, text: &str, vector: Vec<f32>) {
        self.overrides.write().insert(text.to_string(), vector);
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.overrides.read().get(text) {
            return vector.clone();
        }
        // Hash fallback: deterministic non-negative unit-ish vector.
        let mut acc: u64 = 5381;
        for b in text.as_bytes() {
            acc = acc.wrapping_mul(33).wrapping_add(*b as u64);
        }
        let raw: Vec<f32> = (0..TEST_DIM)
            .map(|i| (((acc >> (i * 8)) & 0xff) as f32 + 1.0) / 256.0)
            .collect();
        let norm: f32 = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        raw.into_iter().map(|v| v / norm).collect()
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn dimensions(&self) -> usize {
        TEST_DIM
    }

    fn model_id(&self) -> &str {
        "stub-embedder"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

// ============================================================================
// Stub generator
// ============================================================================

/// Canned-answer generator with a scripted failure mode.
pub struct StubGenerator {
    name: &'static str,
    answer: String,
    fail: bool,
    pub calls: Arc<AtomicUsize>,
}

impl StubGenerator {
    pub fn new(name: &'static str, answer: &str, fail: bool, calls: Arc<AtomicUsize>) -> Self {
        Self {
            name,
            answer: answer.to_string(),
            fail,
            calls,
        }
    }
}

#[async_trait]
impl Generator for StubGenerator {
    fn provider_name(&self) -> &str {
        self.name
    }

    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _options: &GenerateOptions,
    ) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::AdapterUnavailable {
                adapter: "generator",
                message: "stub outage".to_string(),
                refund_txn_id: None,
            });
        }
        Ok(Completion {
            text: self.answer.clone(),
            tokens_in: 120,
            tokens_out: 40,
        })
    }
}

// ============================================================================
// Stub extractor
// ============================================================================

/// Extractor serving a configurable page tree, with optional scripted
/// failure and an injectable delay for concurrency tests.
pub struct StubExtractor {
    tree: RwLock<ExtractedText>,
    failure: RwLock<Option<(String, bool)>>,
    delay: RwLock<Duration>,
    pub calls: AtomicUsize,
}

impl StubExtractor {
    pub fn new(tree: ExtractedText) -> Self {
        Self {
            tree: RwLock::new(tree),
            failure: RwLock::new(None),
            delay: RwLock::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    /// Replace the served tree (simulates a modified extractor between
    /// ingest runs).
    pub fn set_tree(&self, tree: ExtractedText) {
        *self.tree.write() = tree;
    }

    /// Script the next extractions to fail.
    pub fn set_failure(&self, message: &str, retryable: bool) {
        *self.failure.write() = Some((message.to_string(), retryable));
    }

    pub fn clear_failure(&self) {
        *self.failure.write() = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = delay;
    }
}

#[async_trait]
impl TextExtractor for StubExtractor {
    async fn extract(&self, _blob_url: &str, _mime: &str) -> Result<ExtractedText> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some((message, retryable)) = self.failure.read().clone() {
            return Err(AppError::ExtractionFailed { message, retryable });
        }
        Ok(self.tree.read().clone())
    }
}

/// Build a page tree from (page_no, lines).
pub fn page_tree(pages: Vec<(u32, Vec<&str>)>) -> ExtractedText {
    ExtractedText {
        pages: pages
            .into_iter()
            .map(|(page_no, lines)| ExtractedPage {
                page_no,
                lines: lines
                    .into_iter()
                    .enumerate()
                    .map(|(i, text)| ExtractedLine {
                        line_no: i as u32 + 1,
                        text: text.to_string(),
                    })
                    .collect(),
            })
            .collect(),
        confidence: 0.95,
        method: "stub".to_string(),
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub state: AppState,
    pub meta: Arc<MetaStore>,
    pub vector: Arc<InMemoryVectorIndex>,
    pub blob: Arc<InMemoryBlobStore>,
    pub embedder: Arc<StubEmbedder>,
    pub extractor: Arc<StubExtractor>,
    pub worker: Arc<IngestWorker>,
    pub queue: IngestQueue,
    pub generator_calls: Arc<AtomicUsize>,
    pub rx: Option<tokio::sync::mpsc::UnboundedReceiver<mevzuat::IngestJob>>,
}

pub struct HarnessOptions {
    pub generator_fail: bool,
    pub answer: &'static str,
    /// Spawn the worker pool; when false the receiver is kept on the
    /// harness for direct inspection.
    pub spawn_workers: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            generator_fail: false,
            // Roughly 100 chars so the length factor stays at ~0.2.
            answer: "Prim borçları tebliğ tarihinden itibaren bir ay içinde ödenmelidir [#1]. Gecikme zammı uygulanır.",
            spawn_workers: false,
        }
    }
}

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.embedding.dim = TEST_DIM;
    settings.upload.max_bytes = 1000;
    settings.chunking.target_chars = 100;
    settings.chunking.overlap_chars = 20;
    settings.chunking.min_chars = 30;
    settings
}

pub async fn build_harness(options: HarnessOptions) -> Harness {
    let settings = Arc::new(test_settings());
    let meta = Arc::new(MetaStore::new_memory().await.expect("meta store"));
    let blob = Arc::new(InMemoryBlobStore::new());
    let vector = Arc::new(InMemoryVectorIndex::new());
    vector
        .ensure_collection(settings.embedding.dim)
        .await
        .expect("collection");

    let embedder = Arc::new(StubEmbedder::new());
    let extractor = Arc::new(StubExtractor::new(page_tree(vec![(
        1,
        vec![
            "Sigorta primlerinin ödenme süresi ilgili ayı takip eden ayın sonuna kadardır.",
            "Süresinde ödenmeyen primlere gecikme cezası ve gecikme zammı uygulanır.",
        ],
    )])));

    let generator_calls = Arc::new(AtomicUsize::new(0));
    let generator = Arc::new(FallbackGenerator::new(
        Box::new(StubGenerator::new(
            "stub-primary",
            options.answer,
            options.generator_fail,
            Arc::clone(&generator_calls),
        )),
        Some(Box::new(StubGenerator::new(
            "stub-fallback",
            options.answer,
            options.generator_fail,
            Arc::clone(&generator_calls),
        ))),
        Duration::from_secs(5),
    ));

    let cache = Arc::new(CacheCoordinator::new(
        Arc::new(InMemoryCache::new()),
        "stub-embedder".to_string(),
        Duration::from_secs(settings.cache.ttl_embedding_s),
        Duration::from_secs(settings.cache.ttl_query_s),
    ));

    let ledger = Arc::new(CreditLedger::new(Arc::clone(&meta)));
    let planner = Arc::new(QueryPlanner::new(
        Arc::clone(&embedder) as Arc<dyn Embedder>,
        Arc::clone(&vector) as Arc<dyn mevzuat::VectorIndex>,
        Arc::clone(&cache),
        settings.retrieval.k_default,
        settings.retrieval.threshold_default,
        settings.retrieval.oversample,
    ));
    let composer = Arc::new(AnswerComposer::new(generator, Arc::clone(&meta)));
    let query_service = Arc::new(QueryService::new(
        Arc::clone(&meta),
        planner,
        composer,
        Arc::clone(&ledger),
        Arc::clone(&cache),
        Arc::clone(&settings),
    ));

    let (queue, rx) = IngestQueue::new();
    let worker = Arc::new(IngestWorker::new(
        Arc::clone(&meta),
        Arc::clone(&blob) as Arc<dyn mevzuat::BlobStore>,
        Arc::clone(&extractor) as Arc<dyn TextExtractor>,
        Arc::clone(&embedder) as Arc<dyn Embedder>,
        Arc::clone(&vector) as Arc<dyn mevzuat::VectorIndex>,
        PassageChunker::new(ChunkerConfig::from(&settings.chunking)),
        queue.clone(),
        Duration::from_secs(settings.worker.job_timeout_s),
        settings.embedding.batch_size,
    ));

    let rx = if options.spawn_workers {
        IngestWorker::spawn_pool(Arc::clone(&worker), rx, 1);
        None
    } else {
        Some(rx)
    };

    let state = AppState {
        settings,
        meta: Arc::clone(&meta),
        blob: Arc::clone(&blob) as Arc<dyn mevzuat::BlobStore>,
        queue: queue.clone(),
        ledger,
        query_service,
        auth_verifier: Arc::new(AuthVerifier::new(JWT_SECRET.to_string())),
    };

    Harness {
        state,
        meta,
        vector,
        blob,
        embedder,
        extractor,
        worker,
        queue,
        generator_calls,
        rx,
    }
}
