//! # mevzuat-server
//!
//! A Retrieval-Augmented Generation service for Turkish legal documents.
//! Administrators upload PDFs; the ingestion pipeline extracts text with
//! page/line coordinates, chunks it into overlapping passages, embeds them
//! and indexes them in a vector engine. End users ask natural-language
//! questions and get cited answers with a reliability score, paid for from
//! an append-only credit ledger with refund-on-failure.
//!
//! ## Architecture
//!
//! External capabilities sit behind narrow adapters so no vendor types leak
//! into the core:
//!
//! | Capability | Adapter | Default backend |
//! |------------|---------|-----------------|
//! | Metadata store | [`db::MetaStore`] | libsql (local file) |
//! | Vector engine | [`db::VectorIndex`] | in-memory scan (`qdrant` feature for Qdrant) |
//! | Object store | [`db::BlobStore`] | local filesystem |
//! | Cache / counters | [`rag::Cache`] | in-memory (`redis-cache` feature for Redis) |
//! | Embeddings | [`rag::Embedder`] | OpenAI-compatible HTTP service |
//! | Generation | [`llm::Generator`] | OpenAI / Ollama, primary + fallback |
//! | Text extraction | [`extract::TextExtractor`] | HTTP extraction service |
//!
//! Ingestion runs on a worker pool fed by an in-process queue; a sweeper
//! releases documents a crashed worker left in `processing`. The query
//! path is cache-coherent and idempotent on the credit side: any failure
//! after the reserve refunds the deduction.
//!
//! ## Modules
//!
//! - [`api`] - axum routes and thin handlers
//! - [`auth`] - JWT verification and extractors
//! - [`credits`] - append-only credit ledger
//! - [`db`] - metadata store, vector index, blob store
//! - [`extract`] - text extraction capability
//! - [`ingest`] - queue, worker pool, sweeper
//! - [`llm`] - generation providers
//! - [`rag`] - chunker, embeddings, cache, planner, composer, scorer
//! - [`types`] - entities, API payloads, error taxonomy
//! - [`utils`] - configuration and retry policy

#![warn(missing_docs)]

/// HTTP API handlers and routes.
pub mod api;
/// JWT verification and middleware.
pub mod auth;
/// Credit ledger.
pub mod credits;
/// Storage adapters (metadata, vectors, blobs).
pub mod db;
/// Text extraction capability.
pub mod extract;
/// Asynchronous ingestion.
pub mod ingest;
/// LLM provider clients.
pub mod llm;
/// Retrieval-Augmented Generation pipeline.
pub mod rag;
/// Core types and error handling.
pub mod types;
/// Configuration utilities.
pub mod utils;

// Re-export commonly used types
pub use credits::CreditLedger;
pub use db::{BlobStore, MetaStore, VectorIndex};
pub use ingest::{IngestJob, IngestQueue, IngestWorker};
pub use llm::{FallbackGenerator, Generator};
pub use rag::{AnswerComposer, PassageChunker, QueryPlanner, QueryService};
pub use types::{AppError, Result};
pub use utils::config::Settings;

use crate::auth::jwt::AuthVerifier;
use std::sync::Arc;

/// Application state shared across handlers.
///
/// Initialized once at startup; components receive their dependencies by
/// value from here, there is no other global state.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub settings: Arc<Settings>,
    /// Metadata store.
    pub meta: Arc<MetaStore>,
    /// Blob store for raw document bytes.
    pub blob: Arc<dyn BlobStore>,
    /// Ingest job queue producer.
    pub queue: IngestQueue,
    /// Credit ledger.
    pub ledger: Arc<CreditLedger>,
    /// The ask/search pipeline.
    pub query_service: Arc<QueryService>,
    /// Token verifier.
    pub auth_verifier: Arc<AuthVerifier>,
}

/// Build the full application router, including the health check.
pub fn app_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api", api::routes::create_router(Arc::clone(&state.auth_verifier)))
        .layer(axum::extract::DefaultBodyLimit::max(
            state.settings.upload.max_bytes as usize + 1024 * 1024,
        ))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
