//! Retrieval-Augmented Generation pipeline.
//!
//! The query path: a question is normalized and embedded
//! ([`embeddings`], memoized via [`cache`]), matched against the passage
//! index ([`planner`]), answered with cited context ([`composer`]) and
//! scored ([`scorer`]); [`service`] orchestrates the flow together with
//! credit accounting. The ingestion side reuses [`chunker`] and
//! [`embeddings`] from the worker pool.

/// Cache capability, key policies and the coordinator.
pub mod cache;
/// Coordinate-preserving passage chunking.
pub mod chunker;
/// Answer composition and citation post-processing.
pub mod composer;
/// Embedding capability.
pub mod embeddings;
/// Retrieval planning.
pub mod planner;
/// Reliability scoring.
pub mod scorer;
/// The ask/search pipeline service.
pub mod service;
/// Turkish-aware text normalization.
pub mod text;

pub use cache::{Cache, CacheCoordinator, InMemoryCache};
pub use chunker::{ChunkerConfig, PassageChunker, PassageDraft};
pub use composer::AnswerComposer;
pub use embeddings::{Embedder, HttpEmbedder};
pub use planner::QueryPlanner;
pub use service::QueryService;

#[cfg(feature = "redis-cache")]
pub use cache::RedisCache;
