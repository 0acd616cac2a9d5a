//! Vector index abstraction.
//!
//! One logical collection holds every passage in the system. The trait hides
//! the engine behind narrow operations: schema check, batch upsert, filtered
//! search and per-document delete. Score semantics are cosine similarity in
//! [-1, 1]; thresholds are applied by the caller, never here.
//!
//! Backends:
//! - `InMemoryVectorIndex` - exact scan, local-first default and test double
//! - `QdrantVectorIndex` - external engine (behind the `qdrant` feature)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AppError, Result, RetrievedPassage};

// ============================================================================
// Point & payload types
// ============================================================================

/// Payload stored next to every vector.
///
/// Institution and title are denormalized from the document so that search
/// can filter and render citations without a metadata store round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassagePayload {
    /// Parent document id.
    pub document_id: Uuid,
    /// 0-based position within the document; contiguous per document.
    pub chunk_index: u32,
    /// Page the passage starts on.
    pub page: u32,
    /// First source line (inclusive).
    pub line_start: u32,
    /// Last source line (inclusive).
    pub line_end: u32,
    /// Issuing institution (denormalized for filtering).
    pub institution: String,
    /// Parent document title (denormalized).
    pub title: String,
    /// Passage text.
    pub text: String,
}

/// A passage ready for indexing: payload plus its embedding.
#[derive(Debug, Clone)]
pub struct PassagePoint {
    /// Embedding vector; length must equal the collection dimension.
    pub vector: Vec<f32>,
    /// Source payload.
    pub payload: PassagePayload,
}

/// One search hit.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    /// Cosine similarity in [-1, 1].
    pub score: f32,
    /// Stored payload.
    pub payload: PassagePayload,
}

impl ScoredPassage {
    /// Convert to the API-facing passage type.
    pub fn into_retrieved(self) -> RetrievedPassage {
        RetrievedPassage {
            document_id: self.payload.document_id,
            chunk_index: self.payload.chunk_index,
            title: self.payload.title,
            page: self.payload.page,
            line_start: self.payload.line_start,
            line_end: self.payload.line_end,
            text: self.payload.text,
            similarity: self.score,
            institution: self.payload.institution,
        }
    }
}

/// Metadata filter applied during search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict hits to one institution.
    pub institution: Option<String>,
}

// ============================================================================
// Vector index trait
// ============================================================================

/// Vector search engine capability.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Name of the backing engine.
    fn provider_name(&self) -> &'static str;

    /// Create the passage collection with dimension `dim`, or verify that an
    /// existing collection already has that dimension.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvariantViolation`] on a schema mismatch; the
    /// service refuses to start in that case.
    async fn ensure_collection(&self, dim: usize) -> Result<()>;

    /// Upsert a batch of passages. Points are keyed by
    /// (document id, chunk index), so re-upserting replaces.
    async fn upsert(&self, points: &[PassagePoint]) -> Result<usize>;

    /// Search for the `limit` nearest passages, best first.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPassage>>;

    /// Delete every passage belonging to a document. Idempotent.
    async fn delete_by_document(&self, document_id: Uuid) -> Result<u64>;

    /// Number of live passages for a document.
    async fn count_by_document(&self, document_id: Uuid) -> Result<usize>;
}

// ============================================================================
// In-memory index
// ============================================================================

use parking_lot::RwLock;
use std::collections::HashMap;

/// Exact-scan in-memory index.
///
/// The local-first default and the test double. Uses cosine similarity over
/// a full scan; fine for development corpora, not for production scale.
pub struct InMemoryVectorIndex {
    points: RwLock<HashMap<(Uuid, u32), PassagePoint>>,
    dim: RwLock<Option<usize>>,
}

impl InMemoryVectorIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
            dim: RwLock::new(None),
        }
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn provider_name(&self) -> &'static str {
        "in-memory"
    }

    async fn ensure_collection(&self, dim: usize) -> Result<()> {
        let mut current = self.dim.write();
        match *current {
            None => {
                *current = Some(dim);
                Ok(())
            }
            Some(existing) if existing == dim => Ok(()),
            Some(existing) => Err(AppError::InvariantViolation(format!(
                "vector collection dimension is {}, configured {}",
                existing, dim
            ))),
        }
    }

    async fn upsert(&self, points: &[PassagePoint]) -> Result<usize> {
        let dim = self
            .dim
            .read()
            .ok_or_else(|| AppError::Internal("collection not initialized".to_string()))?;

        let mut store = self.points.write();
        for point in points {
            if point.vector.len() != dim {
                return Err(AppError::InvariantViolation(format!(
                    "vector length {} does not match dimension {}",
                    point.vector.len(),
                    dim
                )));
            }
            store.insert(
                (point.payload.document_id, point.payload.chunk_index),
                point.clone(),
            );
        }
        Ok(points.len())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPassage>> {
        let store = self.points.read();
        let mut hits: Vec<ScoredPassage> = store
            .values()
            .filter(|p| {
                filter
                    .institution
                    .as_ref()
                    .is_none_or(|inst| &p.payload.institution == inst)
            })
            .map(|p| ScoredPassage {
                score: Self::cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.payload.document_id.cmp(&b.payload.document_id))
                .then_with(|| a.payload.chunk_index.cmp(&b.payload.chunk_index))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_by_document(&self, document_id: Uuid) -> Result<u64> {
        let mut store = self.points.write();
        let before = store.len();
        store.retain(|(doc, _), _| *doc != document_id);
        Ok((before - store.len()) as u64)
    }

    async fn count_by_document(&self, document_id: Uuid) -> Result<usize> {
        let store = self.points.read();
        Ok(store.keys().filter(|(doc, _)| *doc == document_id).count())
    }
}
