//! Query planning: admission, embedding, retrieval, pruning.
//!
//! The planner turns a validated question into an ordered list of
//! [`RetrievedPassage`]s: rate-limit admission, cached query embedding,
//! oversampled vector search under the institution filter, threshold
//! pruning, and (document, page) deduplication. Generation is the
//! composer's job; the planner never talks to an LLM.

use std::sync::Arc;

use crate::db::{SearchFilter, VectorIndex};
use crate::rag::cache::CacheCoordinator;
use crate::rag::embeddings::Embedder;
use crate::rag::text::normalize_query;
use crate::types::{AppError, Result, RetrievedPassage};

/// Resolved retrieval options for one query.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Institution filter, when given.
    pub institution: Option<String>,
    /// Retrieval limit (1..=20).
    pub k: u32,
    /// Similarity threshold (0..=1).
    pub threshold: f32,
}

/// The query planner.
pub struct QueryPlanner {
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorIndex>,
    cache: Arc<CacheCoordinator>,
    k_default: u32,
    threshold_default: f32,
    oversample: u32,
}

impl QueryPlanner {
    /// Wire the planner to its adapters.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorIndex>,
        cache: Arc<CacheCoordinator>,
        k_default: u32,
        threshold_default: f32,
        oversample: u32,
    ) -> Self {
        Self {
            embedder,
            vector,
            cache,
            k_default,
            threshold_default,
            oversample,
        }
    }

    /// Validate request knobs against their allowed ranges, filling in
    /// configured defaults.
    pub fn resolve_options(
        &self,
        institution: Option<String>,
        limit: Option<u32>,
        threshold: Option<f32>,
    ) -> Result<QueryOptions> {
        let k = limit.unwrap_or(self.k_default);
        if !(1..=20).contains(&k) {
            return Err(AppError::InvalidInput(format!(
                "limit must be in 1..=20, got {}",
                k
            )));
        }
        let threshold = threshold.unwrap_or(self.threshold_default);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::InvalidInput(format!(
                "threshold must be in 0..=1, got {}",
                threshold
            )));
        }
        Ok(QueryOptions {
            institution,
            k,
            threshold,
        })
    }

    /// Admission control for one user.
    pub async fn admit(&self, user_id: &str, quota: u64) -> Result<()> {
        self.cache.check_rate_limit(user_id, quota).await
    }

    /// Stable fingerprint of the query's normalized inputs.
    pub fn fingerprint(query: &str, options: &QueryOptions) -> String {
        CacheCoordinator::query_fingerprint(
            &normalize_query(query),
            options.institution.as_deref(),
            options.k,
            options.threshold,
        )
    }

    /// Get or compute the query embedding, memoized for an hour.
    pub async fn query_embedding(&self, query: &str) -> Result<Vec<f32>> {
        let normalized = normalize_query(query);
        let key = self.cache.embedding_key(&normalized);
        if let Some(vector) = self.cache.get_embedding(&key).await {
            return Ok(vector);
        }
        let vector = self.embedder.embed_one(&normalized).await?;
        self.cache.put_embedding(&key, &vector).await;
        Ok(vector)
    }

    /// Retrieve the passages backing an answer, best first.
    ///
    /// Searches `k * oversample` candidates so the threshold and filter can
    /// prune without starving the result, then keeps the top-k survivors
    /// and drops near-identical citations from the same (document, page).
    pub async fn retrieve(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> Result<Vec<RetrievedPassage>> {
        let vector = self.query_embedding(query).await?;

        let candidates = self
            .vector
            .search(
                &vector,
                (options.k * self.oversample.max(1)) as usize,
                &SearchFilter {
                    institution: options.institution.clone(),
                },
            )
            .await?;

        let survivors: Vec<RetrievedPassage> = candidates
            .into_iter()
            .filter(|hit| hit.score >= options.threshold)
            .take(options.k as usize)
            .map(|hit| hit.into_retrieved())
            .collect();

        let mut seen = std::collections::HashSet::new();
        let deduped: Vec<RetrievedPassage> = survivors
            .into_iter()
            .filter(|p| seen.insert((p.document_id, p.page)))
            .collect();

        Ok(deduped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryVectorIndex, PassagePayload, PassagePoint};
    use crate::rag::cache::InMemoryCache;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct FixedEmbedder {
        vector: Vec<f32>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            self.vector.len()
        }

        fn model_id(&self) -> &str {
            "fixed"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }
    }

    fn point(doc: Uuid, chunk: u32, page: u32, inst: &str, vector: Vec<f32>) -> PassagePoint {
        PassagePoint {
            vector,
            payload: PassagePayload {
                document_id: doc,
                chunk_index: chunk,
                page,
                line_start: 1,
                line_end: 4,
                institution: inst.to_string(),
                title: "Kanun".to_string(),
                text: format!("passage {}", chunk),
            },
        }
    }

    async fn planner_with(
        points: Vec<PassagePoint>,
        query_vector: Vec<f32>,
    ) -> (QueryPlanner, Arc<FixedEmbedder>) {
        let index = Arc::new(InMemoryVectorIndex::new());
        index.ensure_collection(3).await.unwrap();
        index.upsert(&points).await.unwrap();

        let embedder = Arc::new(FixedEmbedder {
            vector: query_vector,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(CacheCoordinator::new(
            Arc::new(InMemoryCache::new()),
            "fixed".to_string(),
            Duration::from_secs(3600),
            Duration::from_secs(1800),
        ));
        let planner = QueryPlanner::new(
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            index,
            cache,
            5,
            0.70,
            2,
        );
        (planner, embedder)
    }

    #[tokio::test]
    async fn test_threshold_prunes_weak_hits() {
        let doc = Uuid::new_v4();
        let (planner, _) = planner_with(
            vec![
                point(doc, 0, 1, "SGK", vec![1.0, 0.0, 0.0]),
                point(doc, 1, 2, "SGK", vec![0.0, 1.0, 0.0]),
            ],
            vec![1.0, 0.0, 0.0],
        )
        .await;

        let options = planner.resolve_options(None, Some(5), Some(0.7)).unwrap();
        let passages = planner.retrieve("ödeme süresi", &options).await.unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].chunk_index, 0);
    }

    #[tokio::test]
    async fn test_threshold_one_returns_empty() {
        let doc = Uuid::new_v4();
        let (planner, _) = planner_with(
            vec![point(doc, 0, 1, "SGK", vec![0.9, 0.1, 0.0])],
            vec![1.0, 0.0, 0.0],
        )
        .await;

        let options = planner.resolve_options(None, None, Some(1.0)).unwrap();
        let passages = planner.retrieve("soru", &options).await.unwrap();
        assert!(passages.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_zero_keeps_everything() {
        let doc = Uuid::new_v4();
        let (planner, _) = planner_with(
            vec![
                point(doc, 0, 1, "SGK", vec![1.0, 0.0, 0.0]),
                point(doc, 1, 2, "SGK", vec![0.0, 1.0, 0.0]),
                point(doc, 2, 3, "SGK", vec![0.0, 0.0, 1.0]),
            ],
            vec![1.0, 0.0, 0.0],
        )
        .await;

        let options = planner.resolve_options(None, Some(3), Some(0.0)).unwrap();
        let passages = planner.retrieve("soru", &options).await.unwrap();
        assert_eq!(passages.len(), 3);
    }

    #[tokio::test]
    async fn test_institution_filter_applied() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (planner, _) = planner_with(
            vec![
                point(a, 0, 1, "SGK", vec![1.0, 0.0, 0.0]),
                point(b, 0, 1, "GİB", vec![1.0, 0.0, 0.0]),
            ],
            vec![1.0, 0.0, 0.0],
        )
        .await;

        let options = planner
            .resolve_options(Some("GİB".to_string()), None, Some(0.5))
            .unwrap();
        let passages = planner.retrieve("soru", &options).await.unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].document_id, b);
    }

    #[tokio::test]
    async fn test_dedup_by_document_and_page() {
        let doc = Uuid::new_v4();
        let (planner, _) = planner_with(
            vec![
                point(doc, 0, 1, "SGK", vec![1.0, 0.0, 0.0]),
                point(doc, 1, 1, "SGK", vec![0.99, 0.01, 0.0]),
                point(doc, 2, 2, "SGK", vec![0.98, 0.02, 0.0]),
            ],
            vec![1.0, 0.0, 0.0],
        )
        .await;

        let options = planner.resolve_options(None, Some(5), Some(0.5)).unwrap();
        let passages = planner.retrieve("soru", &options).await.unwrap();
        // Two passages on page 1 collapse to the better one.
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].chunk_index, 0);
        assert_eq!(passages[1].page, 2);
    }

    #[tokio::test]
    async fn test_query_embedding_memoized() {
        let doc = Uuid::new_v4();
        let (planner, embedder) = planner_with(
            vec![point(doc, 0, 1, "SGK", vec![1.0, 0.0, 0.0])],
            vec![1.0, 0.0, 0.0],
        )
        .await;

        let options = planner.resolve_options(None, None, Some(0.5)).unwrap();
        planner.retrieve("Ödeme süresi", &options).await.unwrap();
        planner.retrieve("ödeme  süresi", &options).await.unwrap();
        // Second call hits the embedding cache (same normalized form).
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_options_validates_ranges() {
        let index: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new());
        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0],
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(CacheCoordinator::new(
            Arc::new(InMemoryCache::new()),
            "fixed".to_string(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let planner = QueryPlanner::new(embedder, index, cache, 5, 0.70, 2);

        assert!(planner.resolve_options(None, Some(0), None).is_err());
        assert!(planner.resolve_options(None, Some(21), None).is_err());
        assert!(planner.resolve_options(None, None, Some(1.5)).is_err());

        let options = planner.resolve_options(None, None, None).unwrap();
        assert_eq!(options.k, 5);
        assert!((options.threshold - 0.70).abs() < f32::EPSILON);
    }
}
