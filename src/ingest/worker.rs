//! Ingestion worker: extract → chunk → embed → index.
//!
//! Moves a document from `pending` to `completed` or `failed` exactly once
//! per attempt. The compare-and-set transition in step 2 is the concurrency
//! guard: at most one worker holds a document's processing slot, and a
//! duplicate enqueue acks without side effects. Prior passages are purged
//! unconditionally before upsert, so a crashed or repeated run can never
//! leave duplicates behind.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::queue::{IngestJob, IngestQueue};
use crate::db::{BlobStore, MetaStore, PassagePayload, PassagePoint, VectorIndex};
use crate::extract::TextExtractor;
use crate::rag::chunker::PassageChunker;
use crate::rag::embeddings::Embedder;
use crate::types::{AppError, Document, ProcessingStatus, Result, VisibilityStatus};

/// Maximum ingest attempts per document before a retryable fault counts as
/// terminal.
pub const MAX_INGEST_ATTEMPTS: u32 = 3;

/// Upper bound on passages per vector upsert call.
const UPSERT_BATCH: usize = 256;

/// Upper bound on passages per embed call.
const EMBED_BATCH: usize = 64;

/// The ingestion worker shared by the pool.
pub struct IngestWorker {
    meta: Arc<MetaStore>,
    blob: Arc<dyn BlobStore>,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorIndex>,
    chunker: PassageChunker,
    queue: IngestQueue,
    job_timeout: Duration,
    embed_batch: usize,
}

impl IngestWorker {
    /// Wire a worker to its adapters.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        meta: Arc<MetaStore>,
        blob: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorIndex>,
        chunker: PassageChunker,
        queue: IngestQueue,
        job_timeout: Duration,
        embed_batch: usize,
    ) -> Self {
        Self {
            meta,
            blob,
            extractor,
            embedder,
            vector,
            chunker,
            queue,
            job_timeout,
            embed_batch: embed_batch.clamp(1, EMBED_BATCH),
        }
    }

    /// Spawn `parallelism` workers draining the shared receiver. Workers
    /// are peers; the pool size respects the embedder's rate limits.
    pub fn spawn_pool(
        worker: Arc<Self>,
        rx: mpsc::UnboundedReceiver<IngestJob>,
        parallelism: usize,
    ) -> Vec<JoinHandle<()>> {
        let rx = Arc::new(Mutex::new(rx));
        (0..parallelism.max(1))
            .map(|slot| {
                let worker = Arc::clone(&worker);
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    tracing::debug!(slot, "Ingest worker started");
                    loop {
                        let job = { rx.lock().await.recv().await };
                        match job {
                            Some(job) => worker.handle(job).await,
                            None => break,
                        }
                    }
                    tracing::debug!(slot, "Ingest worker stopped");
                })
            })
            .collect()
    }

    /// Handle one job; failures are absorbed into document state, never
    /// panics.
    pub async fn handle(&self, job: IngestJob) {
        match job {
            IngestJob::Ingest {
                document_id,
                attempt,
            } => {
                if let Err(e) = self.handle_ingest(document_id, attempt).await {
                    tracing::error!(document_id = %document_id, error = %e, "Ingest job failed");
                }
            }
            IngestJob::Purge { document_id } => {
                if let Err(e) = self.handle_purge(document_id).await {
                    tracing::error!(document_id = %document_id, error = %e, "Purge job failed");
                }
            }
        }
    }

    /// Run the ingestion pipeline for a document.
    pub async fn handle_ingest(&self, document_id: Uuid, attempt: u32) -> Result<()> {
        let Some(doc) = self.meta.get_document(document_id).await? else {
            tracing::warn!(document_id = %document_id, "Ingest for unknown document, dropping");
            return Ok(());
        };

        // Idempotent drop: only pending (or a stuck processing slot about to
        // lose the CAS) may enter the pipeline.
        if !matches!(
            doc.processing_status,
            ProcessingStatus::Pending | ProcessingStatus::Processing
        ) {
            tracing::debug!(
                document_id = %document_id,
                status = doc.processing_status.as_str(),
                "Ingest dropped, document not pending"
            );
            return Ok(());
        }

        if !self
            .meta
            .cas_processing_status(document_id, ProcessingStatus::Pending, ProcessingStatus::Processing)
            .await?
        {
            tracing::debug!(document_id = %document_id, "Processing slot taken, dropping");
            return Ok(());
        }

        tracing::info!(document_id = %document_id, attempt, "Ingest started");

        let outcome = tokio::time::timeout(self.job_timeout, self.run_pipeline(&doc)).await;
        match outcome {
            Ok(Ok(passage_count)) => {
                self.meta
                    .mark_processing_completed(document_id, passage_count)
                    .await?;
                tracing::info!(
                    document_id = %document_id,
                    passages = passage_count,
                    "Ingest completed"
                );
                Ok(())
            }
            Ok(Err(e)) if Self::is_retryable_ingest(&e) && attempt < MAX_INGEST_ATTEMPTS => {
                // New attempt: back to pending, redeliver with attempt+1.
                self.meta
                    .cas_processing_status(
                        document_id,
                        ProcessingStatus::Processing,
                        ProcessingStatus::Pending,
                    )
                    .await?;
                self.queue.enqueue(IngestJob::Ingest {
                    document_id,
                    attempt: attempt + 1,
                })?;
                tracing::warn!(
                    document_id = %document_id,
                    attempt,
                    error = %e,
                    "Ingest attempt failed, requeued"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                let reason = match &e {
                    AppError::EmptyDocument => e.kind().to_string(),
                    other => other.to_string(),
                };
                self.meta.mark_processing_failed(document_id, &reason).await?;
                tracing::error!(
                    document_id = %document_id,
                    attempt,
                    error = %e,
                    "Ingest failed terminally"
                );
                Ok(())
            }
            Err(_) => {
                let reason = format!(
                    "ingest wall-clock limit of {}s exceeded",
                    self.job_timeout.as_secs()
                );
                self.meta.mark_processing_failed(document_id, &reason).await?;
                tracing::error!(document_id = %document_id, attempt, "Ingest timed out");
                Ok(())
            }
        }
    }

    /// Whether a pipeline error warrants a whole new attempt. Blob failures
    /// are terminal per the pipeline contract; embedder and vector engine
    /// outages already exhausted the adapter-level retries.
    fn is_retryable_ingest(e: &AppError) -> bool {
        match e {
            AppError::ExtractionFailed { retryable, .. } => *retryable,
            AppError::RateLimited { .. } => true,
            AppError::AdapterUnavailable { adapter, .. } => *adapter != "blob",
            _ => false,
        }
    }

    async fn run_pipeline(&self, doc: &Document) -> Result<u32> {
        // Step 3: the blob must be readable before any expensive work.
        self.blob.get(&doc.blob_url).await.map_err(|e| match e {
            AppError::NotFound(msg) => AppError::AdapterUnavailable {
                adapter: "blob",
                message: format!("document bytes missing: {}", msg),
                refund_txn_id: None,
            },
            other => other,
        })?;

        let mime = mime_for(&doc.original_filename);
        let extracted = self.extractor.extract(&doc.blob_url, mime).await?;
        tracing::debug!(
            document_id = %doc.id,
            pages = extracted.pages.len(),
            confidence = extracted.confidence,
            method = %extracted.method,
            "Extraction finished"
        );

        let drafts = self.chunker.chunk(&extracted)?;

        let dim = self.embedder.dimensions();
        let mut points: Vec<PassagePoint> = Vec::with_capacity(drafts.len());
        for batch in drafts.chunks(self.embed_batch) {
            let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(AppError::InvariantViolation(format!(
                    "embedder returned {} vectors for {} passages",
                    vectors.len(),
                    batch.len()
                )));
            }
            for (draft, vector) in batch.iter().zip(vectors) {
                if vector.len() != dim {
                    return Err(AppError::InvariantViolation(format!(
                        "embedding length {} does not match dimension {}",
                        vector.len(),
                        dim
                    )));
                }
                points.push(PassagePoint {
                    vector,
                    payload: PassagePayload {
                        document_id: doc.id,
                        chunk_index: draft.chunk_index,
                        page: draft.page_number,
                        line_start: draft.line_start,
                        line_end: draft.line_end,
                        institution: doc.institution.clone(),
                        title: doc.title.clone(),
                        text: draft.text.clone(),
                    },
                });
            }
        }

        // Unconditional purge of any prior attempt's passages, then upsert.
        self.vector.delete_by_document(doc.id).await?;
        for batch in points.chunks(UPSERT_BATCH) {
            self.vector.upsert(batch).await?;
        }

        Ok(points.len() as u32)
    }

    /// Purge a tombstoned document: passages out of the index, bytes out of
    /// the blob store.
    pub async fn handle_purge(&self, document_id: Uuid) -> Result<()> {
        self.vector.delete_by_document(document_id).await?;
        if let Some(doc) = self.meta.get_document(document_id).await? {
            if doc.status == VisibilityStatus::Deleted {
                self.blob.delete_by_url(&doc.blob_url).await?;
            }
        }
        tracing::info!(document_id = %document_id, "Purge completed");
        Ok(())
    }
}

fn mime_for(filename: &str) -> &'static str {
    if filename.to_lowercase().ends_with(".pdf") {
        "application/pdf"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_detection() {
        assert_eq!(mime_for("kanun.pdf"), "application/pdf");
        assert_eq!(mime_for("KANUN.PDF"), "application/pdf");
        assert_eq!(mime_for("notlar.txt"), "application/octet-stream");
    }

    #[test]
    fn test_retryability_classification() {
        assert!(IngestWorker::is_retryable_ingest(&AppError::RateLimited {
            retry_after_s: 1
        }));
        assert!(IngestWorker::is_retryable_ingest(
            &AppError::ExtractionFailed {
                message: "busy".to_string(),
                retryable: true,
            }
        ));
        assert!(!IngestWorker::is_retryable_ingest(
            &AppError::ExtractionFailed {
                message: "corrupt file".to_string(),
                retryable: false,
            }
        ));
        assert!(!IngestWorker::is_retryable_ingest(&AppError::EmptyDocument));
        assert!(!IngestWorker::is_retryable_ingest(
            &AppError::AdapterUnavailable {
                adapter: "blob",
                message: "gone".to_string(),
                refund_txn_id: None,
            }
        ));
        assert!(IngestWorker::is_retryable_ingest(
            &AppError::AdapterUnavailable {
                adapter: "embedder",
                message: "down".to_string(),
                refund_txn_id: None,
            }
        ));
    }
}
