//! In-process ingestion job queue.
//!
//! Jobs flow through an unbounded tokio channel into the worker pool.
//! Delivery is at-least-once from the pipeline's point of view: retryable
//! failures re-enqueue the job with a bumped attempt counter, and the
//! worker's compare-and-set on the document state makes redelivery
//! harmless. An external broker can stand in behind the same API.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::{AppError, Result};

/// A job on the `ingest` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IngestJob {
    /// Run the ingestion pipeline for a document.
    Ingest {
        /// Target document.
        document_id: Uuid,
        /// 1-based attempt counter.
        attempt: u32,
    },
    /// Purge a tombstoned document's passages and bytes.
    Purge {
        /// Target document.
        document_id: Uuid,
    },
}

/// Producer half of the ingestion queue.
#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::UnboundedSender<IngestJob>,
}

impl IngestQueue {
    /// Create the queue; the receiver feeds the worker pool.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IngestJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a job.
    pub fn enqueue(&self, job: IngestJob) -> Result<()> {
        self.tx.send(job).map_err(|_| AppError::AdapterUnavailable {
            adapter: "queue",
            message: "ingest queue is closed".to_string(),
            refund_txn_id: None,
        })
    }
}
