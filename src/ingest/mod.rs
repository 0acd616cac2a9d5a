//! Asynchronous document ingestion.
//!
//! Upload puts bytes in the blob store, inserts a `pending` document and
//! enqueues a job; the worker pool runs extract → chunk → embed → index
//! and lands the document in `completed` or `failed`. The sweeper releases
//! documents a crashed worker left behind.

/// Job types and the in-process queue.
pub mod queue;
/// Stale-document sweeper.
pub mod sweeper;
/// The ingestion pipeline worker.
pub mod worker;

pub use queue::{IngestJob, IngestQueue};
pub use sweeper::spawn_sweeper;
pub use worker::{IngestWorker, MAX_INGEST_ATTEMPTS};
