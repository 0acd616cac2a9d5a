//! Stale-document sweeper.
//!
//! A crashed worker leaves its document stuck in `processing`. The sweeper
//! periodically resets documents older than the configured threshold back
//! to `pending` and re-enqueues them; the worker's unconditional purge
//! before upsert guarantees the rerun cannot duplicate passages.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::queue::{IngestJob, IngestQueue};
use crate::db::MetaStore;

/// Spawn the sweeper loop.
pub fn spawn_sweeper(
    meta: Arc<MetaStore>,
    queue: IngestQueue,
    interval: Duration,
    stale_after_s: i64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match meta.reset_stale_processing(stale_after_s).await {
                Ok(ids) if ids.is_empty() => {}
                Ok(ids) => {
                    for document_id in ids {
                        tracing::warn!(
                            document_id = %document_id,
                            "Stale processing document reset to pending"
                        );
                        if let Err(e) = queue.enqueue(IngestJob::Ingest {
                            document_id,
                            attempt: 1,
                        }) {
                            tracing::error!(
                                document_id = %document_id,
                                error = %e,
                                "Failed to re-enqueue swept document"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Sweeper pass failed");
                }
            }
        }
    })
}
