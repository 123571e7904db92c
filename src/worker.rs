//! The flush worker (C4): issues one bulk request per handed-off buffer, accounts for
//! per-item and transport failures, and returns the buffer to the idle pool.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::buffer::{BulkBuffer, BulkBufferError};
use crate::indexer::Counters;
use crate::metrics::Metrics;
use crate::ratelimit::RateLimiter;

/// Runs one handed-off buffer to completion: flush, account, reset, return to the idle pool.
pub async fn run_flush(
    mut buffer: BulkBuffer,
    ctx: CancellationToken,
    counters: Arc<Counters>,
    idle_tx: mpsc::Sender<BulkBuffer>,
    rate_limiter: Arc<RateLimiter>,
) -> Result<(), BulkBufferError> {
    let items = buffer.items();
    if items == 0 {
        return Ok(());
    }

    Metrics::bulk_request();
    Metrics::record_bulk_request_items(items);
    let started = std::time::Instant::now();
    let result = buffer.flush(ctx).await;
    Metrics::record_bulk_request_duration(started.elapsed().as_secs_f64());

    match result {
        Err(e) => {
            Metrics::bulk_request_failed();
            Metrics::event_failed(items as u64);
            counters.failed.fetch_add(items as u64, Ordering::SeqCst);
            if rate_limiter.allow("flush_transport_error") {
                warn!(items, error = %e, "bulk request failed, items counted as failed");
            }
            counters.active.fetch_sub(items as u64, Ordering::SeqCst);
            Metrics::update_active_events(counters.active.load(Ordering::SeqCst));
            buffer.reset();
            let _ = idle_tx.send(buffer).await;
            Err(e)
        }
        Ok(response) => {
            let events_failed = response.items.iter().filter(|item| item.is_rejected()).count() as u64;
            if events_failed > 0 {
                Metrics::event_failed(events_failed);
                if rate_limiter.allow("item_rejected") {
                    warn!(
                        events_failed,
                        total = items,
                        "bulk request had rejected items"
                    );
                }
            }
            Metrics::event_indexed(items as u64 - events_failed);
            counters.active.fetch_sub(items as u64, Ordering::SeqCst);
            counters.failed.fetch_add(events_failed, Ordering::SeqCst);
            Metrics::update_active_events(counters.active.load(Ordering::SeqCst));
            buffer.reset();
            let _ = idle_tx.send(buffer).await;
            Ok(())
        }
    }
}
