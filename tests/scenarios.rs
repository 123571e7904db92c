//! End-to-end scenarios against `InMemoryBulkStore`, exercising the whole indexer +
//! ingestion-handler pipeline the way a real deployment would drive it.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bulk_indexer::buffer::{BulkItemError, BulkItemResult, BulkResponse};
use bulk_indexer::event::{Destination, Event, Processor};
use bulk_indexer::indexer::{Indexer, IndexerConfig, IndexerError};
use bulk_indexer::ingest::{self, AppState};
use bulk_indexer::store::InMemoryBulkStore;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

fn event() -> Event {
    Event::new(
        Utc::now(),
        Processor::Log,
        Destination::new("logs", "firehose", "default").unwrap(),
        serde_json::json!({"message": "hi"}),
    )
}

/// The exact on-wire size of one fixture event's bulk item (action-metadata line + body
/// line), built via the same `EncoderPool`/`BulkBuffer` path the indexer itself uses, so the
/// flush threshold below is derived from the real serialized size rather than assumed.
fn fixture_item_bytes() -> usize {
    let pool = bulk_indexer::encoder::EncoderPool::new();
    let mut enc = pool.checkout();
    let ev = event();
    enc.encode_document(&ev).unwrap();
    enc.build_destination_name(&ev.destination);
    let item = bulk_indexer::buffer::BulkItem {
        target: enc.destination_name().to_string(),
        body: enc.document().to_vec(),
    };
    let mut probe = bulk_indexer::buffer::BulkBuffer::new(Arc::new(InMemoryBulkStore::new()));
    probe.add(item);
    probe.len()
}

#[tokio::test]
async fn size_flush_issues_exactly_five_bulk_requests() {
    let store = Arc::new(InMemoryBulkStore::new());
    let indexer = Indexer::new(
        store.clone(),
        IndexerConfig {
            max_requests: 2,
            flush_bytes: fixture_item_bytes() * 10,
            flush_interval: Duration::from_secs(10),
        },
    );

    for _ in 0..50 {
        indexer
            .process_batch(CancellationToken::new(), std::slice::from_ref(&event()))
            .await
            .unwrap();
    }

    indexer.close(CancellationToken::new()).await.unwrap();

    assert_eq!(indexer.stats().added, 50);
    assert_eq!(indexer.stats().active, 0);
    assert_eq!(store.request_count(), 5);
    for body in store.requests() {
        let item_count = body.iter().filter(|&&b| b == b'\n').count() / 2;
        assert_eq!(item_count, 10);
    }
}

#[tokio::test]
async fn time_flush_issues_one_request_after_the_interval() {
    let store = Arc::new(InMemoryBulkStore::new());
    let indexer = Indexer::new(
        store.clone(),
        IndexerConfig {
            max_requests: 2,
            flush_bytes: 10 * 1024 * 1024,
            flush_interval: Duration::from_millis(50),
        },
    );

    indexer
        .process_batch(CancellationToken::new(), &[event()])
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(store.request_count(), 1);
    assert_eq!(store.requests()[0].iter().filter(|&&b| b == b'\n').count(), 2);
}

#[tokio::test]
async fn close_flushes_the_active_buffer_before_returning() {
    let store = Arc::new(InMemoryBulkStore::new());
    let indexer = Indexer::new(
        store.clone(),
        IndexerConfig {
            max_requests: 2,
            flush_bytes: 10 * 1024 * 1024,
            flush_interval: Duration::from_secs(3600),
        },
    );

    indexer
        .process_batch(CancellationToken::new(), &[event(), event(), event()])
        .await
        .unwrap();

    let result = indexer.close(CancellationToken::new()).await;

    assert!(result.is_ok());
    assert_eq!(store.request_count(), 1);
    assert_eq!(store.requests()[0].iter().filter(|&&b| b == b'\n').count(), 6);
}

#[tokio::test]
async fn close_cancellation_returns_cancelled_while_flush_finishes_in_background() {
    // A store that never responds on its own: the in-flight flush only unblocks once `ctx`
    // is cancelled, so `close`'s `workers.join_next()` genuinely races the cancellation
    // instead of resolving first by scheduler accident.
    let store = Arc::new(InMemoryBulkStore::new_blocking());
    let indexer = Indexer::new(
        store.clone(),
        IndexerConfig {
            max_requests: 2,
            flush_bytes: 10 * 1024 * 1024,
            flush_interval: Duration::from_secs(3600),
        },
    );

    indexer
        .process_batch(CancellationToken::new(), &[event()])
        .await
        .unwrap();

    let ctx = CancellationToken::new();
    let ctx_clone = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx_clone.cancel();
    });

    let result = indexer.close(ctx).await;
    assert!(matches!(result, Err(IndexerError::Cancelled)));

    // `close` returns as soon as it observes its own cancellation; the detached flush it
    // leaves running in the background still needs to unwind and account the failure.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(indexer.stats().failed >= 1);
}

#[tokio::test]
async fn per_item_failure_is_counted_and_does_not_retry() {
    let store = Arc::new(InMemoryBulkStore::new());
    let mut items = Vec::new();
    for i in 0..10 {
        let status = if i == 3 { 409 } else { 201 };
        let error = if i == 3 {
            Some(BulkItemError { kind: "version_conflict".into(), reason: "duplicate".into() })
        } else {
            None
        };
        items.push(BulkItemResult { status, error });
    }
    store.push_response(Ok(BulkResponse { items }));

    let indexer = Indexer::new(
        store.clone(),
        IndexerConfig {
            max_requests: 2,
            flush_bytes: 10 * 1024 * 1024,
            flush_interval: Duration::from_secs(3600),
        },
    );

    let batch: Vec<Event> = (0..10).map(|_| event()).collect();
    indexer
        .process_batch(CancellationToken::new(), &batch)
        .await
        .unwrap();

    indexer.close(CancellationToken::new()).await.unwrap();

    assert_eq!(indexer.stats().added, 10);
    assert_eq!(indexer.stats().failed, 1);
    assert_eq!(indexer.stats().active, 0);
}

#[tokio::test]
async fn firehose_end_to_end_splits_records_into_log_events() {
    let store = Arc::new(InMemoryBulkStore::new());
    let indexer = Indexer::new(store.clone(), IndexerConfig::default());
    let app = ingest::router(AppState {
        indexer: indexer.clone(),
        expected_access_key: "valid-key".to_string(),
        dataset: "firehose".to_string(),
    });

    let body = serde_json::json!({
        "requestId": "req-1",
        "timestamp": 1_600_000_000_000i64,
        "records": [{"data": "bGluZTEKbGluZTI="}],
    });

    let request = Request::builder()
        .method("POST")
        .uri("/services/collector/event/firehose")
        .header("content-type", "application/json")
        .header("X-Amz-Firehose-Access-Key", "valid-key")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response_body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&response_body).unwrap();
    assert_eq!(parsed["requestId"], "req-1");
    assert_eq!(parsed["timestamp"], 1_600_000_000_000i64);

    indexer.close(CancellationToken::new()).await.unwrap();
    assert_eq!(store.request_count(), 1);
    assert_eq!(store.requests()[0].iter().filter(|&&b| b == b'\n').count(), 4);
}
