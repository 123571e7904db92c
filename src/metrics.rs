use anyhow::Result;
use metrics::{counter, gauge, histogram, register_counter, register_gauge, register_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tracing::info;

/// Initialize metrics collection and Prometheus exporter
pub async fn init_metrics(port: u16) -> Result<JoinHandle<()>> {
    info!("Initializing metrics on port {}", port);

    // Register metrics
    register_counter!("events_received_total", "Total number of events received over HTTP");
    register_counter!("events_indexed_total", "Total number of events accepted into a bulk request");
    register_counter!("events_failed_total", "Total number of events rejected by the store or dropped by transport failure");
    register_counter!("bulk_requests_total", "Total number of bulk requests issued to the store");
    register_counter!("bulk_requests_failed_total", "Total number of bulk requests whose transport call failed");

    register_gauge!("indexer_active_events", "Number of events currently buffered awaiting a flush result");

    register_histogram!("bulk_request_duration_seconds", "Time taken to complete a bulk request");
    register_histogram!("bulk_request_items", "Number of items in each bulk request");

    // Start Prometheus exporter
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    let handle = tokio::spawn(async move {
        let builder = PrometheusBuilder::new();
        if let Err(e) = builder.with_http_listener(addr).install() {
            eprintln!("Failed to start metrics server: {}", e);
        }
    });

    info!("Metrics server started on http://0.0.0.0:{}/metrics", port);
    Ok(handle)
}

/// Metrics helper functions
pub struct Metrics;

impl Metrics {
    /// Record an event received over HTTP, before it is handed to the indexer.
    pub fn event_received() {
        counter!("events_received_total").increment(1);
    }

    /// Record events successfully accepted by the store in a bulk request.
    pub fn event_indexed(count: u64) {
        counter!("events_indexed_total").increment(count);
    }

    /// Record an event rejected by the store, or dropped by a transport failure.
    pub fn event_failed(count: u64) {
        counter!("events_failed_total").increment(count);
    }

    /// Record a bulk request issued to the store.
    pub fn bulk_request() {
        counter!("bulk_requests_total").increment(1);
    }

    /// Record a bulk request whose transport call failed outright.
    pub fn bulk_request_failed() {
        counter!("bulk_requests_failed_total").increment(1);
    }

    /// Update the number of events currently buffered awaiting a flush result.
    pub fn update_active_events(count: u64) {
        gauge!("indexer_active_events").set(count as f64);
    }

    /// Record how long a bulk request took to complete.
    pub fn record_bulk_request_duration(duration_seconds: f64) {
        histogram!("bulk_request_duration_seconds").record(duration_seconds);
    }

    /// Record how many items were in a bulk request.
    pub fn record_bulk_request_items(items: usize) {
        histogram!("bulk_request_items").record(items as f64);
    }
}
