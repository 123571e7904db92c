//! The HTTP ingestion surface (C5). Demonstrates the `process_batch` boundary over a
//! cloud-delivery-stream style endpoint; the indexer itself has no opinion about transport.

mod error;
mod firehose;

use std::sync::Arc;

use axum::routing::post;
use axum::Router;

use crate::indexer::Indexer;

pub use error::IngestError;

#[derive(Clone)]
pub struct AppState {
    pub indexer: Arc<Indexer>,
    pub expected_access_key: String,
    pub dataset: String,
}

/// Builds the ingestion router. Only `POST` is registered on the firehose route, so any
/// other method is answered `405 Method Not Allowed` by axum itself before application code
/// ever runs.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/services/collector/event/firehose", post(firehose::ingest))
        .with_state(state)
}
