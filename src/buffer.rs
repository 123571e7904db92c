//! The bulk buffer (C1): accumulates serialized documents into one pending bulk request.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::store::BulkStore;

/// The action verb used for every bulk item.
///
/// `create` is mandatory (not `index`) so duplicate writes by the store are rejected rather
/// than overwrite.
const BULK_ACTION: &str = "create";

/// One document plus its destination target, ready to be appended to a [`BulkBuffer`].
///
/// `target` is the already-built `type-dataset-namespace` string (see
/// [`crate::encoder::PooledEncoder::build_destination_name`]) rather than a
/// [`crate::event::Destination`], so the name is formatted exactly once per event.
pub struct BulkItem {
    pub target: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum BulkBufferError {
    #[error("bulk request failed: {0}")]
    Io(#[source] anyhow::Error),
}

/// Per-item result reported by the store in a [`BulkResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BulkItemError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemError {
    pub kind: String,
    pub reason: String,
}

/// The store's response to one bulk request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BulkResponse {
    pub items: Vec<BulkItemResult>,
}

impl BulkItemResult {
    /// An item whose status is past the success range or that carries a non-empty error is
    /// considered rejected by the store.
    pub fn is_rejected(&self) -> bool {
        self.status > 201 || self.error.is_some()
    }
}

/// Accumulates serialized bulk items (action-metadata line + body line, NDJSON) until
/// flushed. One instance cycles through idle-in-pool -> filling -> flushing -> idle-in-pool;
/// `reset` returns it to the idle state without releasing its backing allocation.
pub struct BulkBuffer {
    store: Arc<dyn BulkStore>,
    bytes: Vec<u8>,
    items: usize,
}

impl BulkBuffer {
    pub fn new(store: Arc<dyn BulkStore>) -> Self {
        Self {
            store,
            bytes: Vec::new(),
            items: 0,
        }
    }

    /// Appends one item's action-metadata line and body line, charging their combined length
    /// to `len()` and incrementing `items()`.
    pub fn add(&mut self, item: BulkItem) {
        let action_line = serde_json::json!({ BULK_ACTION: { "_index": item.target } });
        serde_json::to_writer(&mut self.bytes, &action_line).expect("action line is valid JSON");
        self.bytes.push(b'\n');
        self.bytes.extend_from_slice(&item.body);
        self.bytes.push(b'\n');
        self.items += 1;
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    pub fn items(&self) -> usize {
        self.items
    }

    /// Issues the accumulated bulk request against the store.
    pub async fn flush(&mut self, ctx: CancellationToken) -> Result<BulkResponse, BulkBufferError> {
        let body = Bytes::copy_from_slice(&self.bytes);
        self.store
            .bulk(ctx, body)
            .await
            .map_err(BulkBufferError::Io)
    }

    /// Clears `len`, `items`, and the bytes without releasing capacity.
    pub fn reset(&mut self) {
        self.bytes.clear();
        self.items = 0;
    }
}
