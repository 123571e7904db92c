//! The encoder pool (C2): reusable per-event scratch so the hot path doesn't allocate a
//! fresh `Vec`/`String` for every event.

use std::sync::Mutex;

use thiserror::Error;

use crate::event::{Destination, Event};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize event body: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A checked-out scratch buffer, returned to its pool when dropped.
///
/// The byte buffer is drained into the bulk buffer synchronously by the caller (see
/// `BulkBuffer::add`), so by the time a `PooledEncoder` is dropped its contents have already
/// been consumed — there is no reader-exhaustion handshake to get wrong.
pub struct PooledEncoder {
    pool: std::sync::Weak<EncoderPoolInner>,
    body: Vec<u8>,
    name: String,
}

impl PooledEncoder {
    fn new() -> Self {
        Self {
            pool: std::sync::Weak::new(),
            body: Vec::new(),
            name: String::new(),
        }
    }

    /// Serializes the event's document body into this encoder's scratch buffer.
    pub fn encode_document(&mut self, event: &Event) -> Result<(), EncodeError> {
        self.body.clear();
        serde_json::to_writer(&mut self.body, &event.body)?;
        Ok(())
    }

    /// Builds the destination name into this encoder's scratch string.
    pub fn build_destination_name(&mut self, destination: &Destination) {
        self.name.clear();
        self.name.push_str(&destination.name());
    }

    pub fn document(&self) -> &[u8] {
        &self.body
    }

    pub fn destination_name(&self) -> &str {
        &self.name
    }
}

impl Drop for PooledEncoder {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            let mut body = std::mem::take(&mut self.body);
            let mut name = std::mem::take(&mut self.name);
            body.clear();
            name.clear();
            pool.idle.lock().unwrap().push((body, name));
        }
    }
}

struct EncoderPoolInner {
    idle: Mutex<Vec<(Vec<u8>, String)>>,
}

/// A pool of reusable [`PooledEncoder`] scratch buffers.
pub struct EncoderPool {
    inner: std::sync::Arc<EncoderPoolInner>,
}

impl EncoderPool {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(EncoderPoolInner {
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Checks out a scratch buffer, allocating a new one only if the pool is empty.
    pub fn checkout(&self) -> PooledEncoder {
        let slot = self.inner.idle.lock().unwrap().pop();
        let (body, name) = slot.unwrap_or_default();
        PooledEncoder {
            pool: std::sync::Arc::downgrade(&self.inner),
            body,
            name,
        }
    }
}

impl Default for EncoderPool {
    fn default() -> Self {
        Self::new()
    }
}
