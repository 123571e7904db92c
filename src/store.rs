//! The document store interface (out of scope as a concrete product integration) and the
//! two implementations this crate ships: a real NDJSON-over-HTTP client, and an in-memory
//! fake used by tests.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::buffer::BulkResponse;

/// A document store exposing a bulk-write API. Transport errors are surfaced as a single
/// error for the whole request; per-item outcomes live inside the returned [`BulkResponse`].
#[async_trait]
pub trait BulkStore: Send + Sync {
    async fn bulk(&self, ctx: CancellationToken, body: Bytes) -> Result<BulkResponse, anyhow::Error>;
}

/// `reqwest`-backed client that POSTs an NDJSON bulk body to `{base_url}/_bulk`.
pub struct HttpBulkStore {
    client: reqwest::Client,
    bulk_url: String,
}

impl HttpBulkStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let bulk_url = format!("{}/_bulk", base_url.trim_end_matches('/'));
        Self {
            client: reqwest::Client::new(),
            bulk_url,
        }
    }
}

#[async_trait]
impl BulkStore for HttpBulkStore {
    async fn bulk(&self, ctx: CancellationToken, body: Bytes) -> Result<BulkResponse, anyhow::Error> {
        let request = self
            .client
            .post(&self.bulk_url)
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send();

        let response = tokio::select! {
            result = request => result?,
            _ = ctx.cancelled() => anyhow::bail!("bulk request cancelled"),
        };

        let response = response.error_for_status()?;
        let parsed: BulkResponse = response.json().await?;
        Ok(parsed)
    }
}

/// Scriptable in-memory fake: records every bulk request it receives and replays
/// pre-programmed responses (or errors) in call order, falling back to an all-201 response
/// once the script is exhausted.
pub struct InMemoryBulkStore {
    state: Mutex<InMemoryState>,
    block_until_cancelled: bool,
}

#[derive(Default)]
struct InMemoryState {
    requests: Vec<Bytes>,
    scripted_responses: Vec<Result<BulkResponse, String>>,
    next: usize,
}

impl InMemoryBulkStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState::default()),
            block_until_cancelled: false,
        }
    }

    /// A store whose `bulk` never resolves on its own — it records the request, then waits
    /// on `ctx` the way `HttpBulkStore` waits on its in-flight request, returning an error
    /// only once cancelled. For exercising cancellation-during-flush.
    pub fn new_blocking() -> Self {
        Self {
            state: Mutex::new(InMemoryState::default()),
            block_until_cancelled: true,
        }
    }

    /// Queue a response (or error) to be returned by the next `bulk` call, in order.
    pub fn push_response(&self, response: Result<BulkResponse, String>) {
        self.state.lock().unwrap().scripted_responses.push(response);
    }

    pub fn requests(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }
}

impl Default for InMemoryBulkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BulkStore for InMemoryBulkStore {
    async fn bulk(&self, ctx: CancellationToken, body: Bytes) -> Result<BulkResponse, anyhow::Error> {
        if self.block_until_cancelled {
            self.state.lock().unwrap().requests.push(body);
            tokio::select! {
                _ = ctx.cancelled() => anyhow::bail!("bulk request cancelled"),
                _ = std::future::pending::<()>() => unreachable!(),
            }
        }

        let mut state = self.state.lock().unwrap();
        let item_count = body
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .count()
            / 2;
        state.requests.push(body);

        let idx = state.next;
        if idx < state.scripted_responses.len() {
            state.next += 1;
            return match state.scripted_responses[idx].clone() {
                Ok(resp) => Ok(resp),
                Err(msg) => Err(anyhow::anyhow!(msg)),
            };
        }

        Ok(BulkResponse {
            items: (0..item_count)
                .map(|_| crate::buffer::BulkItemResult {
                    status: 201,
                    error: None,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BulkItemResult;

    #[tokio::test]
    async fn in_memory_store_defaults_to_all_success() {
        let store = InMemoryBulkStore::new();
        let body = Bytes::from_static(b"{\"create\":{}}\n{}\n");
        let resp = store.bulk(CancellationToken::new(), body).await.unwrap();
        assert_eq!(resp.items.len(), 1);
        assert_eq!(resp.items[0].status, 201);
    }

    #[tokio::test]
    async fn in_memory_store_plays_back_scripted_responses_in_order() {
        let store = InMemoryBulkStore::new();
        store.push_response(Ok(BulkResponse {
            items: vec![BulkItemResult {
                status: 409,
                error: Some(crate::buffer::BulkItemError {
                    kind: "conflict".into(),
                    reason: "dup".into(),
                }),
            }],
        }));
        store.push_response(Err("boom".to_string()));

        let body = Bytes::from_static(b"{\"create\":{}}\n{}\n");
        let first = store.bulk(CancellationToken::new(), body.clone()).await.unwrap();
        assert_eq!(first.items[0].status, 409);

        let second = store.bulk(CancellationToken::new(), body).await;
        assert!(second.is_err());

        assert_eq!(store.request_count(), 2);
    }
}
