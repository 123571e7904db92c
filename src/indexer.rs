//! The indexer (C3): the public entry point for submitting events. Owns the single
//! "filling" buffer, the idle-buffer pool, the flush timer, and the worker group that
//! performs in-flight flushes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::buffer::{BulkBuffer, BulkBufferError, BulkItem};
use crate::encoder::{EncodeError, EncoderPool};
use crate::event::Event;
use crate::ratelimit::RateLimiter;
use crate::store::BulkStore;
use crate::worker;

const DEFAULT_MAX_REQUESTS: usize = 10;
const DEFAULT_FLUSH_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Tuning knobs for one [`Indexer`]. Values `<= 0`/zero fall back to the documented default
/// when passed through [`IndexerConfig::normalized`].
#[derive(Debug, Clone, Copy)]
pub struct IndexerConfig {
    pub max_requests: usize,
    pub flush_bytes: usize,
    pub flush_interval: Duration,
}

impl IndexerConfig {
    pub fn normalized(self) -> Self {
        Self {
            max_requests: if self.max_requests == 0 {
                DEFAULT_MAX_REQUESTS
            } else {
                self.max_requests
            },
            flush_bytes: if self.flush_bytes == 0 {
                DEFAULT_FLUSH_BYTES
            } else {
                self.flush_bytes
            },
            flush_interval: if self.flush_interval.is_zero() {
                DEFAULT_FLUSH_INTERVAL
            } else {
                self.flush_interval
            },
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            flush_bytes: DEFAULT_FLUSH_BYTES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexerStats {
    pub added: u64,
    pub active: u64,
    pub failed: u64,
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("indexer is closed")]
    Closed,
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Flush(#[from] BulkBufferError),
}

/// Shared atomic counters, cloned into the worker group so flush tasks can update them after
/// `process_batch` (or even `close`) has already returned.
#[derive(Default)]
pub struct Counters {
    pub added: AtomicU64,
    pub active: AtomicU64,
    pub failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> IndexerStats {
        IndexerStats {
            added: self.added.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// State guarded by the fill lock: the buffer currently accepting items, and the claim flag
/// for whichever of {threshold, timer, close} next hands it off.
struct FillState {
    active: Option<BulkBuffer>,
    timer_claimed: Option<Arc<AtomicBool>>,
    idle_rx: mpsc::Receiver<BulkBuffer>,
}

/// A concurrent bulk-indexing engine: accepts events, batches them into bulk requests by
/// size or time, and flushes a bounded number of requests concurrently.
///
/// Two locks guard disjoint concerns. `closing` (a [`RwLock`]) is read-locked for the
/// duration of every [`Indexer::process_batch`] call and write-locked once, by
/// [`Indexer::close`], so close can only proceed once all in-flight submissions have
/// returned. `fill` (a [`Mutex`]) guards the active buffer slot and is never held across
/// the network I/O of an actual flush.
pub struct Indexer {
    config: IndexerConfig,
    closing: RwLock<bool>,
    fill: Mutex<FillState>,
    idle_tx: mpsc::Sender<BulkBuffer>,
    workers: Mutex<JoinSet<Result<(), BulkBufferError>>>,
    counters: Arc<Counters>,
    encoders: EncoderPool,
    rate_limiter: Arc<RateLimiter>,
    lifecycle_token: CancellationToken,
    self_weak: OnceLock<Weak<Indexer>>,
}

impl Indexer {
    pub fn new(store: Arc<dyn BulkStore>, config: IndexerConfig) -> Arc<Self> {
        let config = config.normalized();
        let (idle_tx, idle_rx) = mpsc::channel(config.max_requests);
        for _ in 0..config.max_requests {
            let _ = idle_tx.try_send(BulkBuffer::new(store.clone()));
        }

        let indexer = Arc::new(Self {
            config,
            closing: RwLock::new(false),
            fill: Mutex::new(FillState {
                active: None,
                timer_claimed: None,
                idle_rx,
            }),
            idle_tx,
            workers: Mutex::new(JoinSet::new()),
            counters: Arc::new(Counters::default()),
            encoders: EncoderPool::new(),
            rate_limiter: Arc::new(RateLimiter::default()),
            lifecycle_token: CancellationToken::new(),
            self_weak: OnceLock::new(),
        });
        let _ = indexer.self_weak.set(Arc::downgrade(&indexer));
        indexer
    }

    pub fn stats(&self) -> IndexerStats {
        self.counters.snapshot()
    }

    /// Submits a batch of events. Holds the lifecycle read lock for the whole call, so a
    /// concurrent `close` cannot complete until every in-flight `process_batch` has returned.
    pub async fn process_batch(
        &self,
        ctx: CancellationToken,
        events: &[Event],
    ) -> Result<(), IndexerError> {
        let closing = self.closing.read().await;
        if *closing {
            return Err(IndexerError::Closed);
        }

        for event in events {
            if ctx.is_cancelled() {
                return Err(IndexerError::Cancelled);
            }
            self.process_one(&ctx, event).await?;
        }
        Ok(())
    }

    async fn process_one(&self, ctx: &CancellationToken, event: &Event) -> Result<(), IndexerError> {
        let mut encoder = self.encoders.checkout();
        encoder.encode_document(event)?;
        encoder.build_destination_name(&event.destination);

        let mut fill = self.fill.lock().await;
        if fill.active.is_none() {
            let buffer = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(IndexerError::Cancelled),
                buffer = fill.idle_rx.recv() => buffer.expect("idle_tx outlives idle_rx while Indexer is alive"),
            };
            fill.active = Some(buffer);
            self.arm_timer(&mut fill);
        }

        let item = BulkItem {
            target: encoder.destination_name().to_string(),
            body: encoder.document().to_vec(),
        };
        drop(encoder);

        let active = fill.active.as_mut().expect("just ensured active buffer");
        active.add(item);
        self.counters.added.fetch_add(1, Ordering::SeqCst);
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        crate::metrics::Metrics::update_active_events(self.counters.active.load(Ordering::SeqCst));

        if active.len() >= self.config.flush_bytes {
            if let Some(claim) = fill.timer_claimed.take() {
                if claim.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                    self.handoff_locked(&mut fill);
                } else {
                    // Timer already claimed the handoff; nothing left to do here.
                    fill.timer_claimed = None;
                }
            } else {
                self.handoff_locked(&mut fill);
            }
        }

        Ok(())
    }

    /// Spawns the timer task for the buffer that was just made active. Must be called with
    /// `fill` locked and `fill.active` populated.
    fn arm_timer(&self, fill: &mut FillState) {
        let claimed = Arc::new(AtomicBool::new(false));
        fill.timer_claimed = Some(claimed.clone());

        let interval = self.config.flush_interval;
        let Some(weak) = self.self_weak.get().cloned() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if claimed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                return;
            }
            if let Some(indexer) = weak.upgrade() {
                indexer.timer_fired_handoff().await;
            }
        });
    }

    /// Invoked by a timer task that has already won the CAS race for the buffer it armed.
    async fn timer_fired_handoff(&self) {
        let mut fill = self.fill.lock().await;
        if fill.active.is_some() {
            self.handoff_locked(&mut fill);
        }
    }

    /// Takes the active buffer out of `fill` and spawns a worker to flush it. Must be called
    /// with `fill` locked and `fill.active` populated; never awaits I/O itself.
    fn handoff_locked(&self, fill: &mut FillState) {
        let Some(buffer) = fill.active.take() else {
            return;
        };
        fill.timer_claimed = None;

        let ctx = self.lifecycle_token.child_token();
        let counters = self.counters.clone();
        let idle_tx = self.idle_tx.clone();
        let rate_limiter = self.rate_limiter.clone();

        if let Ok(mut workers) = self.workers.try_lock() {
            workers.spawn(worker::run_flush(buffer, ctx, counters, idle_tx, rate_limiter));
        } else {
            // `close` is draining the worker group concurrently; spawn loose and let it run
            // to completion on its own, updating counters when it finishes.
            tokio::spawn(worker::run_flush(buffer, ctx, counters, idle_tx, rate_limiter));
        }
    }

    /// Stops accepting new batches, flushes whatever is currently active, and waits for every
    /// in-flight flush to finish. If `ctx` is cancelled first, the lifecycle token is
    /// cancelled (unwinding in-flight HTTP calls quickly), the remaining flushes are detached
    /// to finish in the background, and `Err(Cancelled)` is returned immediately — callers
    /// may observe `failed` increase after `close` has already returned.
    pub async fn close(&self, ctx: CancellationToken) -> Result<(), IndexerError> {
        {
            let mut closing = self.closing.write().await;
            *closing = true;
        }

        {
            let mut fill = self.fill.lock().await;
            if fill.active.is_some() {
                fill.timer_claimed = None;
                self.handoff_locked(&mut fill);
            }
        }

        let mut workers = self.workers.lock().await;
        let mut first_error = None;
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    self.lifecycle_token.cancel();
                    let remaining = std::mem::take(&mut *workers);
                    tokio::spawn(Self::reap(remaining));
                    return Err(IndexerError::Cancelled);
                }
                joined = workers.join_next() => {
                    match joined {
                        None => break,
                        Some(Ok(Err(e))) => {
                            if first_error.is_none() {
                                first_error = Some(e);
                            }
                        }
                        Some(Ok(Ok(()))) => {}
                        Some(Err(join_err)) => {
                            warn!(error = %join_err, "flush worker task panicked or was cancelled");
                        }
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(IndexerError::Flush(e)),
            None => Ok(()),
        }
    }

    /// Drains a detached worker group in the background after a cancelled `close`. Each
    /// flush task already updated `counters`/metrics itself before finishing; this just
    /// keeps the `JoinSet` draining so it isn't dropped with tasks still in flight.
    async fn reap(mut workers: JoinSet<Result<(), BulkBufferError>>) {
        while let Some(joined) = workers.join_next().await {
            if let Ok(Err(e)) = joined {
                warn!(error = %e, "flush failed after close was cancelled");
            }
        }
    }
}
