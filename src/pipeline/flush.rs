//! Flush Pipeline - batched persistence with bounded retry
//!
//! ## Architecture
//!
//! ```text
//! MetricBuffer ──drain_all──► batch ──► insert_batch ──► DurableStore
//!      ▲                                   │ fail ×max_attempts
//!      │ threshold signal                  ▼
//!  enqueue                             RetryQueue ◄── retry worker (pop ≤ batch_size)
//! ```
//!
//! The buffer lock is released before any I/O; backoff sleeps only delay
//! the flush task itself.

use super::buffer::MetricBuffer;
use super::retry_queue::RetryQueue;
use super::stats::PipelineStats;
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::error::StoreError;
use crate::event::MetricEvent;
use crate::store::{insert_batch, DurableStore, InsertOptions};
use crate::worker::WorkerHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Outcome of one flush or retry pass, in events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushResult {
    pub flushed: usize,
    pub failed: usize,
}

pub struct FlushPipeline {
    buffer: Arc<MetricBuffer>,
    retry_queue: Arc<RetryQueue>,
    store: Arc<dyn DurableStore>,
    stats: Arc<PipelineStats>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl FlushPipeline {
    pub fn new(
        buffer: Arc<MetricBuffer>,
        retry_queue: Arc<RetryQueue>,
        store: Arc<dyn DurableStore>,
        stats: Arc<PipelineStats>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        FlushPipeline {
            buffer,
            retry_queue,
            store,
            stats,
            clock,
            config,
        }
    }

    /// Drain the buffer and persist everything in it as one batch
    pub async fn flush(&self) -> FlushResult {
        let batch = self.buffer.drain_all();
        if batch.is_empty() {
            return FlushResult::default();
        }
        self.persist(batch).await
    }

    /// Re-attempt up to one batch worth of deferred events with a fresh budget
    pub async fn process_retry_queue(&self) -> FlushResult {
        let batch = self.retry_queue.pop(self.config.batch_size);
        if batch.is_empty() {
            return FlushResult::default();
        }
        info!("Processing {} metrics from retry queue", batch.len());
        self.persist(batch).await
    }

    /// Persist a batch; on exhausted retries hand it to the retry queue.
    /// Only rows the store reports as stored count as flushed.
    async fn persist(&self, batch: Vec<MetricEvent>) -> FlushResult {
        let len = batch.len();
        match self.persist_with_retry(&batch).await {
            Ok(stored) => {
                if stored != len {
                    warn!("Store kept {} of {} metrics in batch", stored, len);
                }
                self.stats.record_flushed(stored, self.clock.now_ms());
                FlushResult {
                    flushed: stored,
                    failed: 0,
                }
            }
            Err(e) => {
                error!(
                    "Max retries reached for batch of {} metrics, deferring: {}",
                    len, e
                );
                self.stats.record_failed(len);
                self.retry_queue.push(batch);
                FlushResult {
                    flushed: 0,
                    failed: len,
                }
            }
        }
    }

    /// Up to `max_attempts` transactional inserts with doubling backoff.
    /// Returns the number of rows the committing attempt stored.
    pub async fn persist_with_retry(&self, batch: &[MetricEvent]) -> Result<usize, StoreError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            match insert_batch(self.store.as_ref(), batch, InsertOptions::bulk()).await {
                Ok(stored) => {
                    info!(
                        "Flushed {} metrics in {}ms (Total: {})",
                        stored,
                        started.elapsed().as_millis(),
                        self.stats.total_flushed() + stored as u64
                    );
                    return Ok(stored);
                }
                Err(e) => {
                    error!("Flush attempt {}/{} failed: {}", attempt, max_attempts, e);
                    if attempt >= max_attempts {
                        return Err(e);
                    }
                    let delay = self.backoff(attempt);
                    debug!("Retrying in {}ms", delay.as_millis());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Delay after the given failed attempt: base, 2×base, 4×base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.config.retry_base_delay.saturating_mul(1u32 << shift)
    }

    pub fn buffer(&self) -> &Arc<MetricBuffer> {
        &self.buffer
    }

    pub fn retry_queue(&self) -> &Arc<RetryQueue> {
        &self.retry_queue
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

// ============================================================================
// Workers
// ============================================================================

/// Spawn the flush worker: flushes on every interval tick with a non-empty
/// buffer and whenever the buffer signals its batch threshold. Performs a
/// final flush on shutdown.
pub fn spawn_flush_worker(pipeline: Arc<FlushPipeline>) -> WorkerHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let signal = pipeline.buffer.flush_signal();
    let interval = pipeline.config.flush_interval;

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        info!("Periodic flush started (every {}ms)", interval.as_millis());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let pending = pipeline.buffer.len();
                    if pending > 0 {
                        debug!("Periodic flush ({} metrics)", pending);
                        pipeline.flush().await;
                    }
                }
                _ = signal.notified() => {
                    pipeline.flush().await;
                }
                _ = &mut shutdown_rx => {
                    let result = pipeline.flush().await;
                    info!(
                        "Flush worker stopped (final flush: {} flushed, {} failed)",
                        result.flushed, result.failed
                    );
                    break;
                }
            }
        }
    });

    WorkerHandle::new("flush", shutdown_tx, task)
}

/// Spawn the retry worker: every `retry_interval`, reprocess one batch
/// from the retry queue
pub fn spawn_retry_worker(pipeline: Arc<FlushPipeline>) -> WorkerHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let interval = pipeline.config.retry_interval;

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        info!("Retry queue processing started (every {}ms)", interval.as_millis());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !pipeline.retry_queue.is_empty() {
                        pipeline.process_retry_queue().await;
                    }
                }
                _ = &mut shutdown_rx => {
                    info!("Retry worker stopped ({} metrics still deferred)", pipeline.retry_queue.len());
                    break;
                }
            }
        }
    });

    WorkerHandle::new("retry", shutdown_tx, task)
}
