use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Pipeline counters, shared by the buffer, flush pipeline, and retry queue
///
/// Every failure class the pipeline swallows is visible here.
#[derive(Debug)]
pub struct PipelineStats {
    /// Events accepted into the buffer
    total_processed: AtomicU64,
    /// Events durably persisted
    total_flushed: AtomicU64,
    /// Events rejected by a full buffer
    total_dropped: AtomicU64,
    /// Events whose batch exhausted its retries (counted each time)
    total_failed: AtomicU64,
    /// Deferred events evicted from a full retry queue
    total_evicted: AtomicU64,
    /// Successful batch commits
    batches_flushed: AtomicU64,
    /// Epoch ms of the last successful flush
    last_flush_ms: AtomicU64,
    store_reachable: AtomicBool,
}

impl PipelineStats {
    /// `now_ms` seeds the last-flush time so a fresh pipeline starts healthy
    pub fn new(now_ms: u64) -> Self {
        PipelineStats {
            total_processed: AtomicU64::new(0),
            total_flushed: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
            batches_flushed: AtomicU64::new(0),
            last_flush_ms: AtomicU64::new(now_ms),
            store_reachable: AtomicBool::new(true),
        }
    }

    pub(crate) fn record_processed(&self) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the new dropped total
    pub(crate) fn record_dropped(&self) -> u64 {
        self.total_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_flushed(&self, events: usize, now_ms: u64) {
        self.total_flushed.fetch_add(events as u64, Ordering::Relaxed);
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.last_flush_ms.store(now_ms, Ordering::Relaxed);
        self.store_reachable.store(true, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, events: usize) {
        self.total_failed.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self, events: usize) {
        self.total_evicted.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn set_store_reachable(&self, reachable: bool) {
        self.store_reachable.store(reachable, Ordering::Relaxed);
    }

    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::Relaxed)
    }

    pub fn total_flushed(&self) -> u64 {
        self.total_flushed.load(Ordering::Relaxed)
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::Relaxed)
    }

    pub fn total_evicted(&self) -> u64 {
        self.total_evicted.load(Ordering::Relaxed)
    }

    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed.load(Ordering::Relaxed)
    }

    pub fn last_flush_ms(&self) -> u64 {
        self.last_flush_ms.load(Ordering::Relaxed)
    }

    pub fn store_reachable(&self) -> bool {
        self.store_reachable.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PipelineCounters {
        PipelineCounters {
            total_processed: self.total_processed(),
            total_flushed: self.total_flushed(),
            total_dropped: self.total_dropped(),
            total_failed: self.total_failed(),
            total_evicted: self.total_evicted(),
            batches_flushed: self.batches_flushed(),
            last_flush_ms: self.last_flush_ms(),
            store_reachable: self.store_reachable(),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineCounters {
    pub total_processed: u64,
    pub total_flushed: u64,
    pub total_dropped: u64,
    pub total_failed: u64,
    pub total_evicted: u64,
    pub batches_flushed: u64,
    pub last_flush_ms: u64,
    pub store_reachable: bool,
}
