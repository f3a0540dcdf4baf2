use super::stats::PipelineStats;
use crate::event::MetricEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};

/// Bounded FIFO of events whose batch exhausted its retries
///
/// Guarded by its own lock, independent of the metric buffer, so retry
/// reprocessing and fresh ingestion never contend.
pub struct RetryQueue {
    items: Mutex<VecDeque<MetricEvent>>,
    capacity: usize,
    stats: Arc<PipelineStats>,
}

impl RetryQueue {
    pub fn new(capacity: usize, stats: Arc<PipelineStats>) -> Self {
        debug_assert!(capacity > 0, "retry queue capacity must be > 0");
        RetryQueue {
            items: Mutex::new(VecDeque::new()),
            capacity,
            stats,
        }
    }

    /// Append items, evicting the oldest first if they would not fit.
    /// Returns the number of events evicted.
    pub fn push(&self, items: Vec<MetricEvent>) -> usize {
        if items.is_empty() {
            return 0;
        }
        let incoming = items.len();

        let (evicted, depth) = {
            let mut queue = self.items.lock();
            let overflow = (queue.len() + incoming).saturating_sub(self.capacity);

            // Oldest queued items go first; only if the batch alone exceeds
            // capacity do the oldest of the incoming items go too
            let from_queue = overflow.min(queue.len());
            queue.drain(..from_queue);
            let from_incoming = overflow - from_queue;
            queue.extend(items.into_iter().skip(from_incoming));

            debug_assert!(queue.len() <= self.capacity);
            (overflow, queue.len())
        };

        if evicted > 0 {
            warn!("Retry queue full, dropping {} oldest metrics", evicted);
            self.stats.record_evicted(evicted);
        }
        info!("Added {} metrics to retry queue (Total: {})", incoming, depth);
        evicted
    }

    /// Remove and return up to `max_count` of the oldest items
    pub fn pop(&self, max_count: usize) -> Vec<MetricEvent> {
        let mut queue = self.items.lock();
        let n = max_count.min(queue.len());
        queue.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
