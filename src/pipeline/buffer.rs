//! Metric Buffer
//!
//! The single bounded queue between every ingestion connection and the
//! flush pipeline. The lock covers only the vector bookkeeping; callers
//! never wait for room and persistence never happens under it.

use super::stats::PipelineStats;
use crate::event::MetricEvent;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Log one warning per this many rejected events
const DROP_LOG_EVERY: u64 = 100;

pub struct MetricBuffer {
    events: Mutex<Vec<MetricEvent>>,
    capacity: usize,
    /// Occupancy at which the flush pipeline is woken early
    batch_threshold: usize,
    flush_signal: Arc<Notify>,
    stats: Arc<PipelineStats>,
    /// Set by the last rejected enqueue, cleared by the next accepted one
    full: AtomicBool,
}

impl MetricBuffer {
    pub fn new(capacity: usize, batch_threshold: usize, stats: Arc<PipelineStats>) -> Self {
        debug_assert!(capacity > 0, "buffer capacity must be > 0");
        debug_assert!(
            batch_threshold > 0 && batch_threshold <= capacity,
            "batch threshold {} outside 1..={}",
            batch_threshold,
            capacity
        );
        MetricBuffer {
            events: Mutex::new(Vec::with_capacity(batch_threshold)),
            capacity,
            batch_threshold,
            flush_signal: Arc::new(Notify::new()),
            stats,
            full: AtomicBool::new(false),
        }
    }

    /// Append an event. Returns false, leaving the buffer untouched, when full.
    pub fn enqueue(&self, event: MetricEvent) -> bool {
        let occupancy = {
            let mut events = self.events.lock();
            if events.len() >= self.capacity {
                None
            } else {
                events.push(event);
                Some(events.len())
            }
        };

        match occupancy {
            None => {
                self.full.store(true, Ordering::Relaxed);
                let dropped = self.stats.record_dropped();
                if dropped % DROP_LOG_EVERY == 0 {
                    warn!("Buffer full! Dropped {} metrics total", dropped);
                }
                false
            }
            Some(len) => {
                self.full.store(false, Ordering::Relaxed);
                self.stats.record_processed();
                // Signalled after the lock is released; the flush task drains it
                if len >= self.batch_threshold {
                    self.flush_signal.notify_one();
                }
                true
            }
        }
    }

    /// Atomically take every buffered event in insertion order
    pub fn drain_all(&self) -> Vec<MetricEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn batch_threshold(&self) -> usize {
        self.batch_threshold
    }

    /// Whether the most recent enqueue was rejected
    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Relaxed)
    }

    /// Whether an enqueue right now would find room
    pub fn can_accept(&self) -> bool {
        self.len() < self.capacity
    }

    /// Woken whenever occupancy reaches the batch threshold
    pub fn flush_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.flush_signal)
    }

    /// Utilization in percent, for status reporting
    pub fn utilization(&self) -> f64 {
        self.len() as f64 * 100.0 / self.capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn buffer(capacity: usize, threshold: usize) -> MetricBuffer {
        MetricBuffer::new(capacity, threshold, Arc::new(PipelineStats::new(0)))
    }

    fn event(i: u64) -> MetricEvent {
        MetricEvent::new("srv-1", "cpu", i as f64, i)
    }

    #[test]
    fn test_capacity_two_scenario() {
        let buf = buffer(2, 2);
        let (e1, e2, e3) = (event(1), event(2), event(3));

        assert!(buf.enqueue(e1.clone()));
        assert!(buf.enqueue(e2.clone()));
        assert!(!buf.enqueue(e3));
        assert!(buf.is_full());

        assert_eq!(buf.drain_all(), vec![e1, e2]);
        assert!(buf.is_empty());

        assert!(buf.enqueue(event(4)));
        assert!(!buf.is_full());
    }

    #[test]
    fn test_rejected_enqueue_leaves_contents_unchanged() {
        let buf = buffer(3, 3);
        for i in 0..3 {
            assert!(buf.enqueue(event(i)));
        }

        assert!(!buf.enqueue(event(99)));
        assert_eq!(buf.len(), 3);
        let drained = buf.drain_all();
        assert_eq!(drained, (0..3).map(event).collect::<Vec<_>>());
    }

    #[test]
    fn test_drain_preserves_order_exactly_once() {
        let buf = buffer(1000, 1000);
        let events: Vec<MetricEvent> = (0..500).map(event).collect();
        for e in &events {
            assert!(buf.enqueue(e.clone()));
        }

        assert_eq!(buf.drain_all(), events);
        assert!(buf.drain_all().is_empty());
    }

    #[test]
    fn test_counters() {
        let stats = Arc::new(PipelineStats::new(0));
        let buf = MetricBuffer::new(1, 1, stats.clone());

        assert!(buf.enqueue(event(1)));
        assert!(!buf.enqueue(event(2)));
        assert!(!buf.enqueue(event(3)));

        assert_eq!(stats.total_processed(), 1);
        assert_eq!(stats.total_dropped(), 2);
    }

    #[tokio::test]
    async fn test_threshold_signals_flush() {
        let buf = buffer(10, 3);
        let signal = buf.flush_signal();

        buf.enqueue(event(1));
        buf.enqueue(event(2));
        let early = tokio::time::timeout(Duration::from_millis(20), signal.notified()).await;
        assert!(early.is_err(), "signalled below threshold");

        buf.enqueue(event(3));
        tokio::time::timeout(Duration::from_secs(1), signal.notified())
            .await
            .expect("threshold reached but flush not signalled");
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_never_exceeds_capacity() {
        let buf = Arc::new(buffer(100, 100));
        let mut handles = Vec::new();
        for task in 0..8u64 {
            let buf = Arc::clone(&buf);
            handles.push(tokio::spawn(async move {
                let mut accepted = 0usize;
                for i in 0..50 {
                    if buf.enqueue(event(task * 1000 + i)) {
                        accepted += 1;
                    }
                }
                accepted
            }));
        }

        let accepted: usize = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .sum();

        assert_eq!(accepted, 100);
        assert_eq!(buf.drain_all().len(), 100);
    }
}
