//! Read-only status accessors
//!
//! Everything an external status endpoint needs, gathered without taking
//! any lock for longer than a counter read or a map iteration.

use crate::aggregation::{AggregationEngine, AggregationStats};
use crate::broadcast::{DashboardBroadcaster, DashboardStats};
use crate::clock::Clock;
use crate::event::AggregationKey;
use crate::ingest::{ConnectionRegistry, StreamStats};
use crate::pipeline::{MetricBuffer, PipelineStats, RetryQueue};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub buffer_size: usize,
    pub buffer_capacity: usize,
    /// Percent of buffer capacity in use
    pub utilization: f64,
    pub is_buffer_full: bool,
    pub retry_queue_size: usize,
    pub retry_queue_capacity: usize,
    pub total_processed: u64,
    pub total_flushed: u64,
    pub total_dropped: u64,
    pub total_failed: u64,
    pub total_evicted: u64,
    pub batches_flushed: u64,
    pub last_flush_ms: u64,
    pub time_since_last_flush_ms: u64,
    pub store_reachable: bool,
    pub is_healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub pipeline: PipelineStatus,
    pub aggregation: AggregationStats,
    pub streams: StreamStats,
    pub dashboard: DashboardStats,
}

pub struct StatusReporter {
    buffer: Arc<MetricBuffer>,
    retry_queue: Arc<RetryQueue>,
    stats: Arc<PipelineStats>,
    engine: Arc<AggregationEngine>,
    connections: Arc<ConnectionRegistry>,
    broadcaster: Arc<DashboardBroadcaster>,
    clock: Arc<dyn Clock>,
    flush_staleness: Duration,
}

impl StatusReporter {
    pub fn new(
        buffer: Arc<MetricBuffer>,
        retry_queue: Arc<RetryQueue>,
        stats: Arc<PipelineStats>,
        engine: Arc<AggregationEngine>,
        connections: Arc<ConnectionRegistry>,
        broadcaster: Arc<DashboardBroadcaster>,
        clock: Arc<dyn Clock>,
        flush_staleness: Duration,
    ) -> Self {
        StatusReporter {
            buffer,
            retry_queue,
            stats,
            engine,
            connections,
            broadcaster,
            clock,
            flush_staleness,
        }
    }

    pub fn total_processed(&self) -> u64 {
        self.stats.total_processed()
    }

    pub fn total_flushed(&self) -> u64 {
        self.stats.total_flushed()
    }

    pub fn total_dropped(&self) -> u64 {
        self.stats.total_dropped()
    }

    pub fn total_failed(&self) -> u64 {
        self.stats.total_failed()
    }

    pub fn buffer_occupancy(&self) -> usize {
        self.buffer.len()
    }

    pub fn retry_queue_depth(&self) -> usize {
        self.retry_queue.len()
    }

    pub fn aggregation_counts(&self) -> Vec<(AggregationKey, u64)> {
        self.engine.counts()
    }

    /// Whether ingestion would currently be accepted
    pub fn can_accept(&self) -> bool {
        self.buffer.can_accept()
    }

    /// Healthy when the buffer is not rejecting, a flush succeeded within
    /// the staleness window, and the store answered its last probe
    pub fn pipeline_status(&self) -> PipelineStatus {
        let counters = self.stats.snapshot();
        let since_flush = self.clock.elapsed_ms(counters.last_flush_ms);
        let is_buffer_full = self.buffer.is_full();
        let is_healthy = !is_buffer_full
            && since_flush < self.flush_staleness.as_millis() as u64
            && counters.store_reachable;

        PipelineStatus {
            buffer_size: self.buffer.len(),
            buffer_capacity: self.buffer.capacity(),
            utilization: (self.buffer.utilization() * 100.0).round() / 100.0,
            is_buffer_full,
            retry_queue_size: self.retry_queue.len(),
            retry_queue_capacity: self.retry_queue.capacity(),
            total_processed: counters.total_processed,
            total_flushed: counters.total_flushed,
            total_dropped: counters.total_dropped,
            total_failed: counters.total_failed,
            total_evicted: counters.total_evicted,
            batches_flushed: counters.batches_flushed,
            last_flush_ms: counters.last_flush_ms,
            time_since_last_flush_ms: since_flush,
            store_reachable: counters.store_reachable,
            is_healthy,
        }
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            pipeline: self.pipeline_status(),
            aggregation: self.engine.stats(),
            streams: self.connections.stream_stats(),
            dashboard: self.broadcaster.stats(),
        }
    }

    pub fn status_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.status())
    }
}
