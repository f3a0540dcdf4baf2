//! Service Wiring
//!
//! Builds every shared service once and hands `Arc`s to the tasks that
//! need them:
//!
//! ```text
//!   ingest listener ──► IngestConnection (per producer)
//!                            │ enqueue          │ update
//!                            ▼                  ▼
//!                       MetricBuffer      AggregationEngine
//!                            │                  │ snapshot
//!        flush worker ◄──────┘                  ▼
//!        retry worker                    broadcast worker ──► dashboard subscribers
//! ```
//!
//! All services live for the life of the process; only connections come
//! and go.

#[cfg(test)]
mod tests;

use crate::aggregation::AggregationEngine;
use crate::broadcast::{spawn_broadcast_worker, DashboardBroadcaster, DashboardConnection};
use crate::clock::{Clock, SystemClock};
use crate::config::{ServiceConfig, StoreKind};
use crate::error::StoreError;
use crate::ingest::{ConnectionRegistry, IngestConnection, IngestContext};
use crate::pipeline::{
    spawn_flush_worker, spawn_retry_worker, FlushPipeline, MetricBuffer, PipelineStats, RetryQueue,
};
use crate::status::StatusReporter;
use crate::store::{DurableStore, FileStore, MemoryStore, ProducerRegistry, StoreProducerRegistry};
use crate::worker::WorkerHandle;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Open the durable store selected by configuration
pub fn open_store(config: &ServiceConfig) -> Result<Arc<dyn DurableStore>, StoreError> {
    match config.store.kind {
        StoreKind::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::File => {
            info!("Using file store at {}", config.store.data_dir.display());
            Ok(Arc::new(FileStore::open(&config.store.data_dir)?))
        }
    }
}

/// Running background workers
pub struct Workers {
    handles: Vec<WorkerHandle>,
}

impl Workers {
    /// Stop every worker; the flush worker performs a final flush first
    pub async fn shutdown(self) {
        for handle in self.handles {
            let name = handle.name();
            handle.shutdown().await;
            info!("{} worker stopped", name);
        }
    }
}

pub struct TelemetryService {
    config: ServiceConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn DurableStore>,
    stats: Arc<PipelineStats>,
    buffer: Arc<MetricBuffer>,
    retry_queue: Arc<RetryQueue>,
    pipeline: Arc<FlushPipeline>,
    engine: Arc<AggregationEngine>,
    producers: Arc<dyn ProducerRegistry>,
    connections: Arc<ConnectionRegistry>,
    broadcaster: Arc<DashboardBroadcaster>,
}

impl TelemetryService {
    pub fn new(config: ServiceConfig, store: Arc<dyn DurableStore>) -> Self {
        Self::with_clock(config, store, SystemClock::shared())
    }

    pub fn with_clock(config: ServiceConfig, store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
        let p = &config.pipeline;
        let stats = Arc::new(PipelineStats::new(clock.now_ms()));
        let buffer = Arc::new(MetricBuffer::new(p.buffer_capacity, p.batch_size, Arc::clone(&stats)));
        let retry_queue = Arc::new(RetryQueue::new(p.retry_queue_capacity, Arc::clone(&stats)));
        let pipeline = Arc::new(FlushPipeline::new(
            Arc::clone(&buffer),
            Arc::clone(&retry_queue),
            Arc::clone(&store),
            Arc::clone(&stats),
            Arc::clone(&clock),
            p.clone(),
        ));
        let engine = Arc::new(AggregationEngine::new(config.aggregation.window_capacity));
        let producers: Arc<dyn ProducerRegistry> = Arc::new(StoreProducerRegistry::new(Arc::clone(&store)));
        let connections = Arc::new(ConnectionRegistry::new(Arc::clone(&clock)));
        let broadcaster = Arc::new(DashboardBroadcaster::new(
            Arc::clone(&engine),
            Arc::clone(&clock),
            config.dashboard.heartbeat_interval,
        ));

        TelemetryService {
            config,
            clock,
            store,
            stats,
            buffer,
            retry_queue,
            pipeline,
            engine,
            producers,
            connections,
            broadcaster,
        }
    }

    /// Probe the store. An unreachable store degrades reported health but
    /// never stops ingestion.
    pub async fn check_store(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => {
                self.stats.set_store_reachable(true);
                info!("Durable store reachable");
                true
            }
            Err(e) => {
                self.stats.set_store_reachable(false);
                warn!("Durable store unreachable, continuing degraded: {}", e);
                false
            }
        }
    }

    pub fn start_workers(&self) -> Workers {
        Workers {
            handles: vec![
                spawn_flush_worker(Arc::clone(&self.pipeline)),
                spawn_retry_worker(Arc::clone(&self.pipeline)),
                spawn_broadcast_worker(
                    Arc::clone(&self.broadcaster),
                    self.config.dashboard.update_interval,
                ),
            ],
        }
    }

    pub fn ingest_context(&self) -> IngestContext {
        IngestContext {
            buffer: Arc::clone(&self.buffer),
            engine: Arc::clone(&self.engine),
            producers: Arc::clone(&self.producers),
            clock: Arc::clone(&self.clock),
            ack_interval: self.config.ingest.ack_interval,
        }
    }

    pub fn status(&self) -> StatusReporter {
        StatusReporter::new(
            Arc::clone(&self.buffer),
            Arc::clone(&self.retry_queue),
            Arc::clone(&self.stats),
            Arc::clone(&self.engine),
            Arc::clone(&self.connections),
            Arc::clone(&self.broadcaster),
            Arc::clone(&self.clock),
            self.config.pipeline.health_flush_staleness,
        )
    }

    /// Accept producer connections until `shutdown` fires. The connection
    /// tasks belong to this loop: on shutdown they are aborted and awaited,
    /// so nothing enqueues after this returns.
    pub async fn serve_ingest(self: Arc<Self>, listener: TcpListener, mut shutdown: oneshot::Receiver<()>) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                        }
                        let conn = IngestConnection::new(
                            stream,
                            addr.to_string(),
                            self.ingest_context(),
                            Arc::clone(&self.connections),
                            self.config.ingest.heartbeat_interval,
                            self.config.ingest.read_chunk_size,
                        );
                        connections.spawn(conn.run());
                    }
                    Err(e) => {
                        error!("Failed to accept producer connection: {}", e);
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!("Ingestion connection task panicked: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        let open = connections.len();
        connections.shutdown().await;
        info!("Closed {} producer connections", open);
    }

    /// Accept dashboard subscribers until the listener fails
    pub async fn serve_dashboard(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let conn = DashboardConnection::new(
                        stream,
                        Arc::clone(&self.broadcaster),
                        addr.to_string(),
                        self.config.dashboard.outbound_queue_depth,
                    );
                    tokio::spawn(conn.run());
                }
                Err(e) => {
                    error!("Failed to accept dashboard connection: {}", e);
                }
            }
        }
    }

    /// Bind both listeners from configuration and run until `shutdown`
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let ingest = TcpListener::bind(&self.config.ingest.listen_addr).await?;
        let dashboard = TcpListener::bind(&self.config.dashboard.listen_addr).await?;
        self.run_with_listeners(ingest, dashboard, shutdown).await;
        Ok(())
    }

    /// Serve on pre-bound listeners until `shutdown` resolves, then stop
    /// the workers with a final flush
    pub async fn run_with_listeners<F>(
        self: Arc<Self>,
        ingest: TcpListener,
        dashboard: TcpListener,
        shutdown: F,
    ) where
        F: Future<Output = ()>,
    {
        if let Ok(addr) = ingest.local_addr() {
            info!("Metric ingestion listening on {}", addr);
        }
        if let Ok(addr) = dashboard.local_addr() {
            info!("Dashboard stream listening on {}", addr);
        }

        self.check_store().await;
        let workers = self.start_workers();

        let (stop_ingest, ingest_stopped) = oneshot::channel();
        let ingest_task = tokio::spawn(Arc::clone(&self).serve_ingest(ingest, ingest_stopped));
        let dashboard_task = tokio::spawn(Arc::clone(&self).serve_dashboard(dashboard));

        shutdown.await;
        info!("Shutting down, flushing remaining metrics");

        // Producers stop before the final flush so every accepted event is
        // either flushed or deferred
        let _ = stop_ingest.send(());
        if let Err(e) = ingest_task.await {
            error!("Ingestion listener task failed: {}", e);
        }
        dashboard_task.abort();
        workers.shutdown().await;

        let remaining = self.buffer.len();
        if remaining > 0 {
            warn!("{} metrics still buffered after final flush", remaining);
        }

        let counters = self.stats.snapshot();
        info!(
            "Shutdown complete: processed={} flushed={} dropped={} failed={} deferred={}",
            counters.total_processed,
            counters.total_flushed,
            counters.total_dropped,
            counters.total_failed,
            self.retry_queue.len()
        );
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn buffer(&self) -> &Arc<MetricBuffer> {
        &self.buffer
    }

    pub fn retry_queue(&self) -> &Arc<RetryQueue> {
        &self.retry_queue
    }

    pub fn pipeline(&self) -> &Arc<FlushPipeline> {
        &self.pipeline
    }

    pub fn engine(&self) -> &Arc<AggregationEngine> {
        &self.engine
    }

    pub fn broadcaster(&self) -> &Arc<DashboardBroadcaster> {
        &self.broadcaster
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }
}
