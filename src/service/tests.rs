//! End-to-end pipeline scenarios over real sockets

use super::*;
use crate::config::PipelineConfig;
use crate::event::AggregationKey;
use crate::store::{SimulatedStore, SimulatedStoreConfig};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig {
        pipeline: PipelineConfig::test(),
        ..ServiceConfig::default()
    };
    config.ingest.heartbeat_interval = Duration::from_secs(60);
    config.dashboard.update_interval = Duration::from_millis(20);
    config.dashboard.heartbeat_interval = Duration::from_secs(60);
    config
}

fn metric_line(producer: &str, metric: &str, value: f64) -> String {
    format!(
        "{{\"producer_id\":\"{}\",\"metric_name\":\"{}\",\"value\":{}}}\n",
        producer, metric, value
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

struct Running {
    service: Arc<TelemetryService>,
    ingest_addr: std::net::SocketAddr,
    dashboard_addr: std::net::SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

async fn start(config: ServiceConfig, store: Arc<dyn DurableStore>) -> Running {
    let service = Arc::new(TelemetryService::new(config, store));
    let ingest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dashboard = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ingest_addr = ingest.local_addr().unwrap();
    let dashboard_addr = dashboard.local_addr().unwrap();
    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(Arc::clone(&service).run_with_listeners(ingest, dashboard, async {
        let _ = shutdown_rx.await;
    }));
    Running {
        service,
        ingest_addr,
        dashboard_addr,
        shutdown,
        task,
    }
}

impl Running {
    async fn stop(self) -> Arc<TelemetryService> {
        let _ = self.shutdown.send(());
        self.task.await.unwrap();
        self.service
    }
}

#[tokio::test]
async fn test_end_to_end_ingest_persist_aggregate() {
    let memory = MemoryStore::new();
    let running = start(test_config(), Arc::new(memory.clone())).await;

    let mut producer = TcpStream::connect(running.ingest_addr).await.unwrap();
    let mut payload = String::new();
    for v in [10.0, 20.0, 90.0] {
        payload.push_str(&metric_line("A", "cpu", v));
    }
    payload.push_str("{broken\n");
    for i in 0..97 {
        payload.push_str(&metric_line("B", "mem", i as f64));
    }
    producer.write_all(payload.as_bytes()).await.unwrap();

    let mut ack = [0u8; 8];
    producer.read_exact(&mut ack).await.unwrap();
    assert_eq!(&ack, b"ACK:100\n");
    producer.shutdown().await.unwrap();

    wait_until(|| memory.len() == 100).await;

    let service = running.stop().await;
    let record = service.engine().get(&AggregationKey::new("A", "cpu")).unwrap();
    assert_eq!(record.count, 3);
    assert_eq!(record.avg(), 40.0);
    assert_eq!(record.max, 90.0);
    assert_eq!(memory.producer_count(), 2);

    let status = service.status().pipeline_status();
    assert_eq!(status.total_processed, 100);
    assert_eq!(status.total_flushed, 100);
    assert_eq!(status.total_dropped, 0);
    assert!(status.is_healthy);
}

#[tokio::test]
async fn test_dashboard_receives_init_and_updates() {
    let running = start(test_config(), Arc::new(MemoryStore::new())).await;

    let mut producer = TcpStream::connect(running.ingest_addr).await.unwrap();
    producer
        .write_all(metric_line("A", "cpu", 42.0).as_bytes())
        .await
        .unwrap();
    let service = Arc::clone(&running.service);
    wait_until(|| service.engine().len() == 1).await;

    let mut dashboard = TcpStream::connect(running.dashboard_addr).await.unwrap();
    dashboard
        .write_all(b"GET /api/dashboard/stream HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut received = String::new();
    let mut buf = [0u8; 4096];
    while !received.contains("event: update") {
        let n = tokio::time::timeout(Duration::from_secs(5), dashboard.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "dashboard closed early");
        received.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    assert!(received.contains("text/event-stream"));
    assert!(received.contains("event: init\ndata: {\"type\":\"init\""));
    assert!(received.contains("\"metric_name\":\"cpu\""));
    assert!(received.contains("\"avg\":42.0"));

    drop(dashboard);
    wait_until(|| service.broadcaster().subscriber_count() == 0).await;
    running.stop().await;
}

#[tokio::test]
async fn test_failed_batch_deferred_then_recovered() {
    let memory = MemoryStore::new();
    let simulated = Arc::new(SimulatedStore::new(
        Arc::new(memory.clone()),
        11,
        SimulatedStoreConfig::no_faults(),
    ));
    let mut config = test_config();
    config.pipeline.retry_interval = Duration::from_secs(3600);
    let service = TelemetryService::new(config, simulated.clone());
    let ctx = service.ingest_context();

    for i in 0..5 {
        assert!(ctx.buffer.enqueue(crate::event::MetricEvent::new("A", "cpu", i as f64, i)));
    }
    simulated.fail_next(3);

    let result = service.pipeline().flush().await;
    assert_eq!(result.failed, 5);
    assert_eq!(service.retry_queue().len(), 5);
    assert_eq!(service.stats().total_failed(), 5);
    assert!(memory.is_empty());

    let result = service.pipeline().process_retry_queue().await;
    assert_eq!(result.flushed, 5);
    assert!(service.retry_queue().is_empty());
    assert_eq!(memory.len(), 5);
}

#[tokio::test]
async fn test_unreachable_store_degrades_health_not_ingestion() {
    let simulated = Arc::new(SimulatedStore::new(
        Arc::new(MemoryStore::new()),
        5,
        SimulatedStoreConfig::no_faults(),
    ));
    let service = TelemetryService::new(test_config(), simulated.clone());
    simulated.set_unreachable(true);

    assert!(!service.check_store().await);
    let status = service.status().pipeline_status();
    assert!(!status.store_reachable);
    assert!(!status.is_healthy);

    // Already-known producers keep streaming into the buffer
    simulated.set_unreachable(false);
    let ctx = service.ingest_context();
    ctx.producers.ensure_producer_exists("A").await.unwrap();
    simulated.set_unreachable(true);
    let mut session = crate::ingest::IngestSession::new(ctx, None);
    session
        .accept(metric_line("A", "cpu", 1.0).as_bytes())
        .await
        .unwrap();
    assert_eq!(service.buffer().len(), 1);
}

#[tokio::test]
async fn test_shutdown_flushes_remaining() {
    let memory = MemoryStore::new();
    let mut config = test_config();
    config.pipeline.flush_interval = Duration::from_secs(3600);
    let running = start(config, Arc::new(memory.clone())).await;

    let mut producer = TcpStream::connect(running.ingest_addr).await.unwrap();
    let payload: String = (0..3).map(|i| metric_line("A", "cpu", i as f64)).collect();
    producer.write_all(payload.as_bytes()).await.unwrap();
    let service = Arc::clone(&running.service);
    wait_until(|| service.buffer().len() == 3).await;
    assert!(memory.is_empty());

    running.stop().await;
    assert_eq!(memory.len(), 3);
}

#[tokio::test]
async fn test_shutdown_stops_open_producers_before_final_flush() {
    let memory = MemoryStore::new();
    let mut config = test_config();
    config.pipeline.flush_interval = Duration::from_secs(3600);
    let running = start(config, Arc::new(memory.clone())).await;

    // Producer stays connected through shutdown
    let mut producer = TcpStream::connect(running.ingest_addr).await.unwrap();
    let payload: String = (0..3).map(|i| metric_line("A", "cpu", i as f64)).collect();
    producer.write_all(payload.as_bytes()).await.unwrap();
    let service = Arc::clone(&running.service);
    wait_until(|| service.buffer().len() == 3).await;
    assert_eq!(service.connections().active_count(), 1);

    running.stop().await;

    assert_eq!(service.connections().active_count(), 0);
    assert!(service.buffer().is_empty());
    let counters = service.stats().snapshot();
    assert_eq!(counters.total_processed, 3);
    assert_eq!(counters.total_flushed, 3);
    assert_eq!(memory.len(), 3);

    // Late writes reach no session
    let _ = producer.write_all(metric_line("A", "cpu", 9.0).as_bytes()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(service.buffer().is_empty());
    assert_eq!(service.stats().total_processed(), 3);
}

#[tokio::test]
async fn test_file_store_selected_by_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.store.kind = StoreKind::File;
    config.store.data_dir = dir.path().join("metrics");

    let store = open_store(&config).unwrap();
    let service = TelemetryService::new(config, store);
    let ctx = service.ingest_context();
    let mut session = crate::ingest::IngestSession::new(ctx, None);
    session
        .accept(metric_line("A", "cpu", 7.0).as_bytes())
        .await
        .unwrap();
    service.pipeline().flush().await;

    let reopened = FileStore::open(dir.path().join("metrics")).unwrap();
    let rows = reopened.read_rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value(), 7.0);
}
