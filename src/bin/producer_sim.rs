//! Producer simulator
//!
//! Opens one long-lived connection per simulated producer and streams
//! NDJSON metric lines at a fixed rate, counting ACK and BACKPRESSURE
//! replies.
//!
//! ```text
//! producer-sim [addr]
//! ```
//!
//! | Variable | Default |
//! |----------|---------|
//! | NUM_PRODUCERS | 20 |
//! | METRICS_PER_SEC | 10 (per metric type, per producer) |
//! | DURATION | 30 (seconds) |

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Instant;

const METRIC_TYPES: [&str; 5] = ["cpu_usage", "memory_usage", "disk_io", "network_rx", "network_tx"];
const REGIONS: [&str; 3] = ["us-east-1", "us-west-2", "eu-west-1"];
const ENVS: [&str; 3] = ["prod", "staging", "dev"];

#[derive(Default)]
struct SimStats {
    sent: AtomicU64,
    bytes: AtomicU64,
    acks: AtomicU64,
    backpressure: AtomicU64,
    failed_producers: AtomicU64,
}

fn env_or(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn sample_value<R: Rng>(rng: &mut R, metric: &str) -> f64 {
    let raw = match metric {
        "cpu_usage" => rng.gen_range(0.0..100.0),
        "memory_usage" => rng.gen_range(20.0..95.0),
        "disk_io" => rng.gen_range(0.0..1000.0),
        "network_rx" | "network_tx" => rng.gen_range(0.0..10_000.0),
        _ => rng.gen_range(0.0..100.0),
    };
    (raw * 100.0_f64).round() / 100.0
}

fn metric_line<R: Rng>(rng: &mut R, producer: &str, metric: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let line = json!({
        "producer_id": producer,
        "metric_name": metric,
        "value": sample_value(rng, metric),
        "labels": {
            "region": REGIONS.choose(rng).copied().unwrap_or("us-east-1"),
            "env": ENVS.choose(rng).copied().unwrap_or("prod"),
        },
        "ts": ts,
    });
    format!("{}\n", line)
}

async fn run_producer(
    addr: String,
    producer: String,
    metrics_per_sec: u64,
    duration: Duration,
    stats: Arc<SimStats>,
) -> std::io::Result<()> {
    let stream = TcpStream::connect(&addr).await?;
    stream.set_nodelay(true)?;
    let (reader, mut writer) = stream.into_split();

    let reply_stats = stats.clone();
    let replies = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.starts_with("ACK:") {
                reply_stats.acks.fetch_add(1, Ordering::Relaxed);
            } else if line.starts_with("BACKPRESSURE") {
                reply_stats.backpressure.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    let period = Duration::from_micros(1_000_000 / metrics_per_sec.max(1));
    let mut ticker = tokio::time::interval(period);
    let deadline = Instant::now() + duration;
    let mut rng = rand::rngs::StdRng::from_entropy();

    while Instant::now() < deadline {
        ticker.tick().await;
        let mut batch = String::new();
        for metric in METRIC_TYPES {
            batch.push_str(&metric_line(&mut rng, &producer, metric));
        }
        writer.write_all(batch.as_bytes()).await?;
        stats.sent.fetch_add(METRIC_TYPES.len() as u64, Ordering::Relaxed);
        stats.bytes.fetch_add(batch.len() as u64, Ordering::Relaxed);
    }

    writer.shutdown().await?;
    let _ = tokio::time::timeout(Duration::from_secs(2), replies).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:4002".to_string());
    let num_producers = env_or("NUM_PRODUCERS", 20);
    let metrics_per_sec = env_or("METRICS_PER_SEC", 10);
    let duration = Duration::from_secs(env_or("DURATION", 30));

    println!("Producer simulator");
    println!("  target:     {}", addr);
    println!("  producers:  {}", num_producers);
    println!("  rate:       {} x {} metrics/sec/producer", metrics_per_sec, METRIC_TYPES.len());
    println!(
        "  expected:   {} metrics/sec total",
        num_producers * metrics_per_sec * METRIC_TYPES.len() as u64
    );
    println!("  duration:   {}s\n", duration.as_secs());

    let stats = Arc::new(SimStats::default());
    let start = Instant::now();
    let mut handles = Vec::with_capacity(num_producers as usize);

    for i in 0..num_producers {
        let producer = format!("srv-{:03}", i + 1);
        let addr = addr.clone();
        let stats = stats.clone();
        handles.push(tokio::spawn(async move {
            // stagger connects
            tokio::time::sleep(Duration::from_millis(i * 10)).await;
            if let Err(e) = run_producer(addr, producer.clone(), metrics_per_sec, duration, stats.clone()).await {
                eprintln!("{} failed: {}", producer, e);
                stats.failed_producers.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for handle in handles {
        handle.await?;
    }

    let elapsed = start.elapsed().as_secs_f64();
    let sent = stats.sent.load(Ordering::Relaxed);
    println!("Results:");
    println!("  metrics sent:      {}", sent);
    println!("  bytes sent:        {}", stats.bytes.load(Ordering::Relaxed));
    println!("  throughput:        {:.0} metrics/sec", sent as f64 / elapsed);
    println!("  acks received:     {}", stats.acks.load(Ordering::Relaxed));
    println!("  backpressure:      {}", stats.backpressure.load(Ordering::Relaxed));
    println!("  failed producers:  {}", stats.failed_producers.load(Ordering::Relaxed));

    Ok(())
}
