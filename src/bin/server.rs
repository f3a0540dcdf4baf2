//! metric-stream server
//!
//! ## Usage
//!
//! ```text
//! metric-stream [config.toml]
//! METRIC_STREAM_CONFIG=config.toml metric-stream
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | METRIC_STREAM_INGEST_ADDR | 0.0.0.0:4002 | Producer listen address |
//! | METRIC_STREAM_DASHBOARD_ADDR | 0.0.0.0:4003 | Dashboard listen address |
//! | METRIC_STREAM_BUFFER_CAPACITY | 10000 | Metric buffer capacity |
//! | METRIC_STREAM_BATCH_SIZE | 100 | Flush threshold / retry batch |
//! | METRIC_STREAM_FLUSH_INTERVAL_MS | 5000 | Periodic flush |
//! | METRIC_STREAM_STORE | memory | memory or file |
//! | METRIC_STREAM_DATA_DIR | ./data | File store directory |
//! | METRIC_STREAM_LOG_JSON | false | JSON log output |
//! | RUST_LOG | info | Log filter (overrides configured level) |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use metric_stream::config::ServiceConfig;
use metric_stream::observability::init_tracing;
use metric_stream::service::{open_store, TelemetryService};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("METRIC_STREAM_CONFIG").ok())
        .map(PathBuf::from);
    let config = ServiceConfig::load(config_path.as_deref())?;
    init_tracing(&config.logging);

    println!("metric-stream starting");
    println!("   ingest:    {}", config.ingest.listen_addr);
    println!("   dashboard: {}", config.dashboard.listen_addr);
    println!(
        "   buffer:    {} events, flush every {}ms or at {}",
        config.pipeline.buffer_capacity,
        config.pipeline.flush_interval.as_millis(),
        config.pipeline.batch_size
    );
    println!();

    let store = open_store(&config)?;
    let service = Arc::new(TelemetryService::new(config, store));

    let result = Arc::clone(&service)
        .run(async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C"),
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        })
        .await;

    if let Err(e) = &result {
        error!("Server failed: {}", e);
    }
    if let Ok(json) = service.status().status_json() {
        info!("Final status:\n{}", json);
    }
    result?;
    Ok(())
}
