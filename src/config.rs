//! Service Configuration
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | METRIC_STREAM_INGEST_ADDR | 0.0.0.0:4002 | Producer listener |
//! | METRIC_STREAM_DASHBOARD_ADDR | 0.0.0.0:4003 | Dashboard listener |
//! | METRIC_STREAM_BUFFER_CAPACITY | 10000 | Metric buffer capacity |
//! | METRIC_STREAM_BATCH_SIZE | 100 | Flush threshold / retry batch size |
//! | METRIC_STREAM_FLUSH_INTERVAL_MS | 5000 | Periodic flush interval |
//! | METRIC_STREAM_RETRY_QUEUE_CAPACITY | 50000 | Retry queue capacity |
//! | METRIC_STREAM_STORE | memory | memory or file |
//! | METRIC_STREAM_DATA_DIR | ./data | Directory for the file store |
//! | METRIC_STREAM_LOG_LEVEL | info | Default log level |
//! | METRIC_STREAM_LOG_JSON | false | Emit JSON logs |

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on the per-key rolling sample window
pub const WINDOW_CAPACITY_MAX: usize = 100;

const ENV_PREFIX: &str = "METRIC_STREAM_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub ingest: IngestConfig,
    pub pipeline: PipelineConfig,
    pub aggregation: AggregationConfig,
    pub dashboard: DashboardConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Producer-facing ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub listen_addr: String,
    /// Keep-alive written to idle producers (default: 15s)
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    /// Cumulative ACK every N accepted events (default: 100)
    pub ack_interval: u64,
    /// Socket read size per chunk
    pub read_chunk_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            listen_addr: "0.0.0.0:4002".to_string(),
            heartbeat_interval: Duration::from_secs(15),
            ack_interval: 100,
            read_chunk_size: 4096,
        }
    }
}

/// Buffer, flush and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum buffered events before enqueue is rejected (default: 10,000)
    pub buffer_capacity: usize,
    /// Occupancy that triggers an early flush; also the retry batch size (default: 100)
    pub batch_size: usize,
    #[serde(with = "duration_millis")]
    pub flush_interval: Duration,
    /// Total persistence attempts per batch (default: 3)
    pub max_attempts: u32,
    /// First backoff delay, doubled per attempt (default: 1s)
    #[serde(with = "duration_millis")]
    pub retry_base_delay: Duration,
    pub retry_queue_capacity: usize,
    #[serde(with = "duration_millis")]
    pub retry_interval: Duration,
    /// A flush older than this marks the pipeline unhealthy (default: 30s)
    #[serde(with = "duration_millis")]
    pub health_flush_staleness: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            buffer_capacity: 10_000,
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_queue_capacity: 50_000,
            retry_interval: Duration::from_secs(30),
            health_flush_staleness: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    /// Configuration for tests (small buffers, millisecond backoff)
    pub fn test() -> Self {
        PipelineConfig {
            buffer_capacity: 100,
            batch_size: 10,
            flush_interval: Duration::from_millis(20),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(1),
            retry_queue_capacity: 1_000,
            retry_interval: Duration::from_millis(50),
            health_flush_staleness: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub window_capacity: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            window_capacity: WINDOW_CAPACITY_MAX,
        }
    }
}

/// Subscriber-facing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub listen_addr: String,
    #[serde(with = "duration_millis")]
    pub update_interval: Duration,
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    /// Frames queued per subscriber before it counts as a failed write
    pub outbound_queue_depth: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            listen_addr: "0.0.0.0:4003".to_string(),
            update_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            outbound_queue_depth: 256,
        }
    }
}

/// Type of durable store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-memory store (for tests and demos)
    Memory,
    /// NDJSON files on the local filesystem
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            kind: StoreKind::Memory,
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ServiceConfig {
    /// Read a TOML file, apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => ServiceConfig::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Apply `METRIC_STREAM_*` overrides; unparseable values are ignored
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let num = |name: &str| var(name).and_then(|s| s.parse::<u64>().ok());

        if let Some(addr) = var("INGEST_ADDR") {
            self.ingest.listen_addr = addr;
        }
        if let Some(addr) = var("DASHBOARD_ADDR") {
            self.dashboard.listen_addr = addr;
        }
        if let Some(n) = num("BUFFER_CAPACITY") {
            self.pipeline.buffer_capacity = n as usize;
        }
        if let Some(n) = num("BATCH_SIZE") {
            self.pipeline.batch_size = n as usize;
        }
        if let Some(ms) = num("FLUSH_INTERVAL_MS") {
            self.pipeline.flush_interval = Duration::from_millis(ms);
        }
        if let Some(n) = num("RETRY_QUEUE_CAPACITY") {
            self.pipeline.retry_queue_capacity = n as usize;
        }
        match var("STORE").map(|s| s.to_lowercase()).as_deref() {
            Some("memory") => self.store.kind = StoreKind::Memory,
            Some("file") => self.store.kind = StoreKind::File,
            _ => {}
        }
        if let Some(dir) = var("DATA_DIR") {
            self.store.data_dir = PathBuf::from(dir);
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = var("LOG_JSON") {
            self.logging.json = json == "true" || json == "1";
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.buffer_capacity == 0 {
            return Err(ConfigError::Invalid("buffer_capacity must be > 0".into()));
        }
        if p.batch_size == 0 || p.batch_size > p.buffer_capacity {
            return Err(ConfigError::Invalid(format!(
                "batch_size must be in 1..={} (got {})",
                p.buffer_capacity, p.batch_size
            )));
        }
        if p.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be > 0".into()));
        }
        if p.retry_queue_capacity == 0 {
            return Err(ConfigError::Invalid("retry_queue_capacity must be > 0".into()));
        }
        let intervals = [
            ("pipeline.flush_interval", p.flush_interval),
            ("pipeline.retry_interval", p.retry_interval),
            ("ingest.heartbeat_interval", self.ingest.heartbeat_interval),
            ("dashboard.update_interval", self.dashboard.update_interval),
            ("dashboard.heartbeat_interval", self.dashboard.heartbeat_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }
        let window = self.aggregation.window_capacity;
        if window == 0 || window > WINDOW_CAPACITY_MAX {
            return Err(ConfigError::Invalid(format!(
                "aggregation.window_capacity must be in 1..={}",
                WINDOW_CAPACITY_MAX
            )));
        }
        if self.ingest.ack_interval == 0 || self.ingest.read_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "ingest.ack_interval and ingest.read_chunk_size must be > 0".into(),
            ));
        }
        if self.dashboard.outbound_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "dashboard.outbound_queue_depth must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pipeline.buffer_capacity, 10_000);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.pipeline.retry_queue_capacity, 50_000);
        assert_eq!(config.dashboard.update_interval, Duration::from_secs(1));
        assert_eq!(config.store.kind, StoreKind::Memory);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServiceConfig::from_toml(
            r#"
            [pipeline]
            buffer_capacity = 500
            flush_interval = 250

            [store]
            kind = "file"
            data_dir = "/var/lib/metric-stream"
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.buffer_capacity, 500);
        assert_eq!(config.pipeline.flush_interval, Duration::from_millis(250));
        assert_eq!(config.pipeline.batch_size, 100);
        assert_eq!(config.store.kind, StoreKind::File);
        assert_eq!(config.ingest.ack_interval, 100);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<String, String> = [
            ("METRIC_STREAM_BUFFER_CAPACITY", "2000"),
            ("METRIC_STREAM_STORE", "FILE"),
            ("METRIC_STREAM_LOG_JSON", "1"),
            ("METRIC_STREAM_BATCH_SIZE", "not-a-number"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut config = ServiceConfig::default();
        config.apply_env(|name| env.get(name).cloned());

        assert_eq!(config.pipeline.buffer_capacity, 2000);
        assert_eq!(config.pipeline.batch_size, 100);
        assert_eq!(config.store.kind, StoreKind::File);
        assert!(config.logging.json);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServiceConfig::default();
        config.pipeline.batch_size = config.pipeline.buffer_capacity + 1;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.aggregation.window_capacity = 101;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.dashboard.update_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_config_serialization() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.flush_interval, parsed.flush_interval);
        assert_eq!(config.retry_base_delay, parsed.retry_base_delay);
    }
}
