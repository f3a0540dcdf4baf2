//! metric-stream: streaming telemetry ingestion
//!
//! Producers stream NDJSON metric events over long-lived TCP connections.
//! Each accepted event is buffered for batched, retried persistence and
//! folded into in-memory per-key aggregates that are pushed to dashboard
//! subscribers as Server-Sent-Events.

pub mod aggregation;
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod ingest;
pub mod observability;
pub mod pipeline;
pub mod service;
pub mod status;
pub mod store;
pub mod worker;

pub use aggregation::{AggregateSnapshot, AggregationEngine};
pub use broadcast::DashboardBroadcaster;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ServiceConfig;
pub use error::{BroadcastError, ConfigError, DecodeError, RegistrationError, SinkError, StoreError};
pub use event::{AggregationKey, LabelSet, MetricEvent};
pub use pipeline::{FlushPipeline, MetricBuffer, RetryQueue};
pub use service::TelemetryService;
pub use store::{DurableStore, FileStore, MemoryStore, SimulatedStore};
