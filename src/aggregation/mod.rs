//! Aggregation Engine
//!
//! Streaming per-key statistics (count, sum, min, max, last) plus a bounded
//! recent-sample window for an approximate p95. The percentile covers only
//! the last `window_capacity` samples seen by this process.

mod engine;
mod record;

pub use engine::{AggregateSnapshot, AggregationEngine, AggregationStats};
pub use record::{AggregationRecord, RollingWindow};
