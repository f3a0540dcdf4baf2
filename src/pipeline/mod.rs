//! Buffering and Batched Persistence
//!
//! ```text
//! ingestion ──enqueue──► MetricBuffer ──► FlushPipeline ──► DurableStore
//!                                              │
//!                                              ▼
//!                                         RetryQueue
//! ```
//!
//! Best-effort delivery: a batch gets a bounded number of attempts, then is
//! deferred, and deferred events are evicted oldest-first under sustained
//! failure. Every loss is counted in `PipelineStats`.

mod buffer;
mod flush;
mod retry_queue;
mod stats;

pub use buffer::MetricBuffer;
pub use flush::{spawn_flush_worker, spawn_retry_worker, FlushPipeline, FlushResult};
pub use retry_queue::RetryQueue;
pub use stats::{PipelineCounters, PipelineStats};
