//! Ingestion Decoder
//!
//! Producers hold a long-lived TCP connection and stream NDJSON metric
//! lines. The server writes back `ACK:<n>` every `ack_interval` accepted
//! events, `BACKPRESSURE:SLOW_DOWN` for every event dropped on a full
//! buffer, and a `: heartbeat` comment line to keep idle links alive.
//!
//! Bad lines are logged and skipped; only a failed producer registration
//! closes the connection.

mod codec;
mod connection;
mod registry;
mod session;

pub use codec::{decode_event, LineOutcome, MetricLineCodec, DEFAULT_MAX_LINE_LENGTH};
pub use connection::{ConnectionState, IngestConnection};
pub use registry::{
    ConnectionEntry, ConnectionGuard, ConnectionId, ConnectionRegistry, StreamInfo, StreamStats,
};
pub use session::{IngestContext, IngestSession, Reply};
