use super::codec::{LineOutcome, MetricLineCodec};
use super::registry::ConnectionEntry;
use crate::aggregation::AggregationEngine;
use crate::clock::Clock;
use crate::error::RegistrationError;
use crate::event::MetricEvent;
use crate::pipeline::MetricBuffer;
use crate::store::ProducerRegistry;
use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

/// Line written back to the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Cumulative count of accepted events
    Ack(u64),
    /// One event was dropped because the buffer is full
    Backpressure,
}

impl Reply {
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Reply::Ack(n) => {
                dst.put_slice(b"ACK:");
                dst.put_slice(n.to_string().as_bytes());
                dst.put_u8(b'\n');
            }
            Reply::Backpressure => dst.put_slice(b"BACKPRESSURE:SLOW_DOWN\n"),
        }
    }
}

/// Shared services an ingestion session feeds
#[derive(Clone)]
pub struct IngestContext {
    pub buffer: Arc<MetricBuffer>,
    pub engine: Arc<AggregationEngine>,
    pub producers: Arc<dyn ProducerRegistry>,
    pub clock: Arc<dyn Clock>,
    pub ack_interval: u64,
}

/// Per-connection decoding and admission state
///
/// Holds only connection-local state; the shared services are touched only
/// through `enqueue`, `update`, and producer registration.
pub struct IngestSession {
    ctx: IngestContext,
    codec: MetricLineCodec,
    pending: BytesMut,
    conn: Option<Arc<ConnectionEntry>>,
    accepted: u64,
    dropped: u64,
    rejected_lines: u64,
}

impl IngestSession {
    pub fn new(ctx: IngestContext, conn: Option<Arc<ConnectionEntry>>) -> Self {
        let codec = MetricLineCodec::new(Arc::clone(&ctx.clock));
        IngestSession {
            ctx,
            codec,
            pending: BytesMut::with_capacity(4096),
            conn,
            accepted: 0,
            dropped: 0,
            rejected_lines: 0,
        }
    }

    /// Feed one chunk of bytes; a trailing partial line is kept for the
    /// next call. Fails only when a new producer cannot be registered.
    pub async fn accept(&mut self, chunk: &[u8]) -> Result<Vec<Reply>, RegistrationError> {
        if let Some(conn) = &self.conn {
            conn.record_bytes(chunk.len(), self.ctx.clock.now_ms());
        }
        self.pending.extend_from_slice(chunk);

        let mut replies = Vec::new();
        loop {
            let outcome = match self.codec.decode(&mut self.pending) {
                Ok(Some(outcome)) => outcome,
                Ok(None) => break,
                Err(e) => {
                    warn!("Line decoder failed: {}", e);
                    self.pending.clear();
                    break;
                }
            };
            self.handle(outcome, &mut replies).await?;
        }
        Ok(replies)
    }

    /// Stream ended: decode any trailing line without a newline
    pub async fn finish(&mut self) -> Result<Vec<Reply>, RegistrationError> {
        let mut replies = Vec::new();
        while let Ok(Some(outcome)) = self.codec.decode_eof(&mut self.pending) {
            self.handle(outcome, &mut replies).await?;
        }
        Ok(replies)
    }

    async fn handle(
        &mut self,
        outcome: LineOutcome,
        replies: &mut Vec<Reply>,
    ) -> Result<(), RegistrationError> {
        match outcome {
            LineOutcome::Rejected(e) => {
                self.rejected_lines += 1;
                if e.is_validation() {
                    warn!("Invalid metric skipped: {}", e);
                } else {
                    warn!("Malformed line skipped: {}", e);
                }
                Ok(())
            }
            LineOutcome::Event(event) => self.admit(event, replies).await,
        }
    }

    async fn admit(&mut self, event: MetricEvent, replies: &mut Vec<Reply>) -> Result<(), RegistrationError> {
        let producer = event.producer_id();
        if !self.ctx.producers.is_known(producer) {
            self.ctx.producers.ensure_producer_exists(producer).await?;
        }
        if let Some(conn) = &self.conn {
            conn.set_producer_if_unset(producer);
        }

        // Aggregation sees only what the buffer accepted
        let observed = event.clone();
        if !self.ctx.buffer.enqueue(event) {
            self.dropped += 1;
            debug!("Backpressure: buffer full, metric dropped");
            replies.push(Reply::Backpressure);
            return Ok(());
        }
        self.ctx.engine.update(&observed);

        self.accepted += 1;
        if let Some(conn) = &self.conn {
            conn.record_event();
        }
        if self.ctx.ack_interval > 0 && self.accepted % self.ctx.ack_interval == 0 {
            replies.push(Reply::Ack(self.accepted));
        }
        Ok(())
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn rejected_lines(&self) -> u64 {
        self.rejected_lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event::AggregationKey;
    use crate::pipeline::PipelineStats;
    use crate::store::{MemoryStore, SimulatedStore, SimulatedStoreConfig, StoreProducerRegistry};

    fn context(capacity: usize) -> (IngestContext, Arc<SimulatedStore>) {
        let stats = Arc::new(PipelineStats::new(0));
        let store = Arc::new(SimulatedStore::new(
            Arc::new(MemoryStore::new()),
            1,
            SimulatedStoreConfig::no_faults(),
        ));
        let ctx = IngestContext {
            buffer: Arc::new(MetricBuffer::new(capacity, capacity, stats)),
            engine: Arc::new(AggregationEngine::new(100)),
            producers: Arc::new(StoreProducerRegistry::new(store.clone())),
            clock: Arc::new(ManualClock::new(7_000)),
            ack_interval: 100,
        };
        (ctx, store)
    }

    fn line(producer: &str, metric: &str, value: f64) -> String {
        format!(
            "{{\"producer_id\":\"{}\",\"metric_name\":\"{}\",\"value\":{}}}\n",
            producer, metric, value
        )
    }

    #[tokio::test]
    async fn test_accept_feeds_buffer_and_aggregation() {
        let (ctx, _) = context(100);
        let mut session = IngestSession::new(ctx.clone(), None);

        let chunk = format!("{}{}not json\n", line("A", "cpu", 10.0), line("A", "cpu", 20.0));
        let replies = session.accept(chunk.as_bytes()).await.unwrap();

        assert!(replies.is_empty());
        assert_eq!(session.accepted(), 2);
        assert_eq!(session.rejected_lines(), 1);
        assert_eq!(ctx.buffer.len(), 2);
        let record = ctx.engine.get(&AggregationKey::new("A", "cpu")).unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.last_update_ms, 7_000);
    }

    #[tokio::test]
    async fn test_ack_every_hundred_accepted() {
        let (ctx, _) = context(1_000);
        let mut session = IngestSession::new(ctx, None);

        let chunk: String = (0..250).map(|i| line("A", "cpu", i as f64)).collect();
        let replies = session.accept(chunk.as_bytes()).await.unwrap();

        assert_eq!(replies, vec![Reply::Ack(100), Reply::Ack(200)]);
    }

    #[tokio::test]
    async fn test_backpressure_per_rejected_event() {
        let (ctx, _) = context(2);
        let mut session = IngestSession::new(ctx.clone(), None);

        let chunk: String = (0..4).map(|i| line("A", "cpu", i as f64)).collect();
        let replies = session.accept(chunk.as_bytes()).await.unwrap();

        assert_eq!(replies, vec![Reply::Backpressure, Reply::Backpressure]);
        assert_eq!(session.dropped(), 2);
        // dropped events never reach aggregation
        let record = ctx.engine.get(&AggregationKey::new("A", "cpu")).unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.max, 1.0);
    }

    #[tokio::test]
    async fn test_registration_failure_surfaces() {
        let (ctx, store) = context(10);
        let mut session = IngestSession::new(ctx.clone(), None);
        store.set_unreachable(true);

        let err = session.accept(line("B", "cpu", 1.0).as_bytes()).await.unwrap_err();

        assert_eq!(err.producer_id, "B");
        assert!(ctx.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_producer_registered_once() {
        let (ctx, store) = context(10);
        let mut session = IngestSession::new(ctx, None);
        let chunk: String = (0..5).map(|i| line("C", "cpu", i as f64)).collect();
        session.accept(chunk.as_bytes()).await.unwrap();
        assert_eq!(store.stats().upsert_attempts, 1);
    }

    #[tokio::test]
    async fn test_finish_decodes_trailing_line() {
        let (ctx, _) = context(10);
        let mut session = IngestSession::new(ctx.clone(), None);
        let partial = line("A", "cpu", 1.0);
        session.accept(partial.trim_end().as_bytes()).await.unwrap();
        assert!(ctx.buffer.is_empty());

        session.finish().await.unwrap();
        assert_eq!(ctx.buffer.len(), 1);
    }

    #[test]
    fn test_reply_encoding() {
        let mut dst = BytesMut::new();
        Reply::Ack(300).encode(&mut dst);
        Reply::Backpressure.encode(&mut dst);
        assert_eq!(&dst[..], b"ACK:300\nBACKPRESSURE:SLOW_DOWN\n");
    }
}
