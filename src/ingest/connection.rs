use super::registry::{ConnectionGuard, ConnectionRegistry};
use super::session::{IngestContext, IngestSession, Reply};
use bytes::BytesMut;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const HEARTBEAT_LINE: &[u8] = b": heartbeat\n";

/// Ingestion connection lifecycle
///
/// ```text
/// Open ──first bytes──► Active ──┬─ eof ─────────────► Ended
///                                ├─ io / write error ─► Errored
///                                └─ registration fail ► Closed
/// ```
///
/// Every terminal state deregisters the connection exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Active,
    Ended,
    Errored,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Ended | ConnectionState::Errored | ConnectionState::Closed
        )
    }
}

pub struct IngestConnection<S> {
    stream: S,
    client_addr: String,
    session: IngestSession,
    guard: ConnectionGuard,
    heartbeat_interval: Duration,
    read_chunk_size: usize,
    write_buffer: BytesMut,
    state: ConnectionState,
}

impl<S> IngestConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        client_addr: String,
        ctx: IngestContext,
        registry: Arc<ConnectionRegistry>,
        heartbeat_interval: Duration,
        read_chunk_size: usize,
    ) -> Self {
        debug_assert!(read_chunk_size > 0, "read chunk size must be > 0");
        let guard = registry.register(client_addr.clone());
        let session = IngestSession::new(ctx, Some(Arc::clone(guard.entry())));
        IngestConnection {
            stream,
            client_addr,
            session,
            guard,
            heartbeat_interval,
            read_chunk_size,
            write_buffer: BytesMut::with_capacity(256),
            state: ConnectionState::Open,
        }
    }

    /// Drive the connection to a terminal state and return it. The
    /// connection is deregistered when `self` drops at the end.
    pub async fn run(mut self) -> ConnectionState {
        let entry = Arc::clone(self.guard.entry());
        let started = Instant::now();
        info!("Stream {} opened from {}", entry.id(), self.client_addr);

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;
        let mut read_buf = vec![0u8; self.read_chunk_size];

        while !self.state.is_terminal() {
            tokio::select! {
                read = self.stream.read(&mut read_buf) => {
                    match read {
                        Ok(0) => self.end_of_stream().await,
                        Ok(n) => {
                            self.state = ConnectionState::Active;
                            let result = self.session.accept(&read_buf[..n]).await;
                            self.apply(result).await;
                        }
                        Err(e) => {
                            error!("Stream {} read error: {}", entry.id(), e);
                            self.state = ConnectionState::Errored;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.write_raw(HEARTBEAT_LINE).await {
                        warn!("Heartbeat failed for stream {}: {}", entry.id(), e);
                        self.state = ConnectionState::Errored;
                    }
                }
            }
        }

        let secs = started.elapsed().as_secs_f64();
        let events = self.session.accepted();
        info!(
            "Stream {} {:?}: producer={} duration={:.2}s metrics={} throughput={:.2}/s dropped={} rejected_lines={}",
            entry.id(),
            self.state,
            entry.producer_id().unwrap_or_else(|| "-".into()),
            secs,
            events,
            events as f64 / secs.max(0.001),
            self.session.dropped(),
            self.session.rejected_lines(),
        );
        let _ = self.stream.shutdown().await;
        self.state
    }

    async fn end_of_stream(&mut self) {
        let result = self.session.finish().await;
        self.apply(result).await;
        if !self.state.is_terminal() {
            self.state = ConnectionState::Ended;
        }
    }

    async fn apply(&mut self, result: Result<Vec<Reply>, crate::error::RegistrationError>) {
        match result {
            Ok(replies) => {
                if replies.is_empty() {
                    return;
                }
                self.write_buffer.clear();
                for reply in &replies {
                    reply.encode(&mut self.write_buffer);
                }
                let out = self.write_buffer.split();
                if let Err(e) = self.write_raw(&out).await {
                    debug!("Reply to {} failed: {}", self.client_addr, e);
                    self.state = ConnectionState::Errored;
                }
            }
            Err(e) => {
                error!("{}; closing connection from {}", e, self.client_addr);
                self.state = ConnectionState::Closed;
            }
        }
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }
}
