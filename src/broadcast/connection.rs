use super::broadcaster::DashboardBroadcaster;
use super::sink::ChannelSink;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

const SSE_RESPONSE_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/event-stream\r\n\
Cache-Control: no-cache\r\n\
Connection: keep-alive\r\n\
X-Accel-Buffering: no\r\n\r\n";

const MAX_REQUEST_HEAD: usize = 8192;
const REQUEST_HEAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve one dashboard subscriber over a plain HTTP connection
///
/// Reads and discards the request head, answers with an event-stream
/// response, then forwards frames from the broadcaster until either side
/// goes away.
pub struct DashboardConnection<S> {
    stream: S,
    broadcaster: Arc<DashboardBroadcaster>,
    client_addr: String,
    queue_depth: usize,
}

impl<S> DashboardConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        broadcaster: Arc<DashboardBroadcaster>,
        client_addr: String,
        queue_depth: usize,
    ) -> Self {
        DashboardConnection {
            stream,
            broadcaster,
            client_addr,
            queue_depth,
        }
    }

    pub async fn run(mut self) {
        match tokio::time::timeout(REQUEST_HEAD_TIMEOUT, self.read_request_head()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Dashboard client {} sent no request: {}", self.client_addr, e);
                return;
            }
            Err(_) => {
                debug!("Dashboard client {} timed out before request", self.client_addr);
                return;
            }
        }

        if let Err(e) = self.stream.write_all(SSE_RESPONSE_HEAD).await {
            warn!("Failed to answer dashboard client {}: {}", self.client_addr, e);
            return;
        }

        let (sink, mut rx) = ChannelSink::new(self.queue_depth);
        let id = match self.broadcaster.subscribe(Arc::new(sink)) {
            Ok(id) => id,
            Err(e) => {
                warn!("Dashboard client {} rejected: {}", self.client_addr, e);
                return;
            }
        };
        info!("Dashboard client {} subscribed as {}", self.client_addr, id);

        let mut scratch = [0u8; 512];
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = self.stream.write_all(&frame).await {
                        debug!("Dashboard client {} write failed: {}", self.client_addr, e);
                        break;
                    }
                }
                read = self.stream.read(&mut scratch) => {
                    match read {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            }
        }

        self.broadcaster.unsubscribe(id);
    }

    async fn read_request_head(&mut self) -> std::io::Result<()> {
        let mut head = BytesMut::with_capacity(1024);
        loop {
            if memchr::memmem::find(&head, b"\r\n\r\n").is_some()
                || memchr::memmem::find(&head, b"\n\n").is_some()
            {
                return Ok(());
            }
            if head.len() >= MAX_REQUEST_HEAD {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "request head too large",
                ));
            }
            if self.stream.read_buf(&mut head).await? == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::AggregationEngine;
    use crate::clock::ManualClock;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_dashboard_session() {
        let engine = Arc::new(AggregationEngine::new(100));
        let broadcaster = Arc::new(DashboardBroadcaster::new(
            engine,
            Arc::new(ManualClock::new(0)),
            Duration::from_secs(30),
        ));
        let (client, server) = duplex(64 * 1024);
        let conn = DashboardConnection::new(server, Arc::clone(&broadcaster), "test".into(), 16);
        let task = tokio::spawn(conn.run());

        let (mut rd, mut wr) = tokio::io::split(client);
        wr.write_all(b"GET /dashboard HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while !String::from_utf8_lossy(&received).contains("event: init") {
            let n = rd.read(&mut buf).await.unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8_lossy(&received).to_string();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/event-stream"));
        assert_eq!(broadcaster.subscriber_count(), 1);

        drop(wr);
        drop(rd);
        task.await.unwrap();
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
