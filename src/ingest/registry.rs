use crate::clock::Clock;
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type ConnectionId = u64;

/// Live counters for one ingestion connection
#[derive(Debug)]
pub struct ConnectionEntry {
    id: ConnectionId,
    peer: String,
    /// First producer seen on the connection
    producer_id: Mutex<Option<String>>,
    started_ms: u64,
    events_received: AtomicU64,
    bytes_received: AtomicU64,
    last_activity_ms: AtomicU64,
}

impl ConnectionEntry {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn producer_id(&self) -> Option<String> {
        self.producer_id.lock().clone()
    }

    pub(crate) fn set_producer_if_unset(&self, producer_id: &str) {
        let mut slot = self.producer_id.lock();
        if slot.is_none() {
            *slot = Some(producer_id.to_string());
        }
    }

    pub(crate) fn record_bytes(&self, n: usize, now_ms: u64) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
        self.last_activity_ms.store(now_ms, Ordering::Relaxed);
    }

    pub(crate) fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn started_ms(&self) -> u64 {
        self.started_ms
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    pub id: ConnectionId,
    pub peer: String,
    pub producer_id: Option<String>,
    pub uptime_secs: u64,
    pub events_received: u64,
    pub bytes_received: u64,
    /// Accepted events per second since the connection opened
    pub throughput: f64,
    pub idle_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStats {
    pub active_streams: usize,
    pub total_events_received: u64,
    pub total_bytes_received: u64,
    pub streams: Vec<StreamInfo>,
}

/// Registry of open ingestion connections
pub struct ConnectionRegistry {
    connections: RwLock<AHashMap<ConnectionId, Arc<ConnectionEntry>>>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        ConnectionRegistry {
            connections: RwLock::new(AHashMap::new()),
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    /// Track a new connection until the returned guard is dropped
    pub fn register(self: &Arc<Self>, peer: impl Into<String>) -> ConnectionGuard {
        let now = self.clock.now_ms();
        let entry = Arc::new(ConnectionEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            peer: peer.into(),
            producer_id: Mutex::new(None),
            started_ms: now,
            events_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(now),
        });
        self.connections.write().insert(entry.id, Arc::clone(&entry));
        ConnectionGuard {
            registry: Arc::clone(self),
            entry,
        }
    }

    pub fn active_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn stream_stats(&self) -> StreamStats {
        let now = self.clock.now_ms();
        let mut streams: Vec<StreamInfo> = self
            .connections
            .read()
            .values()
            .map(|c| {
                let uptime_ms = now.saturating_sub(c.started_ms);
                let events = c.events_received();
                StreamInfo {
                    id: c.id,
                    peer: c.peer.clone(),
                    producer_id: c.producer_id(),
                    uptime_secs: uptime_ms / 1000,
                    events_received: events,
                    bytes_received: c.bytes_received(),
                    throughput: events as f64 * 1000.0 / uptime_ms.max(1) as f64,
                    idle_ms: now.saturating_sub(c.last_activity_ms.load(Ordering::Relaxed)),
                }
            })
            .collect();
        streams.sort_by_key(|s| s.id);

        StreamStats {
            active_streams: streams.len(),
            total_events_received: streams.iter().map(|s| s.events_received).sum(),
            total_bytes_received: streams.iter().map(|s| s.bytes_received).sum(),
            streams,
        }
    }
}

/// Deregisters its connection on drop, whatever path ended it
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    entry: Arc<ConnectionEntry>,
}

impl ConnectionGuard {
    pub fn entry(&self) -> &Arc<ConnectionEntry> {
        &self.entry
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.connections.write().remove(&self.entry.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    #[test]
    fn test_register_and_drop() {
        let clock = ManualClock::new(1_000);
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(clock.clone())));

        let a = registry.register("10.0.0.1:5000");
        let b = registry.register("10.0.0.2:5000");
        assert_ne!(a.entry().id(), b.entry().id());
        assert_eq!(registry.active_count(), 2);

        drop(a);
        assert_eq!(registry.active_count(), 1);
        drop(b);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_stream_stats() {
        let clock = ManualClock::new(1_000);
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(clock.clone())));
        let guard = registry.register("peer");
        let entry = guard.entry();

        entry.set_producer_if_unset("srv-1");
        entry.set_producer_if_unset("srv-2");
        entry.record_bytes(300, 1_500);
        for _ in 0..20 {
            entry.record_event();
        }
        clock.advance(Duration::from_secs(2));

        let stats = registry.stream_stats();
        assert_eq!(stats.active_streams, 1);
        assert_eq!(stats.total_events_received, 20);
        assert_eq!(stats.total_bytes_received, 300);
        let s = &stats.streams[0];
        assert_eq!(s.producer_id.as_deref(), Some("srv-1"));
        assert_eq!(s.uptime_secs, 2);
        assert_eq!(s.throughput, 10.0);
        assert_eq!(s.idle_ms, 1_500);
    }
}
