use super::frame::{DashboardEvent, HEARTBEAT_FRAME};
use super::sink::SubscriberSink;
use crate::aggregation::AggregationEngine;
use crate::clock::Clock;
use crate::error::BroadcastError;
use crate::worker::WorkerHandle;
use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    connected_at_ms: u64,
    events_sent: AtomicU64,
    sink: Arc<dyn SubscriberSink>,
    heartbeat: Option<JoinHandle<()>>,
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    /// Seconds since the subscriber connected
    pub uptime_secs: u64,
    pub events_sent: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub connected_clients: usize,
    /// Sum over currently connected subscribers
    pub total_events_sent: u64,
    pub clients: Vec<SubscriberInfo>,
}

/// Subscriber registry and fan-out publisher of aggregation snapshots
///
/// Publishing iterates a snapshot of the membership taken under the read
/// lock, so concurrent subscribe and unsubscribe calls never disturb an
/// in-flight pass. Failed subscribers are removed once the pass finishes.
pub struct DashboardBroadcaster {
    subscribers: RwLock<AHashMap<SubscriberId, Arc<Subscriber>>>,
    next_id: AtomicU64,
    engine: Arc<AggregationEngine>,
    clock: Arc<dyn Clock>,
    heartbeat_interval: Duration,
}

impl DashboardBroadcaster {
    pub fn new(
        engine: Arc<AggregationEngine>,
        clock: Arc<dyn Clock>,
        heartbeat_interval: Duration,
    ) -> Self {
        DashboardBroadcaster {
            subscribers: RwLock::new(AHashMap::new()),
            next_id: AtomicU64::new(1),
            engine,
            clock,
            heartbeat_interval,
        }
    }

    /// Register a subscriber after delivering it the current snapshot as
    /// an `init` event, and start its heartbeat.
    pub fn subscribe(
        self: &Arc<Self>,
        sink: Arc<dyn SubscriberSink>,
    ) -> Result<SubscriberId, BroadcastError> {
        let now = self.clock.now_ms();
        let init = DashboardEvent::init(self.engine.snapshot(), now);
        let frame = init.to_frame()?;
        sink.write(&frame).map_err(BroadcastError::InitFailed)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let heartbeat = self.spawn_heartbeat(id, Arc::clone(&sink));
        let subscriber = Arc::new(Subscriber {
            id,
            connected_at_ms: now,
            events_sent: AtomicU64::new(1),
            sink,
            heartbeat: Some(heartbeat),
        });

        let count = {
            let mut subscribers = self.subscribers.write();
            subscribers.insert(id, subscriber);
            subscribers.len()
        };
        info!("Dashboard client {} connected ({} total)", id, count);
        Ok(id)
    }

    fn spawn_heartbeat(self: &Arc<Self>, id: SubscriberId, sink: Arc<dyn SubscriberSink>) -> JoinHandle<()> {
        let broadcaster: Weak<Self> = Arc::downgrade(self);
        let interval = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = sink.write(HEARTBEAT_FRAME) {
                    warn!("Heartbeat failed for dashboard client {}: {}", id, e);
                    if let Some(broadcaster) = broadcaster.upgrade() {
                        broadcaster.unsubscribe(id);
                    }
                    return;
                }
            }
        })
    }

    /// Remove a subscriber; its heartbeat stops with it
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id);
        match removed {
            Some(subscriber) => {
                let duration_ms = self.clock.now_ms().saturating_sub(subscriber.connected_at_ms);
                info!(
                    "Dashboard client {} disconnected after {}ms ({} events sent)",
                    id,
                    duration_ms,
                    subscriber.events_sent.load(Ordering::Relaxed)
                );
                true
            }
            None => false,
        }
    }

    /// Serialize once and write to every registered subscriber.
    /// Returns the number of successful deliveries.
    pub fn publish<T: Serialize>(&self, event: &DashboardEvent<T>) -> Result<usize, BroadcastError> {
        let members: Vec<Arc<Subscriber>> = self.subscribers.read().values().cloned().collect();
        if members.is_empty() {
            return Ok(0);
        }
        let frame = event.to_frame()?;

        let mut delivered = 0;
        let mut dead = Vec::new();
        for subscriber in &members {
            match subscriber.sink.write(&frame) {
                Ok(()) => {
                    subscriber.events_sent.fetch_add(1, Ordering::Relaxed);
                    delivered += 1;
                }
                Err(e) => {
                    warn!("Failed to send to dashboard client {}: {}", subscriber.id, e);
                    dead.push(subscriber.id);
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in &dead {
                subscribers.remove(id);
            }
        }
        Ok(delivered)
    }

    /// One periodic tick: with no subscribers, no snapshot is computed
    pub fn periodic_publish(&self) -> Result<Option<usize>, BroadcastError> {
        if self.subscriber_count() == 0 {
            return Ok(None);
        }
        let update = DashboardEvent::update(self.engine.snapshot(), self.clock.now_ms());
        self.publish(&update).map(Some)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn stats(&self) -> DashboardStats {
        let now = self.clock.now_ms();
        let mut clients: Vec<SubscriberInfo> = self
            .subscribers
            .read()
            .values()
            .map(|s| SubscriberInfo {
                id: s.id,
                uptime_secs: now.saturating_sub(s.connected_at_ms) / 1000,
                events_sent: s.events_sent.load(Ordering::Relaxed),
            })
            .collect();
        clients.sort_by_key(|c| c.id);
        DashboardStats {
            connected_clients: clients.len(),
            total_events_sent: clients.iter().map(|c| c.events_sent).sum(),
            clients,
        }
    }
}

/// Spawn the periodic dashboard update task
pub fn spawn_broadcast_worker(
    broadcaster: Arc<DashboardBroadcaster>,
    interval: Duration,
) -> WorkerHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Periodic dashboard updates started (every {}ms)", interval.as_millis());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match broadcaster.periodic_publish() {
                        Ok(Some(n)) => debug!("Dashboard update delivered to {} clients", n),
                        Ok(None) => {}
                        Err(e) => warn!("Dashboard update skipped: {}", e),
                    }
                }
                _ = &mut shutdown_rx => break,
            }
        }
    });
    WorkerHandle::new("broadcast", shutdown_tx, task)
}
