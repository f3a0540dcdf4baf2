//! Sharded per-key aggregation table
//!
//! Each key lives in exactly one shard, and every update to it happens under
//! that shard's lock, so concurrent updates to one key serialize while
//! updates to keys in other shards proceed in parallel.

use super::record::{round2, AggregationRecord};
use crate::event::{AggregationKey, MetricEvent};
use ahash::{AHashMap, AHashSet, RandomState};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

const NUM_SHARDS: usize = 16;

/// Display view of one key, numeric fields rounded to 2 decimals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateSnapshot {
    pub producer_id: String,
    pub metric_name: String,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
    pub count: u64,
    pub p95: Option<f64>,
    pub last_update: u64,
}

impl AggregateSnapshot {
    fn of(key: &AggregationKey, record: &AggregationRecord) -> Self {
        AggregateSnapshot {
            producer_id: key.producer_id.clone(),
            metric_name: key.metric_name.clone(),
            avg: round2(record.avg()),
            min: round2(record.min),
            max: round2(record.max),
            last: round2(record.last),
            count: record.count,
            p95: record.percentile95().map(round2),
            last_update: record.last_update_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregationStats {
    pub total_aggregations: usize,
    pub total_data_points: u64,
    pub producers: usize,
    pub metrics: usize,
}

pub struct AggregationEngine {
    shards: [Mutex<AHashMap<AggregationKey, AggregationRecord>>; NUM_SHARDS],
    hasher: RandomState,
    window_capacity: usize,
    /// Number of `snapshot()` computations performed
    snapshot_count: AtomicU64,
}

impl AggregationEngine {
    pub fn new(window_capacity: usize) -> Self {
        AggregationEngine {
            shards: std::array::from_fn(|_| Mutex::new(AHashMap::new())),
            hasher: RandomState::new(),
            window_capacity,
            snapshot_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard_for(&self, key: &AggregationKey) -> &Mutex<AHashMap<AggregationKey, AggregationRecord>> {
        let idx = (self.hasher.hash_one(key) as usize) % NUM_SHARDS;
        &self.shards[idx]
    }

    /// Fold one accepted event into its key's running statistics
    pub fn update(&self, event: &MetricEvent) {
        let key = event.key();
        let value = event.value();
        let ts = event.timestamp_ms();

        let mut shard = self.shard_for(&key).lock();
        match shard.get_mut(&key) {
            Some(record) => {
                record.observe(value, ts);
                record.verify_invariants();
            }
            None => {
                shard.insert(key, AggregationRecord::new(value, ts, self.window_capacity));
            }
        }
    }

    pub fn percentile95(&self, key: &AggregationKey) -> Option<f64> {
        // Copy the window under the lock, sort outside it
        let window = self.shard_for(key).lock().get(key)?.window.clone();
        window.percentile95()
    }

    /// Raw record for one key
    pub fn get(&self, key: &AggregationKey) -> Option<AggregationRecord> {
        self.shard_for(key).lock().get(key).cloned()
    }

    /// Display view of every known key, ordered by key
    pub fn snapshot(&self) -> Vec<AggregateSnapshot> {
        self.snapshot_count.fetch_add(1, Ordering::Relaxed);
        self.collect(|_| true)
    }

    /// Display view of every metric reported by one producer
    pub fn for_producer(&self, producer_id: &str) -> Vec<AggregateSnapshot> {
        self.collect(|key| key.producer_id == producer_id)
    }

    fn collect(&self, filter: impl Fn(&AggregationKey) -> bool) -> Vec<AggregateSnapshot> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock();
            out.extend(
                shard
                    .iter()
                    .filter(|(key, _)| filter(key))
                    .map(|(key, record)| AggregateSnapshot::of(key, record)),
            );
        }
        out.sort_by(|a, b| {
            (&a.producer_id, &a.metric_name).cmp(&(&b.producer_id, &b.metric_name))
        });
        out
    }

    pub fn reset(&self, key: &AggregationKey) -> bool {
        let removed = self.shard_for(key).lock().remove(key).is_some();
        if removed {
            info!("Reset aggregation for {}", key);
        }
        removed
    }

    pub fn reset_all(&self) -> usize {
        let mut cleared = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            cleared += shard.len();
            shard.clear();
        }
        info!("Reset {} aggregations", cleared);
        cleared
    }

    /// Number of keys tracked
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-key sample counts, for status reporting
    pub fn counts(&self) -> Vec<(AggregationKey, u64)> {
        let mut out: Vec<(AggregationKey, u64)> = Vec::new();
        for shard in &self.shards {
            out.extend(shard.lock().iter().map(|(k, r)| (k.clone(), r.count)));
        }
        out.sort();
        out
    }

    pub fn stats(&self) -> AggregationStats {
        let mut stats = AggregationStats::default();
        let mut producers = AHashSet::new();
        let mut metrics = AHashSet::new();
        for shard in &self.shards {
            let shard = shard.lock();
            for (key, record) in shard.iter() {
                stats.total_aggregations += 1;
                stats.total_data_points += record.count;
                producers.insert(key.producer_id.clone());
                metrics.insert(key.metric_name.clone());
            }
        }
        stats.producers = producers.len();
        stats.metrics = metrics.len();
        stats
    }

    pub fn window_capacity(&self) -> usize {
        self.window_capacity
    }

    pub fn snapshot_count(&self) -> u64 {
        self.snapshot_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn event(producer: &str, metric: &str, value: f64) -> MetricEvent {
        MetricEvent::new(producer, metric, value, 1_000)
    }

    #[test]
    fn test_cpu_scenario() {
        let engine = AggregationEngine::new(100);
        for v in [10.0, 20.0, 90.0] {
            engine.update(&event("A", "cpu", v));
        }

        let record = engine.get(&AggregationKey::new("A", "cpu")).unwrap();
        assert_eq!(record.count, 3);
        assert_eq!(record.sum, 120.0);
        assert_eq!(record.min, 10.0);
        assert_eq!(record.max, 90.0);
        assert_eq!(record.last, 90.0);
        assert_eq!(record.avg(), 40.0);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].avg, 40.0);
        assert_eq!(snapshot[0].p95, Some(90.0));
    }

    #[test]
    fn test_keys_are_structural() {
        // "a:b"+"c" and "a"+"b:c" must stay distinct
        let engine = AggregationEngine::new(100);
        engine.update(&event("a:b", "c", 1.0));
        engine.update(&event("a", "b:c", 2.0));
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn test_percentile_over_last_hundred() {
        let engine = AggregationEngine::new(100);
        for v in 1..=150 {
            engine.update(&event("A", "mem", v as f64));
        }
        let key = AggregationKey::new("A", "mem");
        let record = engine.get(&key).unwrap();
        assert_eq!(record.window.len(), 100);
        assert_eq!(record.count, 150);
        // window holds 51..=150, ceil(100*0.95)-1 = 94 -> 145
        assert_eq!(engine.percentile95(&key), Some(145.0));
    }

    #[test]
    fn test_snapshot_rounds_to_two_decimals() {
        let engine = AggregationEngine::new(100);
        engine.update(&event("A", "load", 1.0 / 3.0));
        engine.update(&event("A", "load", 2.0 / 3.0));

        let snap = &engine.snapshot()[0];
        assert_eq!(snap.avg, 0.5);
        assert_eq!(snap.min, 0.33);
        assert_eq!(snap.max, 0.67);
        assert_eq!(snap.last, 0.67);
    }

    #[test]
    fn test_for_producer_and_stats() {
        let engine = AggregationEngine::new(100);
        engine.update(&event("A", "cpu", 1.0));
        engine.update(&event("A", "mem", 2.0));
        engine.update(&event("B", "cpu", 3.0));
        engine.update(&event("B", "cpu", 4.0));

        let a: Vec<_> = engine
            .for_producer("A")
            .into_iter()
            .map(|s| s.metric_name)
            .collect();
        assert_eq!(a, vec!["cpu", "mem"]);

        assert_eq!(
            engine.stats(),
            AggregationStats {
                total_aggregations: 3,
                total_data_points: 4,
                producers: 2,
                metrics: 2,
            }
        );
    }

    #[test]
    fn test_reset() {
        let engine = AggregationEngine::new(100);
        engine.update(&event("A", "cpu", 1.0));
        engine.update(&event("B", "cpu", 1.0));

        assert!(engine.reset(&AggregationKey::new("A", "cpu")));
        assert!(!engine.reset(&AggregationKey::new("A", "cpu")));
        assert_eq!(engine.len(), 1);

        assert_eq!(engine.reset_all(), 1);
        assert!(engine.is_empty());
        assert!(engine.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_counter() {
        let engine = AggregationEngine::new(100);
        assert_eq!(engine.snapshot_count(), 0);
        engine.snapshot();
        engine.snapshot();
        engine.for_producer("x");
        assert_eq!(engine.snapshot_count(), 2);
    }

    #[test]
    fn test_concurrent_updates_same_key() {
        let engine = Arc::new(AggregationEngine::new(100));
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for i in 0..1_000 {
                        engine.update(&event("A", "cpu", (t * 1_000 + i) as f64));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let record = engine.get(&AggregationKey::new("A", "cpu")).unwrap();
        assert_eq!(record.count, 8_000);
        assert_eq!(record.min, 0.0);
        assert_eq!(record.max, 7_999.0);
        assert_eq!(record.sum, (0..8_000).map(|v| v as f64).sum::<f64>());
        assert_eq!(record.window.len(), 100);
    }
}
