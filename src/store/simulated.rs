//! Simulated Durable Store with Fault Injection
//!
//! Wraps another store and fails operations either at random (seeded, so
//! a failing run replays exactly) or on demand via `fail_next`.

use super::{DurableStore, InsertOptions, ProducerRecord, StoreFuture, StoreTransaction};
use crate::error::StoreError;
use crate::event::MetricEvent;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of BEGIN failure
    pub begin_fail_prob: f64,
    /// Probability of bulk insert failure
    pub insert_fail_prob: f64,
    /// Probability of COMMIT failure
    pub commit_fail_prob: f64,
    /// Probability of producer upsert failure
    pub upsert_fail_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            begin_fail_prob: 0.01,
            insert_fail_prob: 0.01,
            commit_fail_prob: 0.01,
            upsert_fail_prob: 0.01,
            latency_range_us: (100, 5_000),
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            begin_fail_prob: 0.10,
            insert_fail_prob: 0.10,
            commit_fail_prob: 0.10,
            upsert_fail_prob: 0.05,
            latency_range_us: (1_000, 20_000),
        }
    }

    /// No random faults - only `fail_next` and `set_unreachable` inject failures
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            begin_fail_prob: 0.0,
            insert_fail_prob: 0.0,
            commit_fail_prob: 0.0,
            upsert_fail_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedStoreStats {
    pub begin_attempts: u64,
    pub begin_failures: u64,
    pub insert_attempts: u64,
    pub insert_failures: u64,
    pub commit_attempts: u64,
    pub commit_failures: u64,
    pub upsert_attempts: u64,
    pub upsert_failures: u64,
}

struct SimulatedState {
    rng: StdRng,
    stats: SimulatedStoreStats,
    /// Transactions that must fail regardless of probabilities
    forced_failures: u32,
    unreachable: bool,
}

#[derive(Clone, Copy)]
enum Op {
    Begin,
    Insert,
    Commit,
    Upsert,
}

/// Simulated store that wraps another store and injects faults
pub struct SimulatedStore {
    inner: Arc<dyn DurableStore>,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedStore {
    pub fn new(inner: Arc<dyn DurableStore>, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedStore {
            inner,
            config,
            state: Arc::new(Mutex::new(SimulatedState {
                rng: StdRng::seed_from_u64(seed),
                stats: SimulatedStoreStats::default(),
                forced_failures: 0,
                unreachable: false,
            })),
        }
    }

    /// Fail the next `n` transactions at BEGIN
    pub fn fail_next(&self, n: u32) {
        self.state.lock().forced_failures = n;
    }

    /// Make every operation (including ping) fail until cleared
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    fn latency(&self) -> Option<Duration> {
        let (min, max) = self.config.latency_range_us;
        if min == 0 && max == 0 {
            return None;
        }
        let us = if max > min {
            self.state.lock().rng.gen_range(min..max)
        } else {
            min
        };
        Some(Duration::from_micros(us))
    }

    /// Record the attempt and decide whether this operation fails
    fn roll(state: &Mutex<SimulatedState>, config: &SimulatedStoreConfig, op: Op) -> bool {
        let mut s = state.lock();
        let forced = match op {
            Op::Begin if s.forced_failures > 0 => {
                s.forced_failures -= 1;
                true
            }
            _ => false,
        };
        let prob = match op {
            Op::Begin => config.begin_fail_prob,
            Op::Insert => config.insert_fail_prob,
            Op::Commit => config.commit_fail_prob,
            Op::Upsert => config.upsert_fail_prob,
        };
        let fail = s.unreachable || forced || (prob > 0.0 && s.rng.gen_bool(prob.min(1.0)));

        let stats = &mut s.stats;
        let (attempts, failures) = match op {
            Op::Begin => (&mut stats.begin_attempts, &mut stats.begin_failures),
            Op::Insert => (&mut stats.insert_attempts, &mut stats.insert_failures),
            Op::Commit => (&mut stats.commit_attempts, &mut stats.commit_failures),
            Op::Upsert => (&mut stats.upsert_attempts, &mut stats.upsert_failures),
        };
        *attempts += 1;
        if fail {
            *failures += 1;
        }
        fail
    }
}

struct SimulatedTransaction {
    inner: Box<dyn StoreTransaction>,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedState>>,
}

impl StoreTransaction for SimulatedTransaction {
    fn bulk_insert<'a>(
        &'a mut self,
        rows: &'a [MetricEvent],
        options: InsertOptions,
    ) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            if SimulatedStore::roll(&self.state, &self.config, Op::Insert) {
                return Err(StoreError::Rejected("simulated insert failure".into()));
            }
            self.inner.bulk_insert(rows, options).await
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, usize> {
        Box::pin(async move {
            if SimulatedStore::roll(&self.state, &self.config, Op::Commit) {
                let _ = self.inner.rollback().await;
                return Err(StoreError::Unavailable("simulated commit failure".into()));
            }
            self.inner.commit().await
        })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        self.inner.rollback()
    }
}

impl DurableStore for SimulatedStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>> {
        Box::pin(async move {
            if let Some(latency) = self.latency() {
                tokio::time::sleep(latency).await;
            }
            if Self::roll(&self.state, &self.config, Op::Begin) {
                return Err(StoreError::Unavailable("simulated begin failure".into()));
            }
            let inner = self.inner.begin().await?;
            let tx: Box<dyn StoreTransaction> = Box::new(SimulatedTransaction {
                inner,
                config: self.config.clone(),
                state: Arc::clone(&self.state),
            });
            Ok(tx)
        })
    }

    fn upsert_producer<'a>(&'a self, producer: &'a ProducerRecord) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            if Self::roll(&self.state, &self.config, Op::Upsert) {
                return Err(StoreError::Unavailable("simulated upsert failure".into()));
            }
            self.inner.upsert_producer(producer).await
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if self.state.lock().unreachable {
                return Err(StoreError::Unavailable("simulated unreachable store".into()));
            }
            self.inner.ping().await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{insert_batch, MemoryStore};

    fn rows() -> Vec<MetricEvent> {
        vec![MetricEvent::new("srv-1", "cpu", 1.0, 1)]
    }

    #[tokio::test]
    async fn test_no_faults_passes_through() {
        let memory = MemoryStore::new();
        let store = SimulatedStore::new(
            Arc::new(memory.clone()),
            7,
            SimulatedStoreConfig::no_faults(),
        );

        insert_batch(&store, &rows(), InsertOptions::bulk()).await.unwrap();
        assert_eq!(memory.len(), 1);
        assert_eq!(store.stats().commit_attempts, 1);
    }

    #[tokio::test]
    async fn test_fail_next_counts_down() {
        let memory = MemoryStore::new();
        let store = SimulatedStore::new(
            Arc::new(memory.clone()),
            7,
            SimulatedStoreConfig::no_faults(),
        );
        store.fail_next(2);

        assert!(insert_batch(&store, &rows(), InsertOptions::bulk()).await.is_err());
        assert!(insert_batch(&store, &rows(), InsertOptions::bulk()).await.is_err());
        assert!(insert_batch(&store, &rows(), InsertOptions::bulk()).await.is_ok());

        let stats = store.stats();
        assert_eq!(stats.begin_attempts, 3);
        assert_eq!(stats.begin_failures, 2);
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_fails_ping_and_writes() {
        let store = SimulatedStore::new(
            Arc::new(MemoryStore::new()),
            7,
            SimulatedStoreConfig::no_faults(),
        );
        store.set_unreachable(true);
        assert!(store.ping().await.is_err());
        assert!(store.upsert_producer(&ProducerRecord::new("a")).await.is_err());

        store.set_unreachable(false);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_same_seed_same_faults() {
        async fn run(seed: u64) -> Vec<bool> {
            let store = SimulatedStore::new(
                Arc::new(MemoryStore::new()),
                seed,
                SimulatedStoreConfig {
                    latency_range_us: (0, 0),
                    ..SimulatedStoreConfig::high_chaos()
                },
            );
            let mut outcomes = Vec::new();
            for i in 0..50 {
                let rows = vec![MetricEvent::new("srv-1", "cpu", i as f64, i)];
                outcomes.push(insert_batch(&store, &rows, InsertOptions::bulk()).await.is_ok());
            }
            outcomes
        }

        assert_eq!(run(42).await, run(42).await);
    }
}
