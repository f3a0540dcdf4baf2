use super::{validate_rows, DurableStore, InsertOptions, ProducerRecord, StoreFuture, StoreTransaction};
use crate::event::MetricEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    rows: Vec<MetricEvent>,
    producers: HashMap<String, ProducerRecord>,
    commits: u64,
}

/// In-memory durable store for unit tests and demos
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All committed rows in commit order
    pub fn rows(&self) -> Vec<MetricEvent> {
        self.inner.read().rows.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().rows.is_empty()
    }

    /// Number of committed transactions
    pub fn commit_count(&self) -> u64 {
        self.inner.read().commits
    }

    pub fn producer(&self, id: &str) -> Option<ProducerRecord> {
        self.inner.read().producers.get(id).cloned()
    }

    pub fn producer_count(&self) -> usize {
        self.inner.read().producers.len()
    }
}

struct MemoryTransaction {
    inner: Arc<RwLock<Inner>>,
    staged: Vec<MetricEvent>,
}

impl StoreTransaction for MemoryTransaction {
    fn bulk_insert<'a>(
        &'a mut self,
        rows: &'a [MetricEvent],
        options: InsertOptions,
    ) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            if !options.skip_validation {
                validate_rows(rows)?;
            }
            self.staged.extend_from_slice(rows);
            Ok(rows.len())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, usize> {
        Box::pin(async move {
            let MemoryTransaction { inner, staged } = *self;
            let stored = staged.len();
            let mut guard = inner.write();
            guard.rows.extend(staged);
            guard.commits += 1;
            Ok(stored)
        })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move { Ok(()) })
    }
}

impl DurableStore for MemoryStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>> {
        Box::pin(async move {
            let tx: Box<dyn StoreTransaction> = Box::new(MemoryTransaction {
                inner: Arc::clone(&self.inner),
                staged: Vec::new(),
            });
            Ok(tx)
        })
    }

    fn upsert_producer<'a>(&'a self, producer: &'a ProducerRecord) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut guard = self.inner.write();
            let created = !guard.producers.contains_key(&producer.id);
            guard.producers.insert(producer.id.clone(), producer.clone());
            Ok(created)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }
}
