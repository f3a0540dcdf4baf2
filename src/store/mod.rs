//! Durable Store Abstraction
//!
//! The pipeline persists batches through this trait and never touches a
//! concrete backend directly.
//!
//! Implementations:
//! - `MemoryStore`: For unit tests and demos
//! - `FileStore`: NDJSON batch files on the local filesystem
//! - `SimulatedStore`: Fault-injecting wrapper around any other store

mod file;
mod memory;
mod producers;
mod simulated;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use producers::{ProducerRegistry, StoreProducerRegistry};
pub use simulated::{SimulatedStore, SimulatedStoreConfig, SimulatedStoreStats};

use crate::error::StoreError;
use crate::event::MetricEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Options for `StoreTransaction::bulk_insert`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOptions {
    /// Skip per-row validation (finite value, non-empty identifiers)
    pub skip_validation: bool,
    /// Tolerate rows the store already holds instead of failing the insert.
    /// Rows carry no caller-supplied identity and every staged row gets a
    /// fresh store-assigned position, so distinct events never collide and
    /// the in-tree backends store every staged row.
    pub ignore_duplicates: bool,
}

impl InsertOptions {
    /// Options used by the flush pipeline
    pub fn bulk() -> Self {
        InsertOptions {
            skip_validation: true,
            ignore_duplicates: true,
        }
    }
}

/// A registered producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerRecord {
    pub id: String,
    pub hostname: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

impl ProducerRecord {
    /// Record for a producer first seen on the wire; hostname defaults to the id
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        ProducerRecord {
            hostname: id.clone(),
            id,
            tags: BTreeMap::new(),
            meta: BTreeMap::new(),
        }
    }
}

/// Reject rows a relational store would refuse
pub(crate) fn validate_rows(rows: &[MetricEvent]) -> Result<(), StoreError> {
    for (i, row) in rows.iter().enumerate() {
        if row.producer_id().is_empty() || row.metric_name().is_empty() {
            return Err(StoreError::Rejected(format!(
                "row {}: empty producer id or metric name",
                i
            )));
        }
        if !row.value().is_finite() {
            return Err(StoreError::Rejected(format!(
                "row {}: non-finite value for {}",
                i,
                row.key()
            )));
        }
    }
    Ok(())
}

/// An open transaction; rows become visible only on `commit`
pub trait StoreTransaction: Send {
    /// Stage rows for insertion, returning how many were staged
    fn bulk_insert<'a>(
        &'a mut self,
        rows: &'a [MetricEvent],
        options: InsertOptions,
    ) -> StoreFuture<'a, usize>;

    /// Make staged rows durable, returning how many rows were stored
    fn commit(self: Box<Self>) -> StoreFuture<'static, usize>;

    /// Discard staged rows
    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()>;
}

/// Durable store collaborator
pub trait DurableStore: Send + Sync + 'static {
    /// Open a transaction
    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>>;

    /// Idempotent insert-or-update of a producer. Returns true if it was created.
    fn upsert_producer<'a>(&'a self, producer: &'a ProducerRecord) -> StoreFuture<'a, bool>;

    /// Cheap reachability probe used at startup
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Persist one batch transactionally: begin, bulk insert, commit.
/// The transaction is rolled back if the insert fails. Returns the number
/// of rows the commit stored.
pub async fn insert_batch(
    store: &dyn DurableStore,
    rows: &[MetricEvent],
    options: InsertOptions,
) -> Result<usize, StoreError> {
    let mut tx = store.begin().await?;
    match tx.bulk_insert(rows, options).await {
        Ok(_) => tx.commit().await,
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!("Rollback after failed insert also failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}
