use super::{DurableStore, ProducerRecord};
use crate::error::RegistrationError;
use parking_lot::RwLock;
use ahash::AHashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

/// Producer registry collaborator
///
/// `ensure_producer_exists` must succeed before the first event of a
/// previously unseen producer enters the pipeline.
pub trait ProducerRegistry: Send + Sync + 'static {
    fn ensure_producer_exists<'a>(
        &'a self,
        producer_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RegistrationError>> + Send + 'a>>;

    /// Whether a producer has already been confirmed (no I/O)
    fn is_known(&self, producer_id: &str) -> bool;
}

/// Registry backed by the durable store's idempotent producer upsert
///
/// Confirmed ids are cached so the store is hit once per producer for the
/// life of the process. Two connections racing on the same new producer may
/// both upsert; the upsert is idempotent so that is harmless.
pub struct StoreProducerRegistry {
    store: Arc<dyn DurableStore>,
    known: RwLock<AHashSet<String>>,
}

impl StoreProducerRegistry {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        StoreProducerRegistry {
            store,
            known: RwLock::new(AHashSet::new()),
        }
    }

    pub fn known_count(&self) -> usize {
        self.known.read().len()
    }
}

impl ProducerRegistry for StoreProducerRegistry {
    fn ensure_producer_exists<'a>(
        &'a self,
        producer_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RegistrationError>> + Send + 'a>> {
        Box::pin(async move {
            if self.is_known(producer_id) {
                return Ok(());
            }

            let record = ProducerRecord::new(producer_id);
            match self.store.upsert_producer(&record).await {
                Ok(created) => {
                    if created {
                        info!("Registered new producer: {}", producer_id);
                    }
                    self.known.write().insert(producer_id.to_string());
                    Ok(())
                }
                Err(source) => Err(RegistrationError {
                    producer_id: producer_id.to_string(),
                    source,
                }),
            }
        })
    }

    fn is_known(&self, producer_id: &str) -> bool {
        self.known.read().contains(producer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SimulatedStore, SimulatedStoreConfig};

    #[tokio::test]
    async fn test_registers_once() {
        let memory = MemoryStore::new();
        let registry = StoreProducerRegistry::new(Arc::new(memory.clone()));

        assert!(!registry.is_known("srv-1"));
        registry.ensure_producer_exists("srv-1").await.unwrap();
        registry.ensure_producer_exists("srv-1").await.unwrap();

        assert!(registry.is_known("srv-1"));
        assert_eq!(memory.producer_count(), 1);
        assert_eq!(registry.known_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let store = Arc::new(SimulatedStore::new(
            Arc::new(MemoryStore::new()),
            1,
            SimulatedStoreConfig::no_faults(),
        ));
        let registry = StoreProducerRegistry::new(store.clone());

        store.set_unreachable(true);
        let err = registry.ensure_producer_exists("srv-1").await.unwrap_err();
        assert_eq!(err.producer_id, "srv-1");
        assert!(!registry.is_known("srv-1"));

        store.set_unreachable(false);
        registry.ensure_producer_exists("srv-1").await.unwrap();
        assert!(registry.is_known("srv-1"));
    }
}
