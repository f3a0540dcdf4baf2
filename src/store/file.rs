use super::{validate_rows, DurableStore, InsertOptions, ProducerRecord, StoreFuture, StoreTransaction};
use crate::error::StoreError;
use crate::event::MetricEvent;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

const BATCH_DIR: &str = "batches";
const BATCH_PREFIX: &str = "batch-";
const BATCH_SUFFIX: &str = ".ndjson";
const PRODUCERS_FILE: &str = "producers.json";

#[derive(Debug)]
struct Inner {
    base_path: PathBuf,
    next_seq: AtomicU64,
    producers: Mutex<BTreeMap<String, ProducerRecord>>,
}

impl Inner {
    fn batch_dir(&self) -> PathBuf {
        self.base_path.join(BATCH_DIR)
    }
}

/// Local filesystem store
///
/// Each committed transaction becomes one NDJSON file under `batches/`,
/// written to a temporary name and renamed into place so a reader never
/// sees a half-written batch. Producers live in `producers.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    inner: Arc<Inner>,
}

impl FileStore {
    /// Open (or create) a store rooted at `base_path`
    pub fn open(base_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(base_path.join(BATCH_DIR))?;

        let producers = match std::fs::read(base_path.join(PRODUCERS_FILE)) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        let last_seq = Self::batch_files(&base_path.join(BATCH_DIR))?
            .iter()
            .filter_map(|path| Self::seq_of(path))
            .max()
            .unwrap_or(0);

        Ok(FileStore {
            inner: Arc::new(Inner {
                base_path,
                next_seq: AtomicU64::new(last_seq + 1),
                producers: Mutex::new(producers),
            }),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.inner.base_path
    }

    /// Read every committed row back, oldest batch first
    pub fn read_rows(&self) -> Result<Vec<MetricEvent>, StoreError> {
        let mut rows = Vec::new();
        for path in Self::batch_files(&self.inner.batch_dir())? {
            let file = std::fs::File::open(&path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if !line.is_empty() {
                    rows.push(serde_json::from_str(&line)?);
                }
            }
        }
        Ok(rows)
    }

    /// Committed batch files sorted by sequence number
    fn batch_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| Self::seq_of(path).is_some())
            .collect();
        files.sort_by_key(|path| Self::seq_of(path));
        Ok(files)
    }

    fn seq_of(path: &Path) -> Option<u64> {
        path.file_name()?
            .to_str()?
            .strip_prefix(BATCH_PREFIX)?
            .strip_suffix(BATCH_SUFFIX)?
            .parse()
            .ok()
    }
}

struct FileTransaction {
    inner: Arc<Inner>,
    staged: Vec<MetricEvent>,
}

impl StoreTransaction for FileTransaction {
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
            let FileTransaction { inner, staged } = *self;
            if staged.is_empty() {
                return Ok(0);
            }

            let mut body = Vec::with_capacity(staged.len() * 96);
            for row in &staged {
                serde_json::to_writer(&mut body, row)?;
                body.push(b'\n');
            }

            let seq = inner.next_seq.fetch_add(1, Ordering::SeqCst);
            let name = format!("{}{:012}{}", BATCH_PREFIX, seq, BATCH_SUFFIX);
            let final_path = inner.batch_dir().join(&name);
            let tmp_path = inner.batch_dir().join(format!(".{}.tmp", name));

            tokio::fs::write(&tmp_path, &body).await?;
            tokio::fs::rename(&tmp_path, &final_path).await?;
            Ok(staged.len())
        })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move { Ok(()) })
    }
}

impl DurableStore for FileStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>> {
        Box::pin(async move {
            let tx: Box<dyn StoreTransaction> = Box::new(FileTransaction {
                inner: Arc::clone(&self.inner),
                staged: Vec::new(),
            });
            Ok(tx)
        })
    }

    fn upsert_producer<'a>(&'a self, producer: &'a ProducerRecord) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut producers = self.inner.producers.lock().await;
            let created = !producers.contains_key(&producer.id);
            if !created && producers.get(&producer.id) == Some(producer) {
                return Ok(false);
            }
            producers.insert(producer.id.clone(), producer.clone());

            let body = serde_json::to_vec_pretty(&*producers)?;
            let path = self.inner.base_path.join(PRODUCERS_FILE);
            let tmp_path = self.inner.base_path.join(format!(".{}.tmp", PRODUCERS_FILE));
            tokio::fs::write(&tmp_path, &body).await?;
            tokio::fs::rename(&tmp_path, &path).await?;
            Ok(created)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            tokio::fs::metadata(self.inner.batch_dir()).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LabelSet;
    use crate::store::insert_batch;

    #[tokio::test]
    async fn test_commit_writes_batch_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let rows = vec![
            MetricEvent::new("srv-1", "cpu", 10.0, 1),
            MetricEvent::new("srv-1", "cpu", 20.0, 2),
        ];

        insert_batch(&store, &rows, InsertOptions::bulk()).await.unwrap();

        assert_eq!(store.read_rows().unwrap(), rows);
        let files = FileStore::batch_files(&dir.path().join(BATCH_DIR)).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_same_instant_different_labels_both_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let rows = vec![
            MetricEvent::new("srv-1", "cpu", 0.0, 1_000)
                .with_labels(LabelSet::from_pairs(&[("core", "0")])),
            MetricEvent::new("srv-1", "cpu", 0.0, 1_000)
                .with_labels(LabelSet::from_pairs(&[("core", "1")])),
            MetricEvent::new("srv-1", "cpu", 0.0, 1_000)
                .with_labels(LabelSet::from_pairs(&[("core", "1")])),
        ];

        let stored = insert_batch(&store, &rows, InsertOptions::bulk()).await.unwrap();
        assert_eq!(stored, 3);
        assert_eq!(store.read_rows().unwrap(), rows);
    }

    #[tokio::test]
    async fn test_reopen_continues_sequence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            let rows = vec![MetricEvent::new("srv-1", "cpu", 1.0, 1)];
            insert_batch(&store, &rows, InsertOptions::bulk()).await.unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        let rows = vec![MetricEvent::new("srv-1", "cpu", 2.0, 2)];
        insert_batch(&store, &rows, InsertOptions::bulk()).await.unwrap();

        let values: Vec<f64> = store.read_rows().unwrap().iter().map(|e| e.value()).collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_rollback_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let rows = vec![MetricEvent::new("srv-1", "cpu", 1.0, 1)];

        let mut tx = store.begin().await.unwrap();
        tx.bulk_insert(&rows, InsertOptions::bulk()).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.read_rows().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_producers_persist_across_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            assert!(store.upsert_producer(&ProducerRecord::new("srv-9")).await.unwrap());
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert!(!store.upsert_producer(&ProducerRecord::new("srv-9")).await.unwrap());
        store.ping().await.unwrap();
    }
}
