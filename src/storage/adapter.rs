//! Session-bound facade over an [`ObjectStore`].
//!
//! [`RemoteStoreAdapter`] is the only component that calls into the
//! remote store.  Every call runs on the bounded [`WorkerPool`] so a slow
//! or stalled store never blocks a request task, and every call is
//! counted in the `hubdav_store_calls_total` metric.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tracing::debug;

use super::backend::{ObjectReader, ObjectStore, ObjectWriter, RemoteObject, StoreError, StoreResult};
use crate::metrics::record_store_call;

/// Bounded pool of blocking workers shared by every session.
///
/// Jobs run on tokio's blocking threads; a semaphore caps how many store
/// calls are in flight at once.  The permit travels with the job, so a
/// job abandoned by a disconnected client frees its slot as soon as the
/// current blocking call returns.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a pool allowing `max_workers` concurrent store calls.
    pub fn new(max_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Run a blocking job on the pool.
    pub async fn run<T, F>(&self, job: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StoreResult<T> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("worker pool closed: {e}")))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("store worker failed: {e}")))?
    }

    /// Number of store calls that could start right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Store handle bound to one session, dispatching every call to the pool.
#[derive(Clone)]
pub struct RemoteStoreAdapter {
    store: Arc<dyn ObjectStore>,
    pool: WorkerPool,
}

impl RemoteStoreAdapter {
    pub fn new(store: Arc<dyn ObjectStore>, pool: WorkerPool) -> Self {
        Self { store, pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run `job` against the underlying store on the pool.
    pub async fn run<T, F>(&self, op: &'static str, job: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ObjectStore) -> StoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let result = self.pool.run(move || job(store.as_ref())).await;
        record_store_call(op, outcome(&result));
        result
    }

    pub async fn stat(&self, key: &str) -> StoreResult<RemoteObject> {
        let key = key.to_string();
        self.run("stat", move |store| store.stat(&key)).await
    }

    pub async fn list(&self, key: &str, recursive: bool) -> StoreResult<Vec<RemoteObject>> {
        let key = key.to_string();
        self.run("list", move |store| store.list(&key, recursive)).await
    }

    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.run("exists", move |store| store.exists(&key)).await
    }

    pub async fn open_read(&self, key: &str) -> StoreResult<Box<dyn ObjectReader>> {
        let key = key.to_string();
        self.run("open_read", move |store| store.open_read(&key)).await
    }

    pub async fn open_write(&self, key: &str) -> StoreResult<Box<dyn ObjectWriter>> {
        let key = key.to_string();
        self.run("open_write", move |store| store.open_write(&key)).await
    }

    /// Write one chunk on the pool, handing the writer back for the next.
    pub async fn write_chunk(
        &self,
        mut writer: Box<dyn ObjectWriter>,
        chunk: Bytes,
    ) -> StoreResult<Box<dyn ObjectWriter>> {
        let result = self
            .pool
            .run(move || {
                writer.write_chunk(&chunk)?;
                Ok(writer)
            })
            .await;
        record_store_call("write", outcome(&result));
        result
    }

    /// Publish a writer on the pool.
    pub async fn finish(&self, writer: Box<dyn ObjectWriter>) -> StoreResult<()> {
        let result = self.pool.run(move || writer.finish()).await;
        record_store_call("finish", outcome(&result));
        result
    }

    /// Store a complete small object in one job.
    pub async fn put_bytes(&self, key: &str, data: Bytes) -> StoreResult<()> {
        let key = key.to_string();
        self.run("put", move |store| {
            let mut writer = store.open_write(&key)?;
            writer.write_chunk(&data)?;
            writer.finish()
        })
        .await
    }

    pub async fn delete(&self, key: &str, recursive: bool) -> StoreResult<()> {
        let key = key.to_string();
        self.run("delete", move |store| store.delete(&key, recursive))
            .await
    }

    /// Post-mutation cache invalidation hook.
    ///
    /// Runs once with no retries and never fails the mutation that
    /// triggered it; a store error is only logged.
    pub async fn invalidate(&self, prefix: &str) {
        let key = prefix.to_string();
        if let Err(e) = self
            .run("invalidate", move |store| store.invalidate(&key))
            .await
        {
            debug!(prefix, error = %e, "cache invalidation skipped");
        }
    }
}

fn outcome<T>(result: &StoreResult<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(StoreError::NotFound(_)) => "not_found",
        Err(StoreError::Backend(_)) => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::FaultyStore;
    use crate::storage::memory::MemoryStore;
    use std::io::Read;

    fn adapter() -> RemoteStoreAdapter {
        RemoteStoreAdapter::new(Arc::new(MemoryStore::new()), WorkerPool::new(4))
    }

    #[tokio::test]
    async fn test_put_then_stat_and_read() {
        let store = adapter();
        store
            .put_bytes("alice/data/a.txt", Bytes::from("hello"))
            .await
            .unwrap();

        let stat = store.stat("alice/data/a.txt").await.unwrap();
        assert!(!stat.is_dir());
        assert_eq!(stat.size, 5);

        let mut reader = store.open_read("alice/data/a.txt").await.unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_chunked_writer_publishes_on_finish() {
        let store = adapter();
        let writer = store.open_write("alice/data/b.bin").await.unwrap();
        let writer = store
            .write_chunk(writer, Bytes::from_static(b"ab"))
            .await
            .unwrap();
        let writer = store
            .write_chunk(writer, Bytes::from_static(b"cd"))
            .await
            .unwrap();
        assert!(!store.exists("alice/data/b.bin").await.unwrap());

        store.finish(writer).await.unwrap();
        assert_eq!(store.stat("alice/data/b.bin").await.unwrap().size, 4);
    }

    #[tokio::test]
    async fn test_stat_missing_is_not_found() {
        let store = adapter();
        let err = store.stat("alice/data/missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalidate_swallows_store_errors() {
        let store = RemoteStoreAdapter::new(
            Arc::new(FaultyStore {
                inner: MemoryStore::new(),
            }),
            WorkerPool::new(1),
        );
        store
            .put_bytes("alice/data/a.txt", Bytes::from("abc"))
            .await
            .unwrap();
        store.invalidate("alice/data").await;
        assert_eq!(store.stat("alice/data/a.txt").await.unwrap().size, 3);
        assert_eq!(store.pool.available(), 1);
    }

    #[tokio::test]
    async fn test_pool_releases_permits() {
        let pool = WorkerPool::new(2);
        let value = pool.run(|| Ok(7)).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_pool_propagates_job_errors() {
        let pool = WorkerPool::new(1);
        let err = pool
            .run::<(), _>(|| Err(StoreError::NotFound("x".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(pool.available(), 1);
    }
}
