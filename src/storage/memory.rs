//! In-memory object store.
//!
//! Objects live in a single `BTreeMap` keyed by fully qualified key,
//! shared by every session handle.  Like a real flat blob store there are
//! no directory entries: a directory exists while at least one key lies
//! beneath it.  Collection roots (`<owner>/<collection>`) always exist.
//!
//! Access credentials are accepted and ignored.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use bytes::Bytes;

use super::backend::{
    LastModified, ObjectReader, ObjectStore, ObjectWriter, RemoteObject, StoreConnector,
    StoreError, StoreResult,
};

/// Number of key segments that make up a collection root.
const ROOT_DEPTH: usize = 2;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    modified: SystemTime,
}

type ObjectMap = BTreeMap<String, StoredObject>;

/// Process-wide in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<ObjectMap>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored objects (markers included).
    pub fn len(&self) -> usize {
        self.read().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, ObjectMap>> {
        self.objects
            .read()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("lock poisoned: {e}")))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, ObjectMap>> {
        self.objects
            .write()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("lock poisoned: {e}")))
    }

    fn prefix_of(key: &str) -> String {
        if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        }
    }

    fn is_root(key: &str) -> bool {
        key.split('/').filter(|s| !s.is_empty()).count() <= ROOT_DEPTH
    }

    fn has_descendants(objects: &ObjectMap, key: &str) -> bool {
        let prefix = Self::prefix_of(key);
        objects
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }
}

impl ObjectStore for MemoryStore {
    fn stat(&self, key: &str) -> StoreResult<RemoteObject> {
        let objects = self.read()?;
        if let Some(obj) = objects.get(key) {
            return Ok(RemoteObject::file(
                key,
                obj.data.len() as u64,
                Some(LastModified::from_system_time(obj.modified)),
            ));
        }
        if Self::is_root(key) || Self::has_descendants(&objects, key) {
            return Ok(RemoteObject::directory(key, None));
        }
        Err(StoreError::NotFound(key.to_string()))
    }

    fn list(&self, key: &str, recursive: bool) -> StoreResult<Vec<RemoteObject>> {
        let objects = self.read()?;
        if objects.contains_key(key) {
            // Listing a file yields the file itself.
            drop(objects);
            return Ok(vec![self.stat(key)?]);
        }

        let prefix = Self::prefix_of(key);
        let mut entries = Vec::new();
        let mut seen_dirs = std::collections::BTreeSet::new();
        for (k, obj) in objects.range(prefix.clone()..) {
            let Some(rest) = k.strip_prefix(&prefix) else {
                break;
            };
            // Every intermediate segment is a directory.
            let segments: Vec<&str> = rest.split('/').collect();
            let dir_levels = if recursive { segments.len() - 1 } else { 1 };
            for depth in 1..=dir_levels.min(segments.len() - 1) {
                let dir = format!("{prefix}{}", segments[..depth].join("/"));
                if seen_dirs.insert(dir.clone()) {
                    entries.push(RemoteObject::directory(dir, None));
                }
            }
            if recursive || segments.len() == 1 {
                entries.push(RemoteObject::file(
                    k.clone(),
                    obj.data.len() as u64,
                    Some(LastModified::from_system_time(obj.modified)),
                ));
            }
        }

        if entries.is_empty() && !Self::is_root(key) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(entries)
    }

    fn open_read(&self, key: &str) -> StoreResult<Box<dyn ObjectReader>> {
        let objects = self.read()?;
        match objects.get(key) {
            Some(obj) => Ok(Box::new(Cursor::new(obj.data.clone()))),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    fn open_write(&self, key: &str) -> StoreResult<Box<dyn ObjectWriter>> {
        Ok(Box::new(MemoryWriter {
            objects: Arc::clone(&self.objects),
            key: key.to_string(),
            buffer: Vec::new(),
        }))
    }

    fn delete(&self, key: &str, recursive: bool) -> StoreResult<()> {
        let mut objects = self.write()?;
        if objects.remove(key).is_some() {
            return Ok(());
        }
        if !recursive {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let prefix = Self::prefix_of(key);
        let doomed: Vec<String> = objects
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        if doomed.is_empty() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        for k in doomed {
            objects.remove(&k);
        }
        Ok(())
    }
}

/// Buffers a whole object and publishes it on `finish`.
struct MemoryWriter {
    objects: Arc<RwLock<ObjectMap>>,
    key: String,
    buffer: Vec<u8>,
}

impl ObjectWriter for MemoryWriter {
    fn write_chunk(&mut self, data: &[u8]) -> StoreResult<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn finish(self: Box<Self>) -> StoreResult<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("lock poisoned: {e}")))?;
        objects.insert(
            self.key.clone(),
            StoredObject {
                data: Bytes::from(self.buffer),
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }
}

/// Hands every session the same shared [`MemoryStore`].
#[derive(Clone, Default)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl StoreConnector for MemoryConnector {
    fn connect(&self, _token: &str) -> Arc<dyn ObjectStore> {
        Arc::new(self.store.clone())
    }
}
