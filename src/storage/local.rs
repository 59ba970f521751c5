//! Local filesystem object store.
//!
//! Keys map directly onto relative paths under a configurable root
//! directory (`<root>/<owner>/<collection>/<path>`).  Directories are
//! real directories, so the store also answers for prefixes nobody
//! wrote a marker into.
//!
//! All writes follow crash-only design: write to temp file, fsync, rename.
//! Access credentials are accepted and ignored.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::backend::{
    join_key, LastModified, ObjectReader, ObjectStore, ObjectWriter, RemoteObject,
    StoreConnector, StoreError, StoreResult,
};

/// Directory (under the root) holding in-progress writes.
const TMP_DIR: &str = ".tmp";

/// Number of key segments that make up a collection root.
const ROOT_DEPTH: usize = 2;

/// Stores objects on the local filesystem.
#[derive(Clone)]
pub struct LocalStore {
    /// Root directory for all stored objects.
    root: PathBuf,
}

impl LocalStore {
    /// Create a new `LocalStore` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        // Also create the .tmp directory for atomic writes.
        fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(Self { root })
    }

    /// Resolve a key to an absolute file path.
    ///
    /// Rejects keys with `..`, absolute components, or a leading `.tmp`
    /// segment so nothing can reach outside the root or into the temp area.
    fn resolve(&self, key: &str) -> StoreResult<PathBuf> {
        for component in Path::new(key).components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(StoreError::Backend(anyhow::anyhow!(
                        "path traversal detected in key: {key}"
                    )))
                }
            }
        }
        if key.split('/').next() == Some(TMP_DIR) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "reserved key prefix: {key}"
            )));
        }
        Ok(self.root.join(key))
    }

    /// Generate a temp file path under .tmp/ for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(TMP_DIR).join(format!("tmp-{id}"))
    }

    fn is_root(key: &str) -> bool {
        key.split('/').filter(|s| !s.is_empty()).count() <= ROOT_DEPTH
    }

    fn entry(key: String, meta: &fs::Metadata) -> RemoteObject {
        let modified = meta.modified().ok().map(LastModified::from_system_time);
        if meta.is_dir() {
            RemoteObject::directory(key, modified)
        } else {
            RemoteObject::file(key, meta.len(), modified)
        }
    }

    fn walk(&self, dir: &Path, key: &str, recursive: bool, out: &mut Vec<RemoteObject>) -> StoreResult<()> {
        for dirent in fs::read_dir(dir)? {
            let dirent = dirent?;
            let Some(name) = dirent.file_name().to_str().map(str::to_string) else {
                debug!(path = ?dirent.path(), "skipping non-UTF-8 file name");
                continue;
            };
            let meta = dirent.metadata()?;
            let child_key = join_key(key, &name);
            out.push(Self::entry(child_key.clone(), &meta));
            if recursive && meta.is_dir() {
                self.walk(&dirent.path(), &child_key, true, out)?;
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn stat(&self, key: &str) -> StoreResult<RemoteObject> {
        let path = self.resolve(key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(Self::entry(key.to_string(), &meta)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if Self::is_root(key) {
                    Ok(RemoteObject::directory(key, None))
                } else {
                    Err(StoreError::NotFound(key.to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, key: &str, recursive: bool) -> StoreResult<Vec<RemoteObject>> {
        let entry = self.stat(key)?;
        if !entry.is_dir() {
            return Ok(vec![entry]);
        }
        let path = self.resolve(key)?;
        let mut out = Vec::new();
        if path.is_dir() {
            self.walk(&path, key, recursive, &mut out)?;
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    fn open_read(&self, key: &str) -> StoreResult<Box<dyn ObjectReader>> {
        let path = self.resolve(key)?;
        if !path.is_file() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(Box::new(File::open(&path)?))
    }

    fn open_write(&self, key: &str) -> StoreResult<Box<dyn ObjectWriter>> {
        let final_path = self.resolve(key)?;
        let tmp_path = self.temp_path();
        if let Some(parent) = tmp_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&tmp_path)?;
        Ok(Box::new(LocalWriter {
            file: Some(file),
            tmp_path,
            final_path,
        }))
    }

    fn delete(&self, key: &str, recursive: bool) -> StoreResult<()> {
        let path = self.resolve(key)?;
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_dir(&path)?;
            }
        } else {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// Writes into a temp file; `finish` fsyncs and renames it into place.
struct LocalWriter {
    file: Option<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
}

impl ObjectWriter for LocalWriter {
    fn write_chunk(&mut self, data: &[u8]) -> StoreResult<()> {
        match self.file.as_mut() {
            Some(file) => Ok(file.write_all(data)?),
            None => Err(StoreError::Backend(anyhow::anyhow!("writer already closed"))),
        }
    }

    fn finish(mut self: Box<Self>) -> StoreResult<()> {
        let Some(file) = self.file.take() else {
            return Err(StoreError::Backend(anyhow::anyhow!("writer already closed")));
        };
        file.sync_all()?; // fsync
        drop(file);

        // Ensure parent directory exists (handles keys with '/' separators).
        if let Some(parent) = self.final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Atomic rename to final path.
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(())
    }
}

impl Drop for LocalWriter {
    fn drop(&mut self) {
        // Abandoned before finish: discard the partial temp file.
        if self.file.is_some() {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Hands every session a handle on the same root directory.
pub struct LocalConnector {
    store: LocalStore,
}

impl LocalConnector {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }
}

impl StoreConnector for LocalConnector {
    fn connect(&self, _token: &str) -> Arc<dyn ObjectStore> {
        Arc::new(self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn test_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = LocalStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn put(store: &LocalStore, key: &str, data: &[u8]) {
        let mut writer = store.open_write(key).unwrap();
        writer.write_chunk(data).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_put_and_read() {
        let (_dir, store) = test_store();
        put(&store, "alice/data/docs/a.txt", b"hello");

        let mut out = String::new();
        store
            .open_read("alice/data/docs/a.txt")
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "hello");

        let stat = store.stat("alice/data/docs/a.txt").unwrap();
        assert_eq!(stat.size, 5);
        assert!(stat.last_modified.is_some());
        assert!(store.stat("alice/data/docs").unwrap().is_dir());
    }

    #[test]
    fn test_unfinished_write_leaves_nothing() {
        let (dir, store) = test_store();
        {
            let mut writer = store.open_write("alice/data/partial.bin").unwrap();
            writer.write_chunk(b"half").unwrap();
        }
        assert!(!store.exists("alice/data/partial.bin").unwrap());
        let leftovers = fs::read_dir(dir.path().join(TMP_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_missing_root_is_directory() {
        let (_dir, store) = test_store();
        assert!(store.stat("bob/fresh").unwrap().is_dir());
        assert!(store.list("bob/fresh", false).unwrap().is_empty());
        assert!(matches!(
            store.stat("bob/fresh/nothing"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_and_recursive_list() {
        let (_dir, store) = test_store();
        put(&store, "alice/data/a.txt", b"1");
        put(&store, "alice/data/sub/b.txt", b"22");

        let top: Vec<String> = store
            .list("alice/data", false)
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(top, vec!["alice/data/a.txt", "alice/data/sub"]);

        let all: Vec<String> = store
            .list("alice/data", true)
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(
            all,
            vec!["alice/data/a.txt", "alice/data/sub", "alice/data/sub/b.txt"]
        );
    }

    #[test]
    fn test_delete_tree() {
        let (_dir, store) = test_store();
        put(&store, "alice/data/sub/b.txt", b"22");
        put(&store, "alice/data/sub/deeper/c.txt", b"333");

        store.delete("alice/data/sub", true).unwrap();
        assert!(!store.exists("alice/data/sub").unwrap());
        assert!(matches!(
            store.delete("alice/data/sub", true),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_traversal_rejected() {
        let (_dir, store) = test_store();
        assert!(store.stat("alice/../../etc/passwd").is_err());
        assert!(store.open_write("/etc/passwd").is_err());
        assert!(store.stat(".tmp/anything").is_err());
    }
}
