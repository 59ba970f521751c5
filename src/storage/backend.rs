//! Remote object store contract.
//!
//! The gateway never talks to a concrete store directly.  A
//! [`StoreConnector`] turns the access credential of one session into a
//! credential-scoped [`ObjectStore`] handle, and every other component
//! goes through that handle.
//!
//! Store calls are *blocking*: implementations may do synchronous disk or
//! network I/O.  Callers must run them on the worker pool owned by
//! [`super::adapter::RemoteStoreAdapter`], never on a request task.
//!
//! Keys are fully qualified (`<owner>/<collection>/<path>`), slash
//! delimited, without leading or trailing slashes.

use std::io::{Read, Seek};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure reported by an [`ObjectStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object or directory exists at the key.
    #[error("no such key: {0}")]
    NotFound(String),

    /// Anything else the store reports (transport, permission, I/O).
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Backend(err.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Whether a key names a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Last-modified value as reported by a store.
///
/// Stores report timestamps in whatever shape their API uses; rendering
/// normalises them with [`LastModified::to_http_date`].
#[derive(Debug, Clone, PartialEq)]
pub enum LastModified {
    /// Seconds since the Unix epoch.
    Epoch(f64),
    /// ISO-8601 / RFC 3339 text (a trailing `Z` means UTC).
    Iso(String),
}

impl LastModified {
    /// Capture a [`SystemTime`] as an epoch value.
    pub fn from_system_time(time: SystemTime) -> Self {
        let secs = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        LastModified::Epoch(secs)
    }

    /// Resolve to a UTC instant, falling back to "now" when unparseable.
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let parsed = match self {
            LastModified::Epoch(secs) if secs.is_finite() => {
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1_000_000_000.0) as u32;
                DateTime::from_timestamp(whole as i64, nanos)
            }
            LastModified::Epoch(_) => None,
            LastModified::Iso(text) => {
                DateTime::parse_from_rfc3339(&text.trim().replace('Z', "+00:00"))
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        };
        parsed.unwrap_or_else(Utc::now)
    }

    /// Render as an RFC 1123 GMT string (`Sun, 06 Nov 1994 08:49:37 GMT`).
    pub fn to_http_date(&self) -> String {
        format_http_date(&self.to_datetime())
    }
}

/// Render an instant as an RFC 1123 GMT string.
pub fn format_http_date(time: &DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Render an optional store timestamp, using the current time when absent.
pub fn http_date_or_now(modified: Option<&LastModified>) -> String {
    match modified {
        Some(m) => m.to_http_date(),
        None => format_http_date(&Utc::now()),
    }
}

/// One entry of the remote namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    /// Fully qualified key.
    pub key: String,
    pub kind: EntryKind,
    /// Size in bytes; always 0 for directories.
    pub size: u64,
    pub last_modified: Option<LastModified>,
}

impl RemoteObject {
    pub fn file(key: impl Into<String>, size: u64, last_modified: Option<LastModified>) -> Self {
        Self {
            key: key.into(),
            kind: EntryKind::File,
            size,
            last_modified,
        }
    }

    pub fn directory(key: impl Into<String>, last_modified: Option<LastModified>) -> Self {
        Self {
            key: key.into(),
            kind: EntryKind::Directory,
            size: 0,
            last_modified,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Last path segment of the key.
    pub fn base_name(&self) -> &str {
        base_name(&self.key)
    }
}

/// Last path segment of a slash-delimited key.
pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Parent prefix of a key (`a/b/c` -> `a/b`, `a` -> ``).
pub fn parent_key(key: &str) -> &str {
    key.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Join a directory key and a child name.
pub fn join_key(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Seekable byte source returned by [`ObjectStore::open_read`].
pub trait ObjectReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> ObjectReader for T {}

/// Byte sink returned by [`ObjectStore::open_write`].
///
/// Data becomes visible only once [`ObjectWriter::finish`] succeeds; a
/// writer dropped without finishing leaves the previous object intact.
pub trait ObjectWriter: Send {
    /// Append a chunk.
    fn write_chunk(&mut self, data: &[u8]) -> StoreResult<()>;

    /// Publish everything written so far under the writer's key.
    fn finish(self: Box<Self>) -> StoreResult<()>;
}

/// Blocking, credential-scoped object store handle.
pub trait ObjectStore: Send + Sync + 'static {
    /// Describe the entry at `key`.  Fails with [`StoreError::NotFound`]
    /// when neither a file nor a directory exists there.
    fn stat(&self, key: &str) -> StoreResult<RemoteObject>;

    /// List the entries beneath the directory `key`.  Immediate children
    /// only unless `recursive`, in which case every descendant is returned.
    fn list(&self, key: &str, recursive: bool) -> StoreResult<Vec<RemoteObject>>;

    /// Open the file at `key` for reading.
    fn open_read(&self, key: &str) -> StoreResult<Box<dyn ObjectReader>>;

    /// Open (create or replace) the file at `key` for writing.
    fn open_write(&self, key: &str) -> StoreResult<Box<dyn ObjectWriter>>;

    /// Remove the entry at `key`; directories are removed with everything
    /// beneath them when `recursive` is set.
    fn delete(&self, key: &str, recursive: bool) -> StoreResult<()>;

    /// Whether a file or directory exists at `key`.
    fn exists(&self, key: &str) -> StoreResult<bool> {
        match self.stat(key) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drop any listing or metadata cache the store keeps for `prefix`.
    fn invalidate(&self, _prefix: &str) -> StoreResult<()> {
        Ok(())
    }
}

/// Builds per-session store handles from an access credential.
///
/// `connect` performs no remote call and cannot fail.
pub trait StoreConnector: Send + Sync + 'static {
    fn connect(&self, token: &str) -> Arc<dyn ObjectStore>;
}
