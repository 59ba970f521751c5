//! Directory markers.
//!
//! A flat key store has no empty directories: a prefix is visible only
//! while some key lies beneath it.  To keep directories created through
//! WebDAV listable after their last file goes away, a zero-byte marker
//! object named [`MARKER_NAME`] is placed inside them.  Markers are an
//! implementation detail and are filtered out of everything a client sees.

use bytes::Bytes;
use tracing::debug;

use super::adapter::RemoteStoreAdapter;
use super::backend::{base_name, join_key, parent_key, RemoteObject};

/// Base name of the hidden marker object.
pub const MARKER_NAME: &str = ".keep";

/// Whether `key` names a marker object.
pub fn is_marker(key: &str) -> bool {
    base_name(key) == MARKER_NAME
}

/// Whether any segment of `key` is a marker name.
pub fn touches_marker(key: &str) -> bool {
    key.split('/').any(|segment| segment == MARKER_NAME)
}

/// Key of the marker object inside directory `dir`.
pub fn marker_key(dir: &str) -> String {
    join_key(dir, MARKER_NAME)
}

/// The directory that needs a marker when `key` is written, if any.
///
/// The collection root is always listable, so keys directly beneath it
/// need nothing; any deeper key needs its immediate parent marked.
pub fn marker_parent<'a>(root: &str, key: &'a str) -> Option<&'a str> {
    let parent = parent_key(key);
    let below_root = parent.strip_prefix(root)?;
    if below_root.is_empty() {
        return None;
    }
    below_root.starts_with('/').then_some(parent)
}

/// Drop marker objects from a listing.
pub fn without_markers(entries: Vec<RemoteObject>) -> Vec<RemoteObject> {
    entries
        .into_iter()
        .filter(|entry| !is_marker(&entry.key))
        .collect()
}

/// Places markers for one session's collection.
pub struct DirectoryMarkers<'a> {
    store: &'a RemoteStoreAdapter,
    root: &'a str,
}

impl<'a> DirectoryMarkers<'a> {
    pub fn new(store: &'a RemoteStoreAdapter, root: &'a str) -> Self {
        Self { store, root }
    }

    /// Make sure the parent directory of `key` carries a marker.
    ///
    /// Best effort: any failure is logged and swallowed so the caller's
    /// own operation always proceeds.
    pub async fn ensure(&self, key: &str) {
        let Some(parent) = marker_parent(self.root, key) else {
            return;
        };
        let marker = marker_key(parent);
        match self.store.exists(&marker).await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = self.store.put_bytes(&marker, Bytes::new()).await {
                    debug!(marker = %marker, error = %e, "directory marker not created");
                }
            }
            Err(e) => debug!(marker = %marker, error = %e, "directory marker check failed"),
        }
    }

    /// Create the marker that makes `dir` itself exist.
    pub async fn create_in(&self, dir: &str) -> super::backend::StoreResult<()> {
        self.store.put_bytes(&marker_key(dir), Bytes::new()).await
    }
}
