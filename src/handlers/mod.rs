//! WebDAV method handlers.
//!
//! Each handler receives the per-request [`Session`] plus whatever parts
//! of the request it needs, and returns `Result<Response, DavError>`.
//! Routing lives in [`crate::server`].

pub mod collection;
pub mod lock;
pub mod object;
pub mod transfer;

use axum::http::{header, HeaderMap};

use crate::auth::parse_basic_auth;
use crate::errors::DavError;
use crate::paths::PathResolver;
use crate::storage::adapter::RemoteStoreAdapter;
use crate::storage::markers::{touches_marker, DirectoryMarkers};
use crate::AppState;

/// One authenticated request's view of its collection.
///
/// Built from the `Authorization` header before anything else happens and
/// dropped with the request.  Building it performs no store call.
pub struct Session {
    pub owner: String,
    pub resolver: PathResolver,
    pub store: RemoteStoreAdapter,
}

impl Session {
    pub fn open(state: &AppState, headers: &HeaderMap) -> Result<Self, DavError> {
        let header = match headers.get(header::AUTHORIZATION) {
            Some(value) => Some(value.to_str().map_err(|_| DavError::MalformedAuth)?),
            None => None,
        };
        let creds = parse_basic_auth(header, &state.config.auth.default_collection)?;
        let store = RemoteStoreAdapter::new(
            state.connector.connect(&creds.token),
            state.pool.clone(),
        );
        Ok(Self {
            resolver: PathResolver::new(&creds.owner, &creds.collection),
            owner: creds.owner,
            store,
        })
    }

    /// The collection root key.
    pub fn root(&self) -> &str {
        self.resolver.root()
    }

    pub fn markers(&self) -> DirectoryMarkers<'_> {
        DirectoryMarkers::new(&self.store, self.resolver.root())
    }

    /// Resolve a path that is only read.  Marker objects do not exist as
    /// far as clients are concerned.
    pub fn read_target(&self, raw_path: &str) -> Result<String, DavError> {
        let key = self.resolver.resolve(raw_path)?;
        if touches_marker(&key) {
            return Err(DavError::NotFound);
        }
        Ok(key)
    }

    /// Resolve a path that is about to be written or created.  Marker
    /// names are reserved.
    pub fn write_target(&self, raw_path: &str) -> Result<String, DavError> {
        let key = self.resolver.resolve(raw_path)?;
        if touches_marker(&key) {
            return Err(DavError::InvalidPath);
        }
        Ok(key)
    }

    /// Resolve a path that is about to be removed.  The collection root
    /// cannot be.
    pub fn removable_target(&self, raw_path: &str) -> Result<String, DavError> {
        let key = self.read_target(raw_path)?;
        if self.resolver.is_root(&key) {
            return Err(DavError::RootImmutable);
        }
        Ok(key)
    }
}
