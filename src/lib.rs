//! hubdav library -- WebDAV gateway onto hierarchical dataset blob stores.
//!
//! This crate maps WebDAV requests onto a flat, key-addressed remote
//! object store: credential scoping, path resolution, directory
//! emulation with marker objects, range downloads, and multistatus XML.

use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod paths;
pub mod server;
pub mod storage;
pub mod xml;

use crate::config::Config;
use crate::storage::adapter::WorkerPool;
use crate::storage::backend::StoreConnector;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Builds the credential-scoped store handle for each session.
    pub connector: Arc<dyn StoreConnector>,
    /// Bounded pool every blocking store call runs on.
    pub pool: WorkerPool,
}
