//! Remote object storage.
//!
//! The [`backend::ObjectStore`] trait abstracts over where bytes
//! physically live.  Implementations include an in-process map, local
//! disk, and an HTTP client for a Hub-style dataset API.  Request
//! handlers only ever reach a store through [`adapter::RemoteStoreAdapter`].

pub mod adapter;
pub mod backend;
pub mod hub;
pub mod local;
pub mod markers;
pub mod memory;
pub mod stream;
