//! COPY and MOVE.
//!
//! The store has no rename, so both verbs copy every file beneath the
//! source to the mirrored destination key; MOVE then deletes the source,
//! and only once every copy has succeeded.  Marker objects travel with
//! the files so empty subdirectories survive the trip.

use std::io::Read;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::Session;
use crate::errors::DavError;
use crate::storage::backend::{join_key, parent_key};
use crate::storage::markers::touches_marker;

/// Buffer size for server-side copies.
const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// `COPY` (`remove_source == false`) or `MOVE` (`remove_source == true`).
pub async fn copy_or_move(
    session: &Session,
    raw_path: &str,
    headers: &HeaderMap,
    remove_source: bool,
) -> Result<Response, DavError> {
    let src = if remove_source {
        session.removable_target(raw_path)?
    } else {
        session.read_target(raw_path)?
    };
    let dst = session
        .resolver
        .destination(headers.get("destination").and_then(|v| v.to_str().ok()))?;
    if touches_marker(&dst) {
        return Err(DavError::InvalidPath);
    }
    if session.resolver.is_root(&dst) {
        return Err(DavError::RootImmutable);
    }
    if dst == src || dst.starts_with(&format!("{src}/")) {
        return Err(DavError::DestinationOverlap);
    }

    let source = session.store.stat(&src).await?;
    let copies: Vec<(String, String)> = if source.is_dir() {
        session
            .store
            .list(&src, true)
            .await?
            .into_iter()
            .filter(|entry| !entry.is_dir())
            .filter_map(|entry| {
                let relative = entry.key.strip_prefix(&src)?.trim_start_matches('/');
                Some((entry.key.clone(), join_key(&dst, relative)))
            })
            .collect()
    } else {
        vec![(src.clone(), dst.clone())]
    };

    let markers = session.markers();
    markers.ensure(&dst).await;
    if source.is_dir() && copies.is_empty() {
        markers.create_in(&dst).await?;
    }
    for (from, to) in copies {
        copy_file(session, from, to).await?;
    }

    if remove_source {
        session.store.delete(&src, true).await?;
    }

    for key in [&src, &dst] {
        if source.is_dir() {
            session.store.invalidate(key).await;
        }
        session.store.invalidate(parent_key(key)).await;
    }

    debug!(src = %src, dst = %dst, moved = remove_source, "transfer complete");
    Ok(StatusCode::CREATED.into_response())
}

/// Copy one file inside a single pool job.
async fn copy_file(session: &Session, from: String, to: String) -> Result<(), DavError> {
    session
        .store
        .run("copy", move |store| {
            let mut reader = store.open_read(&from)?;
            let mut writer = store.open_write(&to)?;
            let mut buf = vec![0u8; COPY_CHUNK_SIZE];
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                writer.write_chunk(&buf[..n])?;
            }
            writer.finish()
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{basic, state_with, CountingConnector};
    use crate::storage::backend::ObjectStore;
    use axum::http::{header, HeaderValue};

    fn session_for(connector: &CountingConnector) -> Session {
        let state = state_with(connector.clone());
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&basic("alice/data", "tok")).unwrap(),
        );
        Session::open(&state, &headers).unwrap()
    }

    fn destination(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("destination", HeaderValue::from_str(value).unwrap());
        headers
    }

    fn read(connector: &CountingConnector, key: &str) -> Vec<u8> {
        let mut out = Vec::new();
        connector
            .store
            .open_read(key)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_copy_directory_tree() {
        let connector = CountingConnector::default();
        let session = session_for(&connector);
        for (key, data) in [
            ("alice/data/src/a.txt", "A"),
            ("alice/data/src/.keep", ""),
            ("alice/data/src/deep/b.txt", "B"),
        ] {
            session.store.put_bytes(key, data.into()).await.unwrap();
        }

        let response = copy_or_move(&session, "/src", &destination("/dst"), false)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        assert_eq!(read(&connector, "alice/data/dst/a.txt"), b"A");
        assert_eq!(read(&connector, "alice/data/dst/deep/b.txt"), b"B");
        assert!(connector.store.exists("alice/data/dst/.keep").unwrap());
        assert!(connector.store.exists("alice/data/src/a.txt").unwrap());
    }

    #[tokio::test]
    async fn test_move_removes_source() {
        let connector = CountingConnector::default();
        let session = session_for(&connector);
        session
            .store
            .put_bytes("alice/data/a.bin", vec![1u8; COPY_CHUNK_SIZE + 17].into())
            .await
            .unwrap();

        copy_or_move(
            &session,
            "/a.bin",
            &destination("http://localhost:7860/moved/b.bin"),
            true,
        )
        .await
        .unwrap();

        assert!(!connector.store.exists("alice/data/a.bin").unwrap());
        assert_eq!(
            read(&connector, "alice/data/moved/b.bin"),
            vec![1u8; COPY_CHUNK_SIZE + 17]
        );
        // the new parent got its marker
        assert!(connector.store.exists("alice/data/moved/.keep").unwrap());
    }

    #[tokio::test]
    async fn test_overlap_rejected_before_store_calls() {
        let connector = CountingConnector::default();
        let session = session_for(&connector);

        for dest in ["/d", "/d/inner"] {
            let err = copy_or_move(&session, "/d", &destination(dest), false)
                .await
                .unwrap_err();
            assert!(matches!(err, DavError::DestinationOverlap));
        }
        assert_eq!(connector.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_destination() {
        let connector = CountingConnector::default();
        let session = session_for(&connector);
        let err = copy_or_move(&session, "/a", &HeaderMap::new(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, DavError::MissingDestination));
        assert_eq!(connector.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let connector = CountingConnector::default();
        let session = session_for(&connector);
        let err = copy_or_move(&session, "/ghost", &destination("/b"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DavError::NotFound));
    }
}
