//! Collection-level WebDAV handlers: PROPFIND and MKCOL.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::Session;
use crate::errors::DavError;
use crate::storage::backend::parent_key;
use crate::storage::markers::without_markers;
use crate::xml::{render_multistatus, XML_CONTENT_TYPE};

/// Whether a `Depth` header asks for the target only.
fn target_only(headers: &HeaderMap) -> bool {
    headers
        .get("depth")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|depth| depth.trim() == "0")
}

/// `PROPFIND` -- Describe a resource and, for directories, its children.
///
/// `Depth: 0` reports the target alone; any other depth (or none) adds
/// the immediate children.  If the children cannot be listed the target
/// is still reported on its own.
pub async fn propfind(
    session: &Session,
    raw_path: &str,
    headers: &HeaderMap,
) -> Result<Response, DavError> {
    let key = session.read_target(raw_path)?;
    let target = session.store.stat(&key).await?;

    let children = if target.is_dir() && !target_only(headers) {
        match session.store.list(&key, false).await {
            Ok(entries) => without_markers(entries),
            Err(e) => {
                debug!(key = %key, error = %e, "listing failed, reporting target only");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let body = render_multistatus(session.root(), &target, &children)?;
    Ok((
        StatusCode::MULTI_STATUS,
        [(header::CONTENT_TYPE, XML_CONTENT_TYPE)],
        body,
    )
        .into_response())
}

/// `MKCOL` -- Create a directory by placing its marker.
pub async fn mkcol(session: &Session, raw_path: &str) -> Result<Response, DavError> {
    let key = session.write_target(raw_path)?;
    if session.store.exists(&key).await? {
        return Err(DavError::AlreadyExists);
    }

    let markers = session.markers();
    markers.ensure(&key).await;
    markers.create_in(&key).await?;
    session.store.invalidate(parent_key(&key)).await;

    Ok(StatusCode::CREATED.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_depth_header() {
        let mut headers = HeaderMap::new();
        assert!(!target_only(&headers));

        headers.insert("depth", HeaderValue::from_static("0"));
        assert!(target_only(&headers));

        headers.insert("depth", HeaderValue::from_static("1"));
        assert!(!target_only(&headers));

        headers.insert("depth", HeaderValue::from_static("infinity"));
        assert!(!target_only(&headers));
    }
}
