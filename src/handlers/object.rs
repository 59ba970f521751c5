//! File-level WebDAV handlers: GET, HEAD, PUT and DELETE.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tracing::debug;

use super::Session;
use crate::errors::DavError;
use crate::metrics::record_bytes_received;
use crate::paths::encode_segment;
use crate::storage::backend::{base_name, http_date_or_now, parent_key, StoreError};
use crate::storage::stream::RangeStream;
use crate::xml::content_type_for;

// -- Range parsing ------------------------------------------------------------

/// A parsed single byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteRange {
    /// bytes=start-end (inclusive both ends)
    StartEnd(u64, u64),
    /// bytes=start-  (from start to end of file)
    StartOpen(u64),
    /// bytes=-N  (last N bytes)
    Suffix(u64),
}

/// Parse a Range header value like "bytes=0-4", "bytes=5-", "bytes=-3".
/// Returns None if the header is not a valid bytes range.
fn parse_range_header(range_str: &str) -> Option<ByteRange> {
    let spec = range_str.trim().strip_prefix("bytes=")?;

    // Only support a single range (no multi-range).
    if spec.contains(',') {
        return None;
    }

    if let Some(suffix) = spec.strip_prefix('-') {
        // bytes=-N (suffix range)
        let n: u64 = suffix.parse().ok()?;
        if n == 0 {
            return None;
        }
        Some(ByteRange::Suffix(n))
    } else if let Some(stripped) = spec.strip_suffix('-') {
        // bytes=N- (open-ended range)
        let start: u64 = stripped.parse().ok()?;
        Some(ByteRange::StartOpen(start))
    } else if let Some((start_s, end_s)) = spec.split_once('-') {
        // bytes=start-end
        let start: u64 = start_s.parse().ok()?;
        let end: u64 = end_s.parse().ok()?;
        if start > end {
            return None;
        }
        Some(ByteRange::StartEnd(start, end))
    } else {
        None
    }
}

/// Resolve a ByteRange against a total content length.
/// Returns (start, end) where both are inclusive, or None if unsatisfiable.
fn resolve_range(range: &ByteRange, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    match *range {
        ByteRange::StartEnd(start, end) => {
            if start >= total {
                return None;
            }
            Some((start, end.min(total - 1)))
        }
        ByteRange::StartOpen(start) => {
            if start >= total {
                return None;
            }
            Some((start, total - 1))
        }
        ByteRange::Suffix(n) => Some((total.saturating_sub(n), total - 1)),
    }
}

fn header_value(value: &str) -> Result<HeaderValue, DavError> {
    HeaderValue::from_str(value)
        .map_err(|e| DavError::Internal(anyhow::anyhow!("invalid header value: {e}")))
}

// -- Handlers -----------------------------------------------------------------

/// `GET` / `HEAD` -- Download a file, whole or one byte range.
///
/// HEAD reports exactly the headers GET would but never opens a read.
pub async fn get_object(
    session: &Session,
    raw_path: &str,
    headers: &HeaderMap,
    head_only: bool,
) -> Result<Response, DavError> {
    let key = session.read_target(raw_path)?;
    let entry = session.store.stat(&key).await?;
    if entry.is_dir() {
        return Err(DavError::NotFound);
    }
    let total = entry.size;

    // A malformed Range header is ignored and the whole file is served.
    let window = match headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header)
    {
        Some(range) => Some(
            resolve_range(&range, total).ok_or(DavError::RangeNotSatisfiable { size: total })?,
        ),
        None => None,
    };

    let (status, start, length) = match window {
        Some((start, end)) => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
        None => (StatusCode::OK, 0, total),
    };

    let body = if head_only || length == 0 {
        Body::empty()
    } else {
        let stream = RangeStream::open(&session.store, &key, start, Some(length)).await?;
        Body::from_stream(stream.into_stream())
    };

    let mut response = (status, body).into_response();
    let hdrs = response.headers_mut();
    hdrs.insert(header::CONTENT_TYPE, header_value(&content_type_for(&key))?);
    hdrs.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    hdrs.insert(
        header::LAST_MODIFIED,
        header_value(&http_date_or_now(entry.last_modified.as_ref()))?,
    );
    hdrs.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    hdrs.insert(
        header::CONTENT_DISPOSITION,
        header_value(&format!(
            "attachment; filename*=UTF-8''{}",
            encode_segment(base_name(&key))
        ))?,
    );
    if let Some((start, end)) = window {
        hdrs.insert(
            header::CONTENT_RANGE,
            header_value(&format!("bytes {start}-{end}/{total}"))?,
        );
    }

    Ok(response)
}

/// `PUT` -- Stream the request body into a file.
///
/// The body is forwarded one chunk at a time; the next chunk is not
/// pulled until the previous one has been written.  If the body breaks
/// off, whatever arrived is still published and the request fails; there
/// is no rollback.
pub async fn put_object(session: &Session, raw_path: &str, body: Body) -> Result<Response, DavError> {
    let key = session.write_target(raw_path)?;
    if session.resolver.is_root(&key) {
        return Err(DavError::RootImmutable);
    }
    match session.store.stat(&key).await {
        Ok(existing) if existing.is_dir() => return Err(DavError::AlreadyExists),
        Ok(_) | Err(StoreError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    session.markers().ensure(&key).await;

    let mut writer = session.store.open_write(&key).await?;
    let mut stream = body.into_data_stream();
    let mut received: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(key = %key, bytes = received, error = %e, "upload body broke off");
                if let Err(publish) = session.store.finish(writer).await {
                    debug!(key = %key, error = %publish, "partial upload not published");
                }
                session.store.invalidate(parent_key(&key)).await;
                return Err(e.into());
            }
        };
        if chunk.is_empty() {
            continue;
        }
        received += chunk.len() as u64;
        record_bytes_received(chunk.len() as u64);
        writer = session.store.write_chunk(writer, chunk).await?;
    }
    session.store.finish(writer).await?;
    session.store.invalidate(parent_key(&key)).await;

    debug!(key = %key, bytes = received, "upload stored");
    Ok(StatusCode::CREATED.into_response())
}

/// `DELETE` -- Remove a file, or a directory with everything beneath it.
pub async fn delete_object(session: &Session, raw_path: &str) -> Result<Response, DavError> {
    let key = session.removable_target(raw_path)?;
    if !session.store.exists(&key).await? {
        return Err(DavError::NotFound);
    }
    session.store.delete(&key, true).await?;
    session.store.invalidate(parent_key(&key)).await;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// -- Unit tests ---------------------------------------------------------------
