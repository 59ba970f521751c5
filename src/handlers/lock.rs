//! LOCK, UNLOCK and PROPPATCH.
//!
//! Locks are granted but never enforced: clients such as the macOS and
//! Windows mounters refuse to write without one, so every LOCK succeeds
//! with a fresh token and nothing is remembered.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use super::Session;
use crate::errors::DavError;
use crate::xml::{render_lock_discovery, XML_CONTENT_TYPE};

/// `LOCK` -- Grant an exclusive write lock that nothing will check.
pub fn lock(session: &Session) -> Result<Response, DavError> {
    let token = format!("opaquelocktoken:{}", Uuid::new_v4());
    let body = render_lock_discovery(&token, &session.owner)?;

    let lock_token = HeaderValue::from_str(&format!("<{token}>"))
        .map_err(|e| DavError::Internal(anyhow::anyhow!("invalid lock token header: {e}")))?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE)),
            (header::HeaderName::from_static("lock-token"), lock_token),
        ],
        body,
    )
        .into_response())
}

/// `UNLOCK` -- Always succeeds.
pub fn unlock() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// `PROPPATCH` -- Properties are not writable; acknowledge and move on.
pub fn proppatch() -> Response {
    StatusCode::OK.into_response()
}
