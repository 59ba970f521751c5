//! WebDAV error taxonomy.
//!
//! Every failure a request can hit is classified into one [`DavError`]
//! variant, and each variant maps to exactly one HTTP status.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(DavError::NotFound)`.
//!
//! Responses never carry error detail: the body is always empty and only
//! the headers the protocol requires (the Basic challenge on 401, the
//! unsatisfied length on 416) are attached.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::storage::backend::StoreError;

/// Realm advertised in the `WWW-Authenticate` challenge.
pub const AUTH_REALM: &str = "hubdav";

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes)
}

/// Every way a WebDAV request can fail.
#[derive(Debug, Error)]
pub enum DavError {
    /// The request path (or destination path) is malformed or tries to
    /// escape the caller's collection.
    #[error("invalid resource path")]
    InvalidPath,

    /// MOVE/COPY without a usable `Destination` header.
    #[error("missing Destination header")]
    MissingDestination,

    /// MOVE/COPY whose destination is the source or lies beneath it.
    #[error("destination overlaps the source")]
    DestinationOverlap,

    /// No Basic `Authorization` header.
    #[error("authentication required")]
    MissingAuth,

    /// An `Authorization` header that cannot be decoded into credentials.
    #[error("malformed credentials")]
    MalformedAuth,

    /// The addressed resource does not exist.
    #[error("resource not found")]
    NotFound,

    /// MKCOL on a resource that already exists.
    #[error("resource already exists")]
    AlreadyExists,

    /// The HTTP method is not part of the supported WebDAV surface.
    #[error("method not supported")]
    UnsupportedMethod,

    /// DELETE or MOVE aimed at the collection root itself.
    #[error("the collection root cannot be removed")]
    RootImmutable,

    /// A Range whose start lies at or beyond the end of the resource.
    #[error("requested range not satisfiable")]
    RangeNotSatisfiable { size: u64 },

    /// Remote store, XML assembly, or body streaming failure.
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl DavError {
    /// Short, stable name of the variant for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            DavError::InvalidPath => "InvalidPath",
            DavError::MissingDestination => "MissingDestination",
            DavError::DestinationOverlap => "DestinationOverlap",
            DavError::MissingAuth => "MissingAuth",
            DavError::MalformedAuth => "MalformedAuth",
            DavError::NotFound => "NotFound",
            DavError::AlreadyExists => "AlreadyExists",
            DavError::UnsupportedMethod => "UnsupportedMethod",
            DavError::RootImmutable => "RootImmutable",
            DavError::RangeNotSatisfiable { .. } => "RangeNotSatisfiable",
            DavError::Internal(_) => "Internal",
        }
    }

    /// Return the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::MissingDestination => StatusCode::BAD_REQUEST,
            DavError::DestinationOverlap => StatusCode::BAD_REQUEST,
            DavError::MissingAuth => StatusCode::UNAUTHORIZED,
            DavError::MalformedAuth => StatusCode::UNAUTHORIZED,
            DavError::NotFound => StatusCode::NOT_FOUND,
            DavError::AlreadyExists => StatusCode::METHOD_NOT_ALLOWED,
            DavError::UnsupportedMethod => StatusCode::METHOD_NOT_ALLOWED,
            DavError::RootImmutable => StatusCode::METHOD_NOT_ALLOWED,
            DavError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            DavError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for DavError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => DavError::NotFound,
            StoreError::Backend(e) => DavError::Internal(e),
        }
    }
}

impl From<quick_xml::Error> for DavError {
    fn from(err: quick_xml::Error) -> Self {
        DavError::Internal(err.into())
    }
}

impl From<std::io::Error> for DavError {
    fn from(err: std::io::Error) -> Self {
        DavError::Internal(err.into())
    }
}

impl From<axum::Error> for DavError {
    fn from(err: axum::Error) -> Self {
        DavError::Internal(anyhow::Error::new(err))
    }
}

impl IntoResponse for DavError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::debug!(kind = self.kind(), status = status.as_u16(), "request failed");

        let mut response = status.into_response();
        let headers = response.headers_mut();
        match self {
            DavError::MissingAuth | DavError::MalformedAuth => {
                if let Ok(value) = HeaderValue::from_str(&format!("Basic realm=\"{AUTH_REALM}\""))
                {
                    headers.insert(header::WWW_AUTHENTICATE, value);
                }
            }
            DavError::RangeNotSatisfiable { size } => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    headers.insert(header::CONTENT_RANGE, value);
                }
            }
            _ => {}
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(DavError::InvalidPath.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(DavError::MissingAuth.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(DavError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            DavError::AlreadyExists.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            DavError::RangeNotSatisfiable { size: 3 }.status_code(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(
            DavError::Internal(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_error_classification() {
        let not_found: DavError = StoreError::NotFound("a/b/c".into()).into();
        assert!(matches!(not_found, DavError::NotFound));

        let backend: DavError = StoreError::Backend(anyhow::anyhow!("timeout")).into();
        assert!(matches!(backend, DavError::Internal(_)));
    }

    #[test]
    fn test_unauthorized_carries_challenge() {
        let response = DavError::MissingAuth.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            &format!("Basic realm=\"{AUTH_REALM}\"")
        );
    }

    #[test]
    fn test_range_error_reports_size() {
        let response = DavError::RangeNotSatisfiable { size: 42 }.into_response();
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */42"
        );
    }

    #[test]
    fn test_request_id_is_hex() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
