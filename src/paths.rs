//! Request path to remote key mapping.
//!
//! Every key a session touches lives under its collection root
//! `<owner>/<collection>`.  [`PathResolver`] is the only way a request
//! path or `Destination` header becomes a key, and it refuses anything
//! that could climb out of the root.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::errors::DavError;
use crate::storage::backend::join_key;

/// Bytes left unescaped in one path segment (RFC 3986 unreserved).
const SEGMENT_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Same as [`SEGMENT_SAFE`] with `/` kept as a separator.
const PATH_SAFE: &AsciiSet = &SEGMENT_SAFE.remove(b'/');

/// Percent-encode a slash-delimited path, keeping the slashes.
pub fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_SAFE).to_string()
}

/// Percent-encode a single segment, slashes included.
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT_SAFE).to_string()
}

/// Maps client paths onto keys beneath one collection root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: String,
}

impl PathResolver {
    pub fn new(owner: &str, collection: &str) -> Self {
        Self {
            root: format!("{owner}/{collection}"),
        }
    }

    /// The collection root key.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn is_root(&self, key: &str) -> bool {
        key == self.root
    }

    /// Resolve a raw (still percent-encoded) request path to a key.
    ///
    /// An empty path is the collection root.
    pub fn resolve(&self, raw: &str) -> Result<String, DavError> {
        let relative = clean(raw)?;
        if relative.is_empty() {
            Ok(self.root.clone())
        } else {
            Ok(join_key(&self.root, &relative))
        }
    }

    /// Resolve a `Destination` header value, absolute URL or bare path.
    pub fn destination(&self, header: Option<&str>) -> Result<String, DavError> {
        let value = header.map(str::trim).unwrap_or_default();
        if value.is_empty() {
            return Err(DavError::MissingDestination);
        }
        let path = if value.contains("://") {
            let uri: http::Uri = value.parse().map_err(|_| DavError::InvalidPath)?;
            uri.path().to_string()
        } else {
            value
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string()
        };
        self.resolve(&path)
    }
}

/// Path of `key` relative to `root`, without slashes at either end.
/// Keys outside the root come back unchanged.
pub fn relative_key<'a>(root: &str, key: &'a str) -> &'a str {
    match key.strip_prefix(root) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_matches('/'),
        _ => key,
    }
}

/// Decode and validate a raw path, returning it without outer slashes.
fn clean(raw: &str) -> Result<String, DavError> {
    // Reject before decoding too, so `%2e%2e` and `..` fail alike.
    if has_unsafe_segment(raw) {
        return Err(DavError::InvalidPath);
    }
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| DavError::InvalidPath)?;
    let trimmed = decoded.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if has_unsafe_segment(trimmed)
        || trimmed.split('/').any(str::is_empty)
        || trimmed.contains(['\\', '\0'])
    {
        return Err(DavError::InvalidPath);
    }
    Ok(trimmed.to_string())
}

fn has_unsafe_segment(path: &str) -> bool {
    path.split('/').any(|segment| segment == ".." || segment == ".")
}
