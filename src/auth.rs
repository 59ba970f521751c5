//! HTTP Basic credential parsing.
//!
//! The Basic-auth username selects the collection a request operates on
//! (`<owner>/<collection>`, collection optional) and the password is an
//! opaque access token handed to the remote store.  The gateway never
//! checks the token itself; the store accepts or rejects it.

use std::fmt;

use base64::Engine;

use crate::errors::DavError;

/// Credentials decoded from one request's `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub owner: String,
    pub collection: String,
    pub token: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("owner", &self.owner)
            .field("collection", &self.collection)
            .field("token", &"<redacted>")
            .finish()
    }
}

// -- Header parsing ------------------------------------------------------------

/// Parse an `Authorization` header value.
///
/// A missing header, or one using another scheme, is [`DavError::MissingAuth`];
/// a `Basic` header that does not decode to `user:token` with a usable
/// owner and collection is [`DavError::MalformedAuth`].
pub fn parse_basic_auth(
    header: Option<&str>,
    default_collection: &str,
) -> Result<BasicCredentials, DavError> {
    let header = header.map(str::trim).ok_or(DavError::MissingAuth)?;
    let (scheme, payload) = header.split_once(' ').ok_or(DavError::MissingAuth)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(DavError::MissingAuth);
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|_| DavError::MalformedAuth)?;
    let decoded = String::from_utf8(decoded).map_err(|_| DavError::MalformedAuth)?;
    let (username, token) = decoded.split_once(':').ok_or(DavError::MalformedAuth)?;

    let (owner, collection) = match username.split_once('/') {
        Some((owner, "")) => (owner, default_collection),
        Some((owner, collection)) => (owner, collection),
        None => (username, default_collection),
    };
    if !is_valid_name(owner) || !is_valid_name(collection) {
        return Err(DavError::MalformedAuth);
    }

    Ok(BasicCredentials {
        owner: owner.to_string(),
        collection: collection.to_string(),
        token: token.to_string(),
    })
}

/// Owner and collection names become key segments, so each must be one
/// plain segment.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
