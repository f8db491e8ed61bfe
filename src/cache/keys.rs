//! Cache key derivation.
//!
//! A key fingerprints the request target (path and query, verbatim) together
//! with every header the caller sent except the correlation id. Header names
//! are visited in sorted order so that clients and intermediaries reordering
//! headers never split one resource into several entries.

use std::fmt;

use axum::http::{HeaderMap, Uri};
use sha2::{Digest, Sha256};

/// Correlation header stamped on every request. Its value is unique per
/// physical request, so it never participates in the key.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// Header names and values can never contain these bytes, nor can a request target.
const NAME_TERMINATOR: &[u8] = b":";
const VALUE_SEPARATOR: &[u8] = b"\0";
const ENTRY_TERMINATOR: &[u8] = b"\n";

/// Identity of a cacheable resource: a hex-encoded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a request from its target and header set.
    pub fn derive(uri: &Uri, headers: &HeaderMap) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(request_target(uri).as_bytes());
        hasher.update(ENTRY_TERMINATOR);

        let mut names: Vec<&str> = headers
            .keys()
            .map(|name| name.as_str())
            .filter(|name| !name.eq_ignore_ascii_case(REQUEST_ID_HEADER))
            .collect();
        names.sort_unstable();

        for name in names {
            hasher.update(name.as_bytes());
            hasher.update(NAME_TERMINATOR);
            for (index, value) in headers.get_all(name).iter().enumerate() {
                if index > 0 {
                    hasher.update(VALUE_SEPARATOR);
                }
                hasher.update(value.as_bytes());
            }
            hasher.update(ENTRY_TERMINATOR);
        }

        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path plus query exactly as the client sent them.
pub fn request_target(uri: &Uri) -> &str {
    uri.path_and_query()
        .map(|target| target.as_str())
        .unwrap_or_else(|| uri.path())
}
