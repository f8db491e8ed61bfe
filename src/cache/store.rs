//! Cache store.
//!
//! Entries live in a sharded map so that writers for different keys do not
//! contend. The map itself sits behind a generation lock: `get` and `put`
//! share it, `clear` takes it exclusively and swaps in an empty map, which
//! makes a flush atomic with respect to every concurrent reader and writer.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, StatusCode},
    response::Response,
};
use bytes::Bytes;
use dashmap::DashMap;
use metrics::gauge;
use tracing::warn;

use super::keys::CacheKey;

const SOURCE: &str = "cache::store";

/// Headers that describe a single connection rather than the resource.
pub(crate) fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "transfer-encoding"
            | "te"
            | "trailer"
            | "upgrade"
    )
}

/// A fully buffered upstream response. Immutable once published.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl CachedResponse {
    /// Capture an upstream response, dropping connection-scoped headers.
    pub fn new(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        let mut stored = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            if !is_hop_by_hop(name) {
                stored.append(name.clone(), value.clone());
            }
        }

        Self {
            status,
            headers: stored,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Replay the stored status, headers and body.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

type Entries = DashMap<CacheKey, Arc<CachedResponse>>;

/// Concurrent mapping of cache key to published response.
pub struct CacheStore {
    generation: RwLock<Arc<Entries>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            generation: RwLock::new(Arc::new(Entries::new())),
        }
    }

    fn shared(&self, op: &'static str) -> RwLockReadGuard<'_, Arc<Entries>> {
        self.generation.read().unwrap_or_else(|poisoned| {
            warn!(
                op,
                target_module = SOURCE,
                result = "poisoned_recovered",
                "Recovered from poisoned cache store lock"
            );
            PoisonError::into_inner(poisoned)
        })
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<CachedResponse>> {
        self.shared("get")
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Insert or replace the entry for `key`, returning the published value.
    pub fn put(&self, key: CacheKey, response: CachedResponse) -> Arc<CachedResponse> {
        let published = Arc::new(response);
        let entries = self.shared("put");
        entries.insert(key, Arc::clone(&published));
        gauge!("contentproxy_cache_entries").set(entries.len() as f64);
        published
    }

    /// Drop every entry at once. Returns how many entries were discarded.
    pub fn clear(&self) -> usize {
        let mut guard = self.generation.write().unwrap_or_else(|poisoned| {
            warn!(
                op = "clear",
                target_module = SOURCE,
                result = "poisoned_recovered",
                "Recovered from poisoned cache store lock"
            );
            PoisonError::into_inner(poisoned)
        });
        let previous = std::mem::replace(&mut *guard, Arc::new(Entries::new()));
        drop(guard);

        gauge!("contentproxy_cache_entries").set(0.0);
        previous.len()
    }

    pub fn len(&self) -> usize {
        self.shared("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}
