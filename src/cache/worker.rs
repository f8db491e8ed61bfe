//! Fetch worker.
//!
//! A worker performs exactly one upstream GET for one cache key, publishes the
//! buffered response to the store and reports exactly one [`FetchOutcome`]
//! back to the coordinator, whatever happens in between.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use bytes::Bytes;
use futures::FutureExt;
use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::config::ProxyConfig;
use super::keys::{CacheKey, request_target};
use super::store::{CacheStore, CachedResponse, is_hop_by_hop};

/// Failure of a fetch, fanned out verbatim to every waiter of the key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("failed to build upstream request: {0}")]
    Request(String),
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("failed to read upstream response body: {0}")]
    Body(String),
    #[error("fetch worker panicked")]
    WorkerPanicked,
    #[error("proxy is shutting down")]
    Shutdown,
    #[error("cache coordinator is not running")]
    Unavailable,
}

pub type FetchResult = Result<Arc<CachedResponse>, FetchError>;

/// Completion report of one worker.
#[derive(Debug)]
pub struct FetchOutcome {
    pub key: CacheKey,
    pub result: FetchResult,
}

/// What the worker needs from the inbound request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    target: String,
    headers: HeaderMap,
}

impl FetchRequest {
    pub fn new(uri: &Uri, headers: &HeaderMap) -> Self {
        Self {
            target: request_target(uri).to_string(),
            headers: headers.clone(),
        }
    }

    /// Path and query of the inbound request.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Headers forwarded upstream: first value of each, without `host`,
    /// `content-length` and hop-by-hop headers.
    pub fn outbound_headers(&self) -> HeaderMap {
        let mut outbound = HeaderMap::with_capacity(self.headers.keys_len());
        for name in self.headers.keys() {
            if name == header::HOST || name == header::CONTENT_LENGTH || is_hop_by_hop(name) {
                continue;
            }
            if let Some(value) = self.headers.get(name) {
                outbound.insert(name.clone(), value.clone());
            }
        }
        outbound
    }
}

/// Buffered upstream response as returned by an [`Upstream`].
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Transport used by workers to reach the backend.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Issue a GET and buffer the complete response.
    async fn get(&self, url: &str, headers: HeaderMap) -> Result<UpstreamResponse, FetchError>;
}

/// Launches fetch workers.
#[derive(Clone)]
pub struct FetchWorker {
    upstream: Arc<dyn Upstream>,
    store: Arc<CacheStore>,
}

impl FetchWorker {
    pub fn new(upstream: Arc<dyn Upstream>, store: Arc<CacheStore>) -> Self {
        Self { upstream, store }
    }

    /// Run one fetch on its own task. Exactly one outcome is sent on
    /// `outcomes`, also when the fetch panics.
    pub fn launch(
        &self,
        key: CacheKey,
        request: FetchRequest,
        config: Arc<ProxyConfig>,
        outcomes: mpsc::UnboundedSender<FetchOutcome>,
    ) {
        let worker = self.clone();
        tokio::spawn(async move {
            let fetch = worker.fetch(&key, &request, &config);
            let result = match AssertUnwindSafe(fetch).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    error!(cache_id = %key, url = %request.target(), "fetch worker panicked");
                    Err(FetchError::WorkerPanicked)
                }
            };

            if outcomes.send(FetchOutcome { key, result }).is_err() {
                debug!("coordinator stopped before the fetch outcome arrived");
            }
        });
    }

    async fn fetch(
        &self,
        key: &CacheKey,
        request: &FetchRequest,
        config: &ProxyConfig,
    ) -> FetchResult {
        let url = config.upstream_url(request.target());
        counter!("contentproxy_upstream_request_total").increment(1);
        debug!(cache_id = %key, url = %url, "fetching from upstream");

        let response = self.upstream.get(&url, request.outbound_headers()).await?;
        let cached = CachedResponse::new(response.status, &response.headers, response.body);
        Ok(self.store.put(key.clone(), cached))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::http::HeaderValue;

    use super::*;

    #[derive(Default)]
    struct RecordingUpstream {
        calls: Mutex<Vec<(String, HeaderMap)>>,
    }

    #[async_trait]
    impl Upstream for RecordingUpstream {
        async fn get(
            &self,
            url: &str,
            headers: HeaderMap,
        ) -> Result<UpstreamResponse, FetchError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((url.to_string(), headers));
            if url.ends_with("/broken") {
                return Err(FetchError::Transport("connection refused".to_string()));
            }
            if url.ends_with("/panic") {
                panic!("upstream exploded");
            }
            Ok(UpstreamResponse {
                status: StatusCode::OK,
                headers: HeaderMap::from_iter([(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                )]),
                body: Bytes::from_static(b"{\"items\":[]}"),
            })
        }
    }

    fn request(path: &str, headers: HeaderMap) -> (CacheKey, FetchRequest) {
        let uri: Uri = path.parse().expect("valid uri");
        (
            CacheKey::derive(&uri, &headers),
            FetchRequest::new(&uri, &headers),
        )
    }

    fn config() -> Arc<ProxyConfig> {
        Arc::new(ProxyConfig::new("http://upstream.test", "/cf", Vec::new()))
    }

    #[test]
    fn outbound_headers_copy_first_values_only() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.append(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.append(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer token"),
        );

        let (_, request) = request("/cf/entries", headers);
        let outbound = request.outbound_headers();

        assert!(!outbound.contains_key(header::HOST));
        assert!(!outbound.contains_key(header::CONNECTION));
        assert_eq!(outbound.get_all(header::ACCEPT).iter().count(), 1);
        assert_eq!(
            outbound.get(header::ACCEPT),
            Some(&HeaderValue::from_static("application/json"))
        );
        assert_eq!(
            outbound.get(header::AUTHORIZATION),
            Some(&HeaderValue::from_static("Bearer token"))
        );
    }

    #[tokio::test]
    async fn successful_fetch_publishes_then_reports() {
        let upstream = Arc::new(RecordingUpstream::default());
        let store = Arc::new(CacheStore::new());
        let worker = FetchWorker::new(upstream.clone(), store.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (key, request) = request("/cf/entries?limit=1", HeaderMap::new());
        worker.launch(key.clone(), request, config(), tx);

        let outcome = rx.recv().await.expect("one outcome");
        assert_eq!(outcome.key, key);
        let published = outcome.result.expect("successful fetch");
        let stored = store.get(&key).expect("entry published before report");
        assert!(Arc::ptr_eq(&published, &stored));

        let calls = upstream.calls.lock().expect("calls lock");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "http://upstream.test/entries?limit=1");
    }

    #[tokio::test]
    async fn failed_fetch_reports_without_writing() {
        let store = Arc::new(CacheStore::new());
        let worker = FetchWorker::new(Arc::new(RecordingUpstream::default()), store.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (key, request) = request("/cf/broken", HeaderMap::new());
        worker.launch(key.clone(), request, config(), tx);

        let outcome = rx.recv().await.expect("one outcome");
        assert_eq!(
            outcome.result.expect_err("transport failure"),
            FetchError::Transport("connection refused".to_string())
        );
        assert!(store.get(&key).is_none());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn panicking_fetch_still_reports_once() {
        let store = Arc::new(CacheStore::new());
        let worker = FetchWorker::new(Arc::new(RecordingUpstream::default()), store.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (key, request) = request("/cf/panic", HeaderMap::new());
        worker.launch(key, request, config(), tx);

        let outcome = rx.recv().await.expect("one outcome");
        assert_eq!(
            outcome.result.expect_err("panic is reported"),
            FetchError::WorkerPanicked
        );
        assert!(rx.recv().await.is_none());
        assert!(store.is_empty());
    }
}
