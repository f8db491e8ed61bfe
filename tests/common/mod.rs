#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use contentproxy::{
    application::proxy::ProxyService,
    cache::{ConfigHandle, ProxyConfig},
    infra::{
        build_proxy_service,
        http::{HttpState, MetricsEndpoint, build_router},
        upstream::build_client,
    },
};
use http_body_util::BodyExt;
use tokio::net::TcpListener;

/// Paths under this prefix answer only after a long pause.
pub const SLOW_PREFIX: &str = "/slow";
const FAST_DELAY: Duration = Duration::from_millis(50);
const SLOW_DELAY: Duration = Duration::from_millis(400);

/// Counts every request a local server received, per path and query.
#[derive(Clone, Default)]
pub struct Hits {
    inner: Arc<Mutex<HashMap<String, usize>>>,
    seen_headers: Arc<Mutex<Vec<HeaderMap>>>,
}

impl Hits {
    fn record(&self, target: &str, headers: &HeaderMap) {
        *self
            .inner
            .lock()
            .expect("hits lock")
            .entry(target.to_string())
            .or_default() += 1;
        self.seen_headers
            .lock()
            .expect("headers lock")
            .push(headers.clone());
    }

    pub fn of(&self, target: &str) -> usize {
        self.inner
            .lock()
            .expect("hits lock")
            .get(target)
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.inner.lock().expect("hits lock").values().sum()
    }

    pub fn last_headers(&self) -> Option<HeaderMap> {
        self.seen_headers.lock().expect("headers lock").last().cloned()
    }

    /// Poll until `target` was hit `expected` times or two seconds passed.
    pub async fn wait_for(&self, target: &str, expected: usize) -> usize {
        for _ in 0..200 {
            if self.of(target) >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.of(target)
    }
}

fn target_of(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|target| target.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

async fn upstream_handler(State(hits): State<Hits>, uri: Uri, headers: HeaderMap) -> Response {
    let target = target_of(&uri);
    hits.record(&target, &headers);

    if uri.path().starts_with(SLOW_PREFIX) {
        tokio::time::sleep(SLOW_DELAY).await;
    } else {
        tokio::time::sleep(FAST_DELAY).await;
    }

    let language = headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    let body = format!("upstream {target} lang={language}");

    let status = if uri.path() == "/missing" {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };
    (
        status,
        [
            (header::CONTENT_TYPE, "text/plain"),
            (header::CACHE_CONTROL, "max-age=60"),
        ],
        body,
    )
        .into_response()
}

async fn webhook_handler(State(hits): State<Hits>, uri: Uri, headers: HeaderMap) -> StatusCode {
    hits.record(&target_of(&uri), &headers);
    StatusCode::NO_CONTENT
}

async fn spawn_server(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });
    format!("http://{addr}")
}

/// Local stand-in for the content API.
pub async fn spawn_upstream() -> (String, Hits) {
    let hits = Hits::default();
    let router = Router::new()
        .fallback(upstream_handler)
        .with_state(hits.clone());
    (spawn_server(router).await, hits)
}

/// Local webhook listener.
pub async fn spawn_webhooks() -> (String, Hits) {
    let hits = Hits::default();
    let router = Router::new()
        .fallback(webhook_handler)
        .with_state(hits.clone());
    (spawn_server(router).await, hits)
}

/// A base URL nothing listens on.
pub async fn unreachable_base() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}

pub struct TestProxy {
    pub router: Router,
    pub proxy: ProxyService,
    pub config: ConfigHandle,
}

pub fn build_proxy(backend: &str, prefix: &str, webhooks: Vec<String>) -> TestProxy {
    build_proxy_with_metrics(backend, prefix, webhooks, None)
}

pub fn build_proxy_with_metrics(
    backend: &str,
    prefix: &str,
    webhooks: Vec<String>,
    metrics: Option<MetricsEndpoint>,
) -> TestProxy {
    let config = ConfigHandle::new(ProxyConfig::new(backend, prefix, webhooks));
    let client = build_client(Duration::from_secs(5)).expect("http client");
    let proxy = build_proxy_service(client, config.clone());
    let router = build_router(HttpState {
        proxy: proxy.clone(),
        metrics,
    });
    TestProxy {
        router,
        proxy,
        config,
    }
}

pub fn get(uri: &str) -> Request<Body> {
    request(Method::GET, uri, &[])
}

pub fn request(method: Method, uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).expect("request should build")
}

pub async fn body_bytes(response: Response) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes()
}

pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).expect("utf8 body")
}
