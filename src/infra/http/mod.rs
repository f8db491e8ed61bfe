//! HTTP front door.
//!
//! Every request lands on a single fallback handler: control paths are
//! recognised first, everything else is proxied through the cache. The
//! Prometheus scrape path, when enabled, is the only route ahead of it.

mod metrics;
mod middleware;
mod proxy;

use axum::{Router, middleware as layers, routing::get};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::application::proxy::ProxyService;

pub use middleware::RequestContext;

#[derive(Clone)]
pub struct HttpState {
    pub proxy: ProxyService,
    pub metrics: Option<MetricsEndpoint>,
}

/// Where the scrape route is mounted and the recorder it renders.
#[derive(Clone)]
pub struct MetricsEndpoint {
    pub path: String,
    pub handle: PrometheusHandle,
}

pub fn build_router(state: HttpState) -> Router {
    let mut router: Router<HttpState> = Router::new();
    if let Some(endpoint) = state.metrics.as_ref() {
        router = router.route(&endpoint.path, get(metrics::render));
    }

    router
        .fallback(proxy::dispatch)
        .with_state(state)
        .layer(layers::from_fn(middleware::log_responses))
        .layer(layers::from_fn(middleware::set_request_context))
}
