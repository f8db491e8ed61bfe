//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod http;
pub mod metrics;
pub mod telemetry;
pub mod upstream;
pub mod webhooks;

use std::sync::Arc;

use reqwest::Client;

use crate::{
    application::proxy::ProxyService,
    cache::{CacheStore, ConfigHandle, Coordinator, FetchWorker},
};

use self::{upstream::HttpUpstream, webhooks::WebhookNotifier};

/// Wire store, coordinator, workers and notifier around one HTTP client.
/// Spawns the coordinator loop, so it must run inside a Tokio runtime.
pub fn build_proxy_service(client: Client, config: ConfigHandle) -> ProxyService {
    let store = Arc::new(CacheStore::new());
    let worker = FetchWorker::new(
        Arc::new(HttpUpstream::new(client.clone())),
        Arc::clone(&store),
    );
    let notifier = Arc::new(WebhookNotifier::new(client));
    let coordinator = Coordinator::spawn(Arc::clone(&store), worker, notifier, config.clone());

    ProxyService::new(store, coordinator, config)
}
