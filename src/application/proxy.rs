//! Proxy service: the decisions behind each front-door request.

use std::sync::Arc;

use axum::http::{HeaderMap, Uri};
use metrics::counter;
use serde::Serialize;
use tracing::{error, info};

use crate::cache::{
    CacheKey, CacheStore, CachedResponse, ConfigHandle, Coordinator, FetchRequest,
    InvalidateReport, ProxyConfig, request_target,
};

use super::error::AppError;

/// Snapshot served on the info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyInfo {
    pub webhooks: Vec<String>,
    pub cachelength: usize,
    pub backendurl: String,
}

#[derive(Clone)]
pub struct ProxyService {
    store: Arc<CacheStore>,
    coordinator: Coordinator,
    config: ConfigHandle,
}

impl ProxyService {
    pub fn new(store: Arc<CacheStore>, coordinator: Coordinator, config: ConfigHandle) -> Self {
        Self {
            store,
            coordinator,
            config,
        }
    }

    pub fn config(&self) -> Arc<ProxyConfig> {
        self.config.current()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Answer a cacheable GET from the store, or wait for the shared fetch.
    pub async fn serve(
        &self,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Result<Arc<CachedResponse>, AppError> {
        counter!("contentproxy_proxy_request_total").increment(1);
        let key = CacheKey::derive(uri, headers);
        let url = request_target(uri);

        if let Some(cached) = self.store.get(&key) {
            counter!("contentproxy_cache_hit_total").increment(1);
            info!(url, cache_id = %key, "serve response from cache");
            return Ok(cached);
        }

        counter!("contentproxy_cache_miss_total").increment(1);
        let request = FetchRequest::new(uri, headers);
        match self.coordinator.resolve(key.clone(), request).await {
            Ok(response) => {
                info!(url, cache_id = %key, "serve response after cache creation");
                Ok(response)
            }
            Err(err) => {
                error!(url, cache_id = %key, error = %err, "failed to resolve cached response");
                Err(AppError::from(err))
            }
        }
    }

    /// Flush the store and fire the webhooks. Returns once the store is empty.
    pub async fn invalidate(&self) -> Result<InvalidateReport, AppError> {
        counter!("contentproxy_update_total").increment(1);
        let report = self.coordinator.invalidate().await?;
        info!(
            cleared = report.cleared,
            webhooks = report.notified,
            "cache invalidated"
        );
        Ok(report)
    }

    pub fn info(&self) -> ProxyInfo {
        let config = self.config.current();
        ProxyInfo {
            webhooks: config.webhooks.clone(),
            cachelength: self.store.len(),
            backendurl: config.backend_url.clone(),
        }
    }
}
