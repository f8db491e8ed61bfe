//! Webhook notifier.
//!
//! After a flush every configured listener gets one GET. Calls run on their
//! own tasks and are never retried; failures are logged and counted only.

use metrics::counter;
use reqwest::Client;
use tracing::{info, warn};

use crate::cache::{FlushListener, ProxyConfig};

#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn call(client: Client, url: String) {
        info!(url = %url, "call webhook");
        match client.get(url.as_str()).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                counter!("contentproxy_webhook_failure_total").increment(1);
                warn!(
                    url = %url,
                    status = response.status().as_u16(),
                    "webhook answered with a failure status"
                );
            }
            Err(err) => {
                counter!("contentproxy_webhook_failure_total").increment(1);
                warn!(url = %url, error = %err, "webhook call failed");
            }
        }
    }
}

impl FlushListener for WebhookNotifier {
    fn cache_flushed(&self, config: &ProxyConfig) -> usize {
        for url in &config.webhooks {
            tokio::spawn(Self::call(self.client.clone(), url.clone()));
        }
        config.webhooks.len()
    }
}
