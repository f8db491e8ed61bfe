//! HTTP client shared by fetch workers and the webhook notifier.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use reqwest::{Client, Url};
use tracing::debug;

use crate::cache::{FetchError, Upstream, UpstreamResponse};

use super::error::InfraError;

pub fn user_agent() -> &'static str {
    concat!("contentproxy/", env!("CARGO_PKG_VERSION"))
}

/// Build the process-wide client. `timeout` bounds a whole request including the body.
pub fn build_client(timeout: Duration) -> Result<Client, InfraError> {
    let client = Client::builder()
        .user_agent(user_agent())
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// [`Upstream`] backed by `reqwest`.
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn get(&self, url: &str, headers: HeaderMap) -> Result<UpstreamResponse, FetchError> {
        let url = Url::parse(url).map_err(|err| FetchError::Request(format!("{url}: {err}")))?;

        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError::Body(err.to_string()))?;
        debug!(status = status.as_u16(), bytes = body.len(), "upstream responded");

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_builder() {
        FetchError::Request(err.to_string())
    } else {
        FetchError::Transport(err.to_string())
    }
}
