use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{cache::FetchError, infra::error::InfraError};

/// Diagnostic attached to error responses for the response logger.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Error raised by the HTTP layer itself, before any cache work.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status,
            public_message,
            report: ErrorReport::from_message(source, status, detail),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("cache fetch failed")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Fetch(FetchError::Shutdown) => "Proxy is shutting down",
            AppError::Fetch(_) => "Cache / job error",
            AppError::Infra(_) | AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    #[tokio::test]
    async fn fetch_errors_become_plain_text_500s_with_a_report() {
        let error = AppError::from(FetchError::Transport("connection refused".to_string()));
        let mut response = error.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let report = response
            .extensions_mut()
            .remove::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.source, "application::error::AppError");
        assert_eq!(
            report.messages,
            vec![
                "cache fetch failed".to_string(),
                "upstream request failed: connection refused".to_string(),
            ]
        );

        let body = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        assert_eq!(body.as_ref(), b"Cache / job error");
    }

    #[test]
    fn http_error_keeps_its_status() {
        let error = HttpError::new(
            "infra::http::proxy",
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
            "POST is not proxied",
        );
        assert_eq!(error.status(), StatusCode::METHOD_NOT_ALLOWED);

        let mut response = error.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(response.extensions_mut().remove::<ErrorReport>().is_some());
    }

    #[test]
    fn infra_and_shutdown_errors_use_fixed_public_messages() {
        let infra = AppError::from(InfraError::telemetry("subscriber already set"));
        assert_eq!(infra.presentation_message(), "Unexpected error occurred");

        let stopping = AppError::from(FetchError::Shutdown);
        assert_eq!(stopping.presentation_message(), "Proxy is shutting down");
    }
}
