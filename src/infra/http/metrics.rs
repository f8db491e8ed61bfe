use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use super::HttpState;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub(super) async fn render(State(state): State<HttpState>) -> Response {
    match state.metrics.as_ref() {
        Some(endpoint) => (
            [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
            endpoint.handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
