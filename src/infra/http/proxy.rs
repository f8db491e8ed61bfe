use axum::{
    Json,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};

use crate::{application::error::HttpError, cache::ControlPath};

use super::HttpState;

const SOURCE: &str = "infra::http::proxy::dispatch";

/// Route a request to the control endpoints or through the cache.
pub(super) async fn dispatch(
    State(state): State<HttpState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let config = state.proxy.config();

    match config.control_path(uri.path()) {
        Some(ControlPath::Update) => match state.proxy.invalidate().await {
            Ok(_) => StatusCode::OK.into_response(),
            Err(err) => err.into_response(),
        },
        Some(ControlPath::Info) => Json(state.proxy.info()).into_response(),
        None if method != Method::GET => HttpError::new(
            SOURCE,
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
            format!("{method} is not proxied"),
        )
        .into_response(),
        None => match state.proxy.serve(&uri, &headers).await {
            Ok(cached) => cached.to_response(),
            Err(err) => err.into_response(),
        },
    }
}
