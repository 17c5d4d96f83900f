//! Native endpoints for the standalone server: each forwards the (already
//! rewritten) native request to the configured model server and streams the
//! reply back untouched. Reshaping is left to the interception middleware.

use crate::config::NativeConfig;
use crate::error::{Result, ShimError};
use crate::logging::Exchange;
use crate::server::AppState;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// HTTP client for native calls. Only connecting is time-limited so that long
/// streamed replies are never cut off.
pub fn native_client(config: &NativeConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build()?)
}

pub async fn native_chat(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    forward(&state, Method::POST, "/api/chat", body).await
}

pub async fn native_embeddings(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    forward(&state, Method::POST, "/api/embeddings", body).await
}

pub async fn native_tags(State(state): State<Arc<AppState>>) -> Response {
    forward(&state, Method::GET, "/api/tags", Bytes::new()).await
}

pub async fn native_show(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    forward(&state, Method::POST, "/api/show", body).await
}

/// Send one request to the native server and relay its status, content type
/// and body stream.
pub async fn forward(state: &AppState, method: Method, path: &str, body: Bytes) -> Response {
    let base_url = match state.config.effective_base_url() {
        Ok(url) => url,
        Err(e) => return e.into_response(),
    };
    let url = format!("{}{}", base_url, path);

    debug!(%method, %url, body_len = body.len(), "Forwarding to native server");

    let started = Instant::now();
    let mut request = state.client.request(method.clone(), &url);
    if !body.is_empty() {
        request = request
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            warn!(%url, error = %e, "Native server unreachable");
            state.exchanges.record(
                Exchange::new(method.as_str(), path, started.elapsed()).with_error(e.to_string()),
            );
            return ShimError::upstream(format!("request to {url} failed: {e}")).into_response();
        }
    };

    let status = response.status().as_u16();
    state
        .exchanges
        .record(Exchange::new(method.as_str(), path, started.elapsed()).with_status(status));

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();

    Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY))
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from_stream(response.bytes_stream()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
