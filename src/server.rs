//! HTTP surface of the proxy.
//!
//! Every inbound path is dispatched through the forwarder and the pipeline;
//! the response is rendered as JSON or plain text depending on the client's
//! `Accept` header. Failures of any kind are rendered as a 500 with a
//! human-readable message, and this handler is the only place they are
//! logged.

use crate::metadata::MetadataForwarder;
use crate::pipeline::ArtifactPipeline;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared state for proxy handlers.
#[derive(Clone)]
pub struct AppState {
    /// Upstream metadata forwarder.
    pub forwarder: Arc<MetadataForwarder>,
    /// Artifact fetch-verify-store pipeline.
    pub pipeline: Arc<ArtifactPipeline>,
}

/// Build the proxy router. When `static_root` is set (local backend), the
/// cache directory is served under `/packages`.
pub fn router(state: AppState, static_root: Option<PathBuf>) -> Router {
    let mut router = Router::new().route("/health", get(health));
    if let Some(root) = static_root {
        router = router.nest_service("/packages", ServeDir::new(root));
    }
    router
        .fallback(proxy_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Unconditional liveness probe; never touches the pipeline.
async fn health() -> &'static str {
    "ok"
}

async fn proxy_request(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let result = match state.forwarder.fetch(method, &path_and_query).await {
        Ok(resolved) => state.pipeline.resolve(resolved).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        error!(path = %path_and_query, error = %e, "Request failed");
    }

    let wants_json =
        headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) == Some("application/json");

    match (wants_json, result) {
        (true, Ok(metadata)) => Json(metadata).into_response(),
        (true, Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
        (false, Ok(metadata)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            metadata.render_plain(),
        )
            .into_response(),
        (false, Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        )
            .into_response(),
    }
}
