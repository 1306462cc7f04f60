use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State as AxumState},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing,
};
use serde_json::json;
use std::collections::HashMap;

use crate::SharedState;
use crate::dispatch::{RunMode, process_delivery};
use crate::transport::WebhookEvent;

/// GitHub caps webhook payloads at 25 MB.
pub const MAX_WEBHOOK_BODY: usize = 25 * 1024 * 1024;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/webhook", routing::any(handle_webhook))
        .route("/status", routing::get(status))
        .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY))
        .with_state(state)
}

pub async fn root() -> &'static str {
    "simple_site_deploy"
}

/// Returns server information and the most recent deployments
pub async fn status(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    let history = state.pipeline.history();
    let history = history.lock().await;
    let config = state.pipeline.config();

    Json(json!({
        "server": {
            "name": "simple_site_deploy",
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "target": {
            "repository": format!("{}/{}", config.owner, config.repo),
            "branch": config.branch,
            "bucket": config.bucket,
        },
        "deployments": {
            "current": history.current(),
            "recent": history.recent(10),
        }
    }))
}

/// Handles a webhook delivery. Any method is routed here so non-POST
/// requests get the 400 answer instead of a 405.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let event = WebhookEvent::from_parts(method.as_str(), uri.path(), &headers, params, &body);
    let response = process_delivery(&state.pipeline, &event, RunMode::Background).await;
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, response.body)
}
