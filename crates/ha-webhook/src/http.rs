//! HTTP endpoint for webhooks

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::{WebhookRegistry, WebhookRequest};

/// Route every webhook is served under
pub const WEBHOOK_ROUTE: &str = "/api/webhook/:webhook_id";

/// Router serving all registered webhooks
pub fn create_router(registry: Arc<WebhookRegistry>) -> Router {
    Router::new()
        .route(WEBHOOK_ROUTE, any(handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

async fn handle_webhook(
    State(registry): State<Arc<WebhookRegistry>>,
    Path(webhook_id): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = WebhookRequest {
        method,
        headers,
        body,
    };

    let response = registry.async_handle(&webhook_id, request).await;
    match response.body {
        Some(body) => (response.status, Json(body)).into_response(),
        None => response.status.into_response(),
    }
}
