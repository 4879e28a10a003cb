//! Webhooks for Home Assistant
//!
//! Integrations register a handler under a random webhook id; devices then
//! push data to `/api/webhook/<id>`. The registry resolves the id and hands
//! the raw request to the handler.

mod http;
mod url;

pub use http::{create_router, WEBHOOK_ROUTE};
pub use url::{generate_url, internal_base_url, local_ip, webhook_path};

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::HeaderMap;
pub use axum::http::{Method, StatusCode};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Webhook id {0} is already registered")]
    AlreadyRegistered(String),

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("No URL available: {0}")]
    NoUrlAvailable(String),
}

pub type WebhookResult<T> = Result<T, WebhookError>;

/// An inbound request as seen by a webhook handler
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WebhookRequest {
    pub fn post(body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::POST,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }
}

/// What a handler answers with; `None` body means an empty response
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status: StatusCode,
    pub body: Option<serde_json::Value>,
}

impl WebhookResponse {
    pub fn json(status: StatusCode, body: serde_json::Value) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self { status, body: None }
    }
}

#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(
        &self,
        webhook_id: &str,
        request: WebhookRequest,
    ) -> WebhookResult<WebhookResponse>;
}

/// A registered webhook
#[derive(Clone)]
pub struct Webhook {
    pub domain: String,
    pub name: String,
    pub allowed_methods: Vec<Method>,
    handler: Arc<dyn WebhookHandler>,
}

impl std::fmt::Debug for Webhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Webhook")
            .field("domain", &self.domain)
            .field("name", &self.name)
            .field("allowed_methods", &self.allowed_methods)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct WebhookRegistry {
    webhooks: DashMap<String, Webhook>,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh random webhook id
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    pub fn register(
        &self,
        domain: &str,
        name: &str,
        webhook_id: &str,
        handler: Arc<dyn WebhookHandler>,
        allowed_methods: Vec<Method>,
    ) -> WebhookResult<()> {
        if self.webhooks.contains_key(webhook_id) {
            return Err(WebhookError::AlreadyRegistered(webhook_id.to_string()));
        }

        self.webhooks.insert(
            webhook_id.to_string(),
            Webhook {
                domain: domain.to_string(),
                name: name.to_string(),
                allowed_methods,
                handler,
            },
        );
        info!(domain, name, "Registered webhook");
        Ok(())
    }

    /// Remove a webhook, returning whether it was registered
    pub fn unregister(&self, webhook_id: &str) -> bool {
        let removed = self.webhooks.remove(webhook_id);
        if let Some((_, webhook)) = &removed {
            info!(domain = %webhook.domain, name = %webhook.name, "Unregistered webhook");
        }
        removed.is_some()
    }

    pub fn is_registered(&self, webhook_id: &str) -> bool {
        self.webhooks.contains_key(webhook_id)
    }

    pub fn get(&self, webhook_id: &str) -> Option<Webhook> {
        self.webhooks.get(webhook_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.webhooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.webhooks.is_empty()
    }

    /// Dispatch a request to the webhook registered under `webhook_id`
    ///
    /// Unknown ids and failing handlers are logged and answered with an
    /// empty 200 so senders learn nothing about registered ids. A method the
    /// webhook does not accept gets 405, except HEAD which confirms the URL.
    pub async fn async_handle(&self, webhook_id: &str, request: WebhookRequest) -> WebhookResponse {
        let Some(webhook) = self.get(webhook_id) else {
            warn!(
                method = %request.method,
                "Received message for unregistered webhook"
            );
            return WebhookResponse::empty(StatusCode::OK);
        };

        if !webhook.allowed_methods.contains(&request.method) {
            if request.method == Method::HEAD {
                return WebhookResponse::empty(StatusCode::OK);
            }
            warn!(
                domain = %webhook.domain,
                method = %request.method,
                "Webhook received unexpected method"
            );
            return WebhookResponse::empty(StatusCode::METHOD_NOT_ALLOWED);
        }

        debug!(domain = %webhook.domain, bytes = request.body.len(), "Handling webhook");
        match webhook.handler.handle(webhook_id, request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(domain = %webhook.domain, error = %err, "Error processing webhook");
                WebhookResponse::empty(StatusCode::OK)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl WebhookHandler for Echo {
        async fn handle(
            &self,
            webhook_id: &str,
            request: WebhookRequest,
        ) -> WebhookResult<WebhookResponse> {
            if !request.has_body() {
                return Err(WebhookError::InvalidPayload("empty".into()));
            }
            Ok(WebhookResponse::json(
                StatusCode::OK,
                json!({ "id": webhook_id, "len": request.body.len() }),
            ))
        }
    }

    fn registry_with_echo(id: &str) -> WebhookRegistry {
        let registry = WebhookRegistry::new();
        registry
            .register("vegehub", "VegeHub A1B2", id, Arc::new(Echo), vec![Method::POST])
            .unwrap();
        registry
    }

    #[test]
    fn test_generate_id_unique() {
        let a = WebhookRegistry::generate_id();
        let b = WebhookRegistry::generate_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = registry_with_echo("abc");
        let again = registry.register("vegehub", "other", "abc", Arc::new(Echo), vec![]);
        assert!(matches!(again, Err(WebhookError::AlreadyRegistered(_))));

        assert!(registry.unregister("abc"));
        assert!(!registry.unregister("abc"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_to_handler() {
        let registry = registry_with_echo("abc");
        let response = registry
            .async_handle("abc", WebhookRequest::post("{}"))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Some(json!({ "id": "abc", "len": 2 })));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_empty_ok() {
        let registry = registry_with_echo("abc");
        let response = registry.async_handle("abc", WebhookRequest::post("")).await;
        assert_eq!(response, WebhookResponse::empty(StatusCode::OK));
    }

    #[tokio::test]
    async fn test_unknown_id_and_wrong_method() {
        let registry = registry_with_echo("abc");

        let unknown = registry.async_handle("nope", WebhookRequest::post("{}")).await;
        assert_eq!(unknown, WebhookResponse::empty(StatusCode::OK));

        let mut get = WebhookRequest::post("");
        get.method = Method::GET;
        let response = registry.async_handle("abc", get).await;
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);

        let mut head = WebhookRequest::post("");
        head.method = Method::HEAD;
        let response = registry.async_handle("abc", head).await;
        assert_eq!(response.status, StatusCode::OK);
    }
}
