//! Resource handlers and the RES reply envelope

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use vigil_core::subject_matches;

/// Failure answering a resource request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// No handler serves the resource
    #[error("Not found")]
    NotFound,
    /// The handler failed
    #[error("{0}")]
    Internal(String),
}

impl ResourceError {
    /// RES error code
    pub fn code(&self) -> &'static str {
        match self {
            ResourceError::NotFound => "system.notFound",
            ResourceError::Internal(_) => "system.internalError",
        }
    }
}

/// An inbound `get` request
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    /// Resource id, the request subject without its `get.` prefix
    pub resource: String,
    /// Raw request body
    pub payload: Bytes,
}

/// Produces the model for a resource
#[async_trait]
pub trait ResourceHandler: Send + Sync + fmt::Debug {
    /// Answer a `get` request with a JSON model
    async fn get(&self, request: &ResourceRequest) -> Result<Value, ResourceError>;
}

/// Routes resources to handlers by subject pattern; the first match wins
#[derive(Debug, Default, Clone)]
pub struct ResourceRouter {
    routes: Vec<(String, Arc<dyn ResourceHandler>)>,
}

impl ResourceRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for resources matching `pattern`
    pub fn route(mut self, pattern: impl Into<String>, handler: Arc<dyn ResourceHandler>) -> Self {
        self.routes.push((pattern.into(), handler));
        self
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are registered
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Handler for `resource`, if any pattern matches
    pub fn find(&self, resource: &str) -> Option<&Arc<dyn ResourceHandler>> {
        self.routes
            .iter()
            .find(|(pattern, _)| subject_matches(pattern, resource))
            .map(|(_, handler)| handler)
    }

    /// Answer a request and encode the reply envelope
    pub async fn dispatch(&self, request: &ResourceRequest) -> Bytes {
        let outcome = match self.find(&request.resource) {
            Some(handler) => handler.get(request).await,
            None => Err(ResourceError::NotFound),
        };

        let envelope = match outcome {
            Ok(model) => json!({ "result": { "model": model } }),
            Err(e) => {
                tracing::debug!(resource = %request.resource, code = e.code(), error = %e, "Resource request failed");
                json!({ "error": { "code": e.code(), "message": e.to_string() } })
            }
        };

        Bytes::from(envelope.to_string())
    }
}

/// Greeting model served by the default service
#[derive(Debug, Clone, Default)]
pub struct GreetingHandler;

#[async_trait]
impl ResourceHandler for GreetingHandler {
    async fn get(&self, _request: &ResourceRequest) -> Result<Value, ResourceError> {
        Ok(json!({
            "message": "Hello from API",
            "time": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Broken;

    #[async_trait]
    impl ResourceHandler for Broken {
        async fn get(&self, _request: &ResourceRequest) -> Result<Value, ResourceError> {
            Err(ResourceError::Internal("store unavailable".into()))
        }
    }

    fn request(resource: &str) -> ResourceRequest {
        ResourceRequest {
            resource: resource.to_string(),
            payload: Bytes::new(),
        }
    }

    fn decode(bytes: Bytes) -> Value {
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_greeting_model() {
        let router = ResourceRouter::new().route("api.>", Arc::new(GreetingHandler));
        let reply = decode(router.dispatch(&request("api.greeting")).await);

        assert_eq!(reply["result"]["model"]["message"], "Hello from API");
        let time = reply["result"]["model"]["time"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(time).is_ok());
    }

    #[tokio::test]
    async fn test_not_found() {
        let router = ResourceRouter::new().route("api.>", Arc::new(GreetingHandler));
        let reply = decode(router.dispatch(&request("billing.invoice")).await);

        assert_eq!(reply["error"]["code"], "system.notFound");
        assert_eq!(reply["error"]["message"], "Not found");
    }

    #[tokio::test]
    async fn test_internal_error() {
        let router = ResourceRouter::new()
            .route("api.broken", Arc::new(Broken))
            .route("api.>", Arc::new(GreetingHandler));
        let reply = decode(router.dispatch(&request("api.broken")).await);

        assert_eq!(reply["error"]["code"], "system.internalError");
        assert_eq!(reply["error"]["message"], "store unavailable");
        assert_eq!(router.len(), 2);
    }
}
