// crates/cloudgate-mcp/src/handlers.rs
// ============================================================================
// Module: Handler Registry Seam
// Description: Dispatch boundary for the tool/resource/prompt registry.
// Purpose: Keep handler semantics opaque to the transport gateway.
// Dependencies: async-trait, serde_json
// ============================================================================

//! ## Overview
//! The gateway treats registered handlers as external collaborators: it hands
//! them a method name and raw params and receives a JSON value or a typed
//! failure. Handler failures map to JSON-RPC `-32603`; unknown methods map to
//! `-32601`. The bundled [`StaticHandlerRegistry`] covers wiring and tests;
//! production deployments provide their own registry implementation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::config::ServerTransport;
use crate::session::SessionId;

// ============================================================================
// SECTION: Request Context
// ============================================================================

/// Per-request context passed to handlers and audit records.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Transport used by the caller.
    pub transport: ServerTransport,
    /// Peer IP address when available.
    pub peer_ip: Option<IpAddr>,
    /// Session id when the request runs inside a streaming session.
    pub session_id: Option<SessionId>,
    /// Optional request identifier for auditing.
    pub request_id: Option<String>,
}

impl RequestContext {
    /// Builds a stdio request context.
    #[must_use]
    pub const fn stdio() -> Self {
        Self {
            transport: ServerTransport::Stdio,
            peer_ip: None,
            session_id: None,
            request_id: None,
        }
    }

    /// Builds an HTTP/SSE request context.
    #[must_use]
    pub const fn http(transport: ServerTransport, peer_ip: Option<IpAddr>) -> Self {
        Self {
            transport,
            peer_ip,
            session_id: None,
            request_id: None,
        }
    }

    /// Returns a copy with the request identifier set.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Returns a copy with the session id set.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Handler dispatch failures.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No handler is registered for the method.
    #[error("method not found: {0}")]
    UnknownMethod(String),
    /// The handler ran and failed.
    #[error("handler failed: {0}")]
    Failed(String),
}

// ============================================================================
// SECTION: Traits
// ============================================================================

/// A single registered request handler.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handles a dispatched request.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Failed`] when the handler cannot produce a
    /// result.
    async fn handle(
        &self,
        context: &RequestContext,
        params: Option<Value>,
    ) -> Result<Value, HandlerError>;
}

/// Dispatch seam for the tool/resource/prompt registry.
#[async_trait]
pub trait HandlerRegistry: Send + Sync {
    /// Dispatches a method to its handler.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::UnknownMethod`] for unregistered methods and
    /// [`HandlerError::Failed`] for handler failures.
    async fn dispatch(
        &self,
        context: &RequestContext,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, HandlerError>;
}

// ============================================================================
// SECTION: Static Registry
// ============================================================================

/// Method-keyed registry backed by a static table.
#[derive(Default)]
pub struct StaticHandlerRegistry {
    /// Registered handlers keyed by method name.
    handlers: BTreeMap<String, Arc<dyn RequestHandler>>,
}

impl StaticHandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under a method name, replacing any previous one.
    pub fn register(&mut self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.handlers.insert(method.into(), handler);
    }

    /// Returns a registry preloaded with the built-in `ping` handler.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("ping", Arc::new(PingHandler));
        registry
    }
}

#[async_trait]
impl HandlerRegistry for StaticHandlerRegistry {
    async fn dispatch(
        &self,
        context: &RequestContext,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, HandlerError> {
        let Some(handler) = self.handlers.get(method) else {
            return Err(HandlerError::UnknownMethod(method.to_string()));
        };
        handler.handle(context, params).await
    }
}

// ============================================================================
// SECTION: Built-in Handlers
// ============================================================================

/// Liveness handler answering `ping`.
pub struct PingHandler;

#[async_trait]
impl RequestHandler for PingHandler {
    async fn handle(
        &self,
        _context: &RequestContext,
        _params: Option<Value>,
    ) -> Result<Value, HandlerError> {
        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Ok(json!({ "status": "ok", "timestamp_ms": timestamp_ms }))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
