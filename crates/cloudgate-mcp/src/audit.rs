// crates/cloudgate-mcp/src/audit.rs
// ============================================================================
// Module: Gateway Audit Logging
// Description: Structured audit events for gateway request handling.
// Purpose: Emit sanitised audit logs without hard dependencies.
// Dependencies: cloudgate-config, serde
// ============================================================================

//! ## Overview
//! This module defines audit event payloads and sinks for gateway request
//! logging. It is intentionally lightweight so deployments can route events to
//! their preferred logging pipeline without redesign. Free-text fields must be
//! sanitised by the caller before they reach an event; sinks never inspect or
//! rewrite payloads.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::config::ServerTransport;
use crate::telemetry::GatewayMethod;
use crate::telemetry::GatewayOutcome;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Severity classification for security audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational events.
    Low,
    /// Suspicious but routine rejections.
    Medium,
    /// Likely hostile traffic.
    High,
}

impl Severity {
    /// Returns a stable label for the severity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Gateway request audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Request identifier when provided.
    pub request_id: Option<String>,
    /// Transport used for the request.
    pub transport: ServerTransport,
    /// Peer IP address when available.
    pub peer_ip: Option<String>,
    /// JSON-RPC method classification.
    pub method: GatewayMethod,
    /// Request outcome.
    pub outcome: GatewayOutcome,
    /// JSON-RPC error code when present.
    pub error_code: Option<i64>,
    /// Session identifier when a session was involved.
    pub session_id: Option<String>,
    /// Request body size in bytes.
    pub request_bytes: usize,
    /// Response body size in bytes.
    pub response_bytes: usize,
}

/// Security posture audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Security event kind.
    pub kind: &'static str,
    /// Severity classification.
    pub severity: Severity,
    /// Sanitised detail message.
    pub detail: Option<String>,
    /// Transport used for the request.
    pub transport: ServerTransport,
    /// Peer IP address when available.
    pub peer_ip: Option<String>,
}

/// Inputs required to construct a gateway request audit event.
pub struct GatewayAuditEventParams {
    /// Request identifier when provided.
    pub request_id: Option<String>,
    /// Transport used for the request.
    pub transport: ServerTransport,
    /// Peer IP address when available.
    pub peer_ip: Option<String>,
    /// JSON-RPC method classification.
    pub method: GatewayMethod,
    /// Request outcome.
    pub outcome: GatewayOutcome,
    /// JSON-RPC error code when present.
    pub error_code: Option<i64>,
    /// Session identifier when a session was involved.
    pub session_id: Option<String>,
    /// Request body size in bytes.
    pub request_bytes: usize,
    /// Response body size in bytes.
    pub response_bytes: usize,
}

impl GatewayAuditEvent {
    /// Creates a new audit event with a consistent timestamp.
    #[must_use]
    pub fn new(params: GatewayAuditEventParams) -> Self {
        Self {
            event: "gateway_request",
            timestamp_ms: epoch_ms(),
            request_id: params.request_id,
            transport: params.transport,
            peer_ip: params.peer_ip,
            method: params.method,
            outcome: params.outcome,
            error_code: params.error_code,
            session_id: params.session_id,
            request_bytes: params.request_bytes,
            response_bytes: params.response_bytes,
        }
    }
}

impl SecurityAuditEvent {
    /// Creates a new security audit event with a consistent timestamp.
    #[must_use]
    pub fn new(
        kind: &'static str,
        severity: Severity,
        detail: Option<String>,
        transport: ServerTransport,
        peer_ip: Option<String>,
    ) -> Self {
        Self {
            event: "security_audit",
            timestamp_ms: epoch_ms(),
            kind,
            severity,
            detail,
            transport,
            peer_ip,
        }
    }
}

/// Returns the current wall clock as milliseconds since the epoch.
pub(crate) fn epoch_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for gateway request and security events.
pub trait AuditSink: Send + Sync {
    /// Record a request audit event.
    fn record(&self, event: &GatewayAuditEvent);

    /// Record a security posture audit event.
    fn record_security(&self, _event: &SecurityAuditEvent) {}
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &GatewayAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }

    fn record_security(&self, event: &SecurityAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &GatewayAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }

    fn record_security(&self, event: &SecurityAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &GatewayAuditEvent) {}

    fn record_security(&self, _event: &SecurityAuditEvent) {}
}

// ============================================================================
// SECTION: Tests
// ============================================================================
