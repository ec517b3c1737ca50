// crates/cloudgate-mcp/src/security.rs
// ============================================================================
// Module: Security Gate
// Description: Admission checks and sanitisation for HTTP transports.
// Purpose: Reject hostile traffic before any session or handler state is
//          touched.
// Dependencies: cloudgate-config, axum
// ============================================================================

//! ## Overview
//! The security gate runs a fixed sequence of admission checks for every
//! inbound HTTP request: header inspection, rate limiting, origin validation,
//! and the connection cap; method names are checked once a parsed envelope is
//! available. Stdio is a trusted local channel and bypasses the gate. Every
//! rejection emits a severity-classified security audit event; free text is
//! sanitised before it reaches a log line.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::IpAddr;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::http::HeaderName;
use axum::http::HeaderValue;
use axum::http::header::USER_AGENT;

use crate::audit::AuditSink;
use crate::audit::SecurityAuditEvent;
use crate::audit::Severity;
use crate::config::RateLimitConfig;
use crate::config::SecurityConfig;
use crate::config::ServerTransport;
use crate::ratelimit::RateLimiter;


// ============================================================================
// SECTION: Constants
// ============================================================================

/// Forwarding headers that indicate request smuggling or rebinding attempts.
const SUSPICIOUS_HEADERS: &[&str] =
    &["x-forwarded-host", "x-original-url", "x-rewrite-url", "x-http-method-override"];

/// Method name fragments that are never dispatched.
const METHOD_BLOCKLIST: &[&str] = &["rpc.", "system.", "eval", "exec", "cmd"];

/// Maximum length of a sanitised free-text value.
const MAX_SANITISED_LENGTH: usize = 1000;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Result of the header inspection step.
#[derive(Debug, Clone)]
pub struct HeaderValidation {
    /// Whether the headers are acceptable.
    pub valid: bool,
    /// Sanitised descriptions of each violation.
    pub errors: Vec<String>,
}

/// Typed admission failures, ordered by the check that produced them.
#[derive(Debug, Clone)]
pub enum AdmissionError {
    /// Suspicious headers or a blocklisted user agent.
    Headers {
        /// Sanitised violation descriptions.
        errors: Vec<String>,
    },
    /// Per-client rate limit exceeded.
    RateLimited {
        /// Suggested retry delay in milliseconds.
        retry_after_ms: u64,
    },
    /// Origin header outside the allow-list.
    Origin,
    /// Live-connection cap reached.
    ConnectionLimit,
}

/// Stateless-or-near-stateless admission validator for HTTP transports.
pub struct SecurityGate {
    /// Allowed origin prefixes.
    allowed_origins: Vec<String>,
    /// Blocklisted user-agent substrings, lowercased.
    blocked_user_agents: Vec<String>,
    /// Optional per-client rate limiter.
    limiter: Option<RateLimiter>,
    /// Sink for security audit events.
    audit: Arc<dyn AuditSink>,
}

impl SecurityGate {
    /// Builds a gate from validated configuration.
    #[must_use]
    pub fn new(
        security: &SecurityConfig,
        rate_limit: Option<RateLimitConfig>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            allowed_origins: security.allowed_origins.clone(),
            blocked_user_agents: security
                .blocked_user_agents
                .iter()
                .map(|pattern| pattern.to_lowercase())
                .collect(),
            limiter: rate_limit.map(RateLimiter::new),
            audit,
        }
    }

    /// Runs the ordered admission checks for an inbound HTTP request.
    ///
    /// # Errors
    ///
    /// Returns the first failing check as an [`AdmissionError`]; a matching
    /// security audit event has already been recorded.
    pub fn admit(
        &self,
        transport: ServerTransport,
        headers: &HeaderMap,
        peer_ip: Option<IpAddr>,
        has_capacity: bool,
    ) -> Result<(), AdmissionError> {
        let validation = self.validate_headers(headers);
        if !validation.valid {
            self.record(
                "header_rejected",
                Severity::Medium,
                Some(validation.errors.join("; ")),
                transport,
                peer_ip,
            );
            return Err(AdmissionError::Headers {
                errors: validation.errors,
            });
        }
        if let Some(limiter) = &self.limiter
            && let Some(ip) = peer_ip
        {
            let decision = limiter.check(ip);
            if !decision.allowed {
                self.record(
                    "rate_limited",
                    Severity::Medium,
                    Some(format!("client {}", sanitize(&ip.to_string()))),
                    transport,
                    peer_ip,
                );
                return Err(AdmissionError::RateLimited {
                    retry_after_ms: decision.retry_after_ms.unwrap_or(1_000),
                });
            }
        }
        if let Some(origin) = header_str(headers, "origin")
            && !self.origin_allowed(origin)
        {
            self.record(
                "origin_rejected",
                Severity::High,
                Some(format!("origin {}", sanitize(origin))),
                transport,
                peer_ip,
            );
            return Err(AdmissionError::Origin);
        }
        if !has_capacity {
            self.record("connection_limit", Severity::Medium, None, transport, peer_ip);
            return Err(AdmissionError::ConnectionLimit);
        }
        Ok(())
    }

    /// Inspects headers for suspicious forwarding headers and blocklisted
    /// user agents.
    #[must_use]
    pub fn validate_headers(&self, headers: &HeaderMap) -> HeaderValidation {
        let mut errors = Vec::new();
        for name in SUSPICIOUS_HEADERS {
            if headers.contains_key(*name) {
                errors.push(format!("suspicious header {name}"));
            }
        }
        if let Some(agent) = header_str(headers, USER_AGENT.as_str()) {
            let lowered = agent.to_lowercase();
            for pattern in &self.blocked_user_agents {
                if lowered.contains(pattern) {
                    errors.push(format!("blocked user agent {}", sanitize(agent)));
                    break;
                }
            }
        }
        HeaderValidation {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Returns whether an origin value starts with an allow-listed prefix.
    #[must_use]
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|prefix| origin.starts_with(prefix))
    }

    /// Validates a parsed method name; records a high-severity event on
    /// rejection.
    #[must_use]
    pub fn check_method(
        &self,
        transport: ServerTransport,
        peer_ip: Option<IpAddr>,
        method: &str,
    ) -> bool {
        if method_name_allowed(method) {
            return true;
        }
        self.record(
            "method_rejected",
            Severity::High,
            Some(format!("method {}", sanitize(method))),
            transport,
            peer_ip,
        );
        false
    }

    /// Emits a security audit event.
    fn record(
        &self,
        kind: &'static str,
        severity: Severity,
        detail: Option<String>,
        transport: ServerTransport,
        peer_ip: Option<IpAddr>,
    ) {
        let event = SecurityAuditEvent::new(
            kind,
            severity,
            detail,
            transport,
            peer_ip.map(|ip| ip.to_string()),
        );
        self.audit.record_security(&event);
    }
}

// ============================================================================
// SECTION: Method Names
// ============================================================================

/// Returns whether a method name is structurally acceptable for dispatch.
///
/// Accepted names use the registry character set (alphanumerics, `_`, `-`,
/// and the `/` path separator) and contain no blocklisted fragment. Dotted
/// names never validate, so `rpc.`-style prefixes cannot pass the character
/// check either.
#[must_use]
pub fn method_name_allowed(method: &str) -> bool {
    if method.is_empty() || method.len() > MAX_SANITISED_LENGTH {
        return false;
    }
    let charset_ok = method
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '/');
    if !charset_ok {
        return false;
    }
    let lowered = method.to_lowercase();
    !METHOD_BLOCKLIST.iter().any(|fragment| lowered.contains(fragment))
}

// ============================================================================
// SECTION: Sanitisation
// ============================================================================

/// Sanitises a free-text value for logging: strips `<>'"&` and control
/// characters, trims, and caps the length.
#[must_use]
pub fn sanitize(input: &str) -> String {
    let stripped: String = input
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | '\'' | '"' | '&'))
        .collect();
    stripped.trim().chars().take(MAX_SANITISED_LENGTH).collect()
}

// ============================================================================
// SECTION: Response Headers
// ============================================================================

/// Applies the fixed security-header bundle to an admitted response and
/// strips framework identification headers.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    const BUNDLE: &[(&str, &str)] = &[
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("strict-transport-security", "max-age=63072000; includeSubDomains"),
        ("content-security-policy", "default-src 'none'; frame-ancestors 'none'; sandbox"),
        ("referrer-policy", "no-referrer"),
        ("permissions-policy", "accelerometer=(), camera=(), geolocation=(), microphone=()"),
        ("cross-origin-opener-policy", "same-origin"),
        ("cross-origin-embedder-policy", "require-corp"),
        ("cross-origin-resource-policy", "same-origin"),
        ("cache-control", "no-store, no-cache, must-revalidate"),
        ("pragma", "no-cache"),
        ("expires", "0"),
    ];
    for (name, value) in BUNDLE {
        if let Ok(header_name) = HeaderName::try_from(*name)
            && let Ok(header_value) = HeaderValue::try_from(*value)
        {
            headers.insert(header_name, header_value);
        }
    }
    headers.remove("server");
    headers.remove("x-powered-by");
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads a header as UTF-8, returning `None` for absent or non-text values.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
