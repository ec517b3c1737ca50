// crates/cloudgate-mcp/src/telemetry.rs
// ============================================================================
// Module: Gateway Telemetry
// Description: Observability hooks for gateway transports and dispatch.
// Purpose: Provide metric events and latency buckets without hard deps.
// Dependencies: cloudgate-config
// ============================================================================

//! ## Overview
//! This module exposes a thin metrics interface for gateway request counters
//! and latency histograms. It is intentionally dependency-light so downstream
//! deployments can plug in Prometheus or OpenTelemetry without redesign.
//! Labels are drawn from closed enums; free-text request data never becomes a
//! label.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use crate::config::ServerTransport;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default latency buckets in milliseconds for gateway request histograms.
pub const GATEWAY_LATENCY_BUCKETS_MS: &[u64] =
    &[1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000];

// ============================================================================
// SECTION: Metric Labels
// ============================================================================

/// Gateway request method classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayMethod {
    /// Well-formed request dispatched to the handler registry.
    Dispatch,
    /// Notification or response acknowledged without dispatch.
    Notification,
    /// Health snapshot request.
    Health,
    /// Long-lived SSE stream establishment.
    SseStream,
    /// Invalid or malformed JSON-RPC request.
    Invalid,
    /// Request rejected at the security gate.
    Rejected,
}

impl GatewayMethod {
    /// Returns a stable label for the method classification.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Notification => "notification",
            Self::Health => "health",
            Self::SseStream => "sse_stream",
            Self::Invalid => "invalid",
            Self::Rejected => "rejected",
        }
    }
}

/// Gateway request outcome classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayOutcome {
    /// Successful request.
    Ok,
    /// Failed or rejected request.
    Error,
}

impl GatewayOutcome {
    /// Returns a stable label for the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Gateway request metric event payload.
///
/// # Invariants
/// - Optional fields are `None` when the metadata is unavailable.
#[derive(Debug, Clone)]
pub struct MetricEvent {
    /// Transport used for the request.
    pub transport: ServerTransport,
    /// Method classification.
    pub method: GatewayMethod,
    /// Request outcome.
    pub outcome: GatewayOutcome,
    /// JSON-RPC error code when present.
    pub error_code: Option<i64>,
    /// Request body size in bytes.
    pub request_bytes: usize,
    /// Response body size in bytes.
    pub response_bytes: usize,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Metrics sink for gateway requests and latencies.
pub trait GatewayMetrics: Send + Sync {
    /// Records a request counter event.
    fn record_request(&self, event: MetricEvent);
    /// Records a latency observation for the request.
    fn record_latency(&self, event: MetricEvent, latency: Duration);
}

/// No-op metrics sink.
///
/// # Invariants
/// - Metrics are intentionally discarded.
pub struct NoopMetrics;

impl GatewayMetrics for NoopMetrics {
    fn record_request(&self, _event: MetricEvent) {}

    fn record_latency(&self, _event: MetricEvent, _latency: Duration) {}
}
