// crates/cloudgate-mcp/src/jsonrpc.rs
// ============================================================================
// Module: JSON-RPC Codec
// Description: JSON-RPC 2.0 envelope validation and response building.
// Purpose: Classify inbound payloads before any session or handler state is
//          touched.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Shape-only validation of JSON-RPC 2.0 envelopes. Semantic dispatch belongs
//! to the registered handlers; this module decides only whether bytes are a
//! well-formed request, a notification/response, or malformed input. Malformed
//! input is rejected here, ahead of the session and connection tables.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// JSON-RPC parse error code.
pub const PARSE_ERROR: i64 = -32700;
/// JSON-RPC invalid request code.
pub const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC method not found / disallowed code.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC invalid params code.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC internal error code (handler failures).
pub const INTERNAL_ERROR: i64 = -32603;

// ============================================================================
// SECTION: Frames
// ============================================================================

/// Classified inbound JSON-RPC payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Well-formed request carrying a method to dispatch.
    Request(RequestFrame),
    /// Notification or response; acknowledged without dispatch.
    Notification,
}

/// Well-formed JSON-RPC request envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    /// Request identifier (string, number, or null).
    pub id: Value,
    /// Method name to dispatch.
    pub method: String,
    /// Optional parameters payload.
    pub params: Option<Value>,
}

/// Envelope classification failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload is not valid JSON.
    #[error("parse error")]
    Parse,
    /// Payload is JSON but not a valid JSON-RPC 2.0 envelope.
    #[error("invalid request: {0}")]
    Shape(String),
}

/// Classifies a raw payload as a request, a notification, or malformed input.
///
/// # Errors
///
/// Returns [`CodecError::Parse`] for non-JSON input and [`CodecError::Shape`]
/// for JSON that violates the envelope invariants.
pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|_| CodecError::Parse)?;
    let Value::Object(envelope) = value else {
        return Err(CodecError::Shape("envelope must be an object".to_string()));
    };
    match envelope.get("jsonrpc") {
        Some(Value::String(version)) if version == "2.0" => {}
        _ => return Err(CodecError::Shape("jsonrpc must be \"2.0\"".to_string())),
    }
    let id = envelope.get("id").cloned().unwrap_or(Value::Null);
    if !matches!(id, Value::Null | Value::String(_) | Value::Number(_)) {
        return Err(CodecError::Shape("id must be a string, number, or null".to_string()));
    }
    match envelope.get("method") {
        None => Ok(Frame::Notification),
        Some(Value::String(method)) => Ok(Frame::Request(RequestFrame {
            id,
            method: method.clone(),
            params: envelope.get("params").cloned(),
        })),
        Some(_) => Err(CodecError::Shape("method must be a string".to_string())),
    }
}

// ============================================================================
// SECTION: Responses
// ============================================================================

/// JSON-RPC response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC protocol version.
    pub jsonrpc: &'static str,
    /// Request identifier.
    pub id: Value,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload when the request fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error payload.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured detail (sanitised failure message).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Builds a success response.
    #[must_use]
    pub const fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response.
    #[must_use]
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Builds an error response with a structured data field.
    #[must_use]
    pub fn error_with_data(
        id: Value,
        code: i64,
        message: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: Some(data),
            }),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
