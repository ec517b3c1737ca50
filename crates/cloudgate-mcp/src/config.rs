// crates/cloudgate-mcp/src/config.rs
// ============================================================================
// Module: MCP Configuration (Re-export)
// Description: Re-export canonical Cloudgate config types.
// Purpose: Preserve MCP public API while centralizing config logic.
// Dependencies: cloudgate-config
// ============================================================================

//! ## Overview
//! This module re-exports the canonical configuration model from
//! `cloudgate-config` to keep gateway callers stable while enforcing a single
//! source of truth.

/// Re-export canonical config types and helpers.
pub use cloudgate_config::*;
