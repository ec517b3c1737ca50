// crates/cloudgate-config/src/lib.rs
// ============================================================================
// Module: Cloudgate Config
// Description: Configuration model and validation for the Cloudgate gateway.
// Purpose: Provide a single strict, fail-closed configuration source.
// Dependencies: serde, thiserror, toml
// ============================================================================

//! ## Overview
//! Canonical configuration model for the Cloudgate gateway. Configuration is
//! loaded from a TOML file with strict size limits, then overridden by a small
//! set of environment variables. Missing or invalid configuration fails closed
//! to preserve the gateway's local-only security posture.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AuditConfig;
pub use config::ConfigError;
pub use config::CorsConfig;
pub use config::GatewayConfig;
pub use config::RateLimitConfig;
pub use config::SecurityConfig;
pub use config::ServerConfig;
pub use config::ServerTransport;
pub use config::SessionConfig;
pub use config::TransportsConfig;
pub use config::CONFIG_ENV_VAR;
pub use config::HTTP_HOST_ENV_VAR;
pub use config::HTTP_PORT_ENV_VAR;
pub use config::MAX_CONNECTIONS_ENV_VAR;
