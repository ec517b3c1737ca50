//! Config defaults and core validation tests for cloudgate-config.
// crates/cloudgate-config/tests/config_defaults.rs
// =============================================================================
// Module: Config Defaults and Core Validation Tests
// Description: Validate default behavior and core config invariants.
// Purpose: Ensure the default config is valid and critical limits are enforced.
// =============================================================================

use cloudgate_config::ConfigError;
use cloudgate_config::GatewayConfig;
use cloudgate_config::RateLimitConfig;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}

#[test]
fn default_config_validates() -> TestResult {
    let config = GatewayConfig::default();
    config.validate().map_err(|err| err.to_string())?;
    Ok(())
}

#[test]
fn default_config_binds_loopback() -> TestResult {
    let config = GatewayConfig::default();
    if config.server.bind_host != "127.0.0.1" {
        return Err("default bind_host should be loopback".to_string());
    }
    if config.server.allow_non_loopback {
        return Err("allow_non_loopback should default to false".to_string());
    }
    Ok(())
}

#[test]
fn default_config_enables_all_transports() -> TestResult {
    let config = GatewayConfig::default();
    if !(config.server.transports.stdio
        && config.server.transports.http
        && config.server.transports.sse)
    {
        return Err("all transports should be enabled by default".to_string());
    }
    Ok(())
}

#[test]
fn rejects_all_transports_disabled() -> TestResult {
    let mut config = GatewayConfig::default();
    config.server.transports.stdio = false;
    config.server.transports.http = false;
    config.server.transports.sse = false;
    assert_invalid(config.validate(), "at least one transport")
}

#[test]
fn sse_requires_http_transport() -> TestResult {
    let mut config = GatewayConfig::default();
    config.server.transports.http = false;
    config.server.transports.sse = true;
    assert_invalid(config.validate(), "sse transport requires")
}

#[test]
fn rejects_zero_max_connections() -> TestResult {
    let mut config = GatewayConfig::default();
    config.server.max_connections = 0;
    assert_invalid(config.validate(), "max_connections")
}

#[test]
fn rejects_zero_session_ttl() -> TestResult {
    let mut config = GatewayConfig::default();
    config.server.sessions.ttl_ms = 0;
    assert_invalid(config.validate(), "sessions.ttl_ms")
}

#[test]
fn rejects_sub_second_heartbeat() -> TestResult {
    let mut config = GatewayConfig::default();
    config.server.heartbeat_interval_ms = 10;
    assert_invalid(config.validate(), "heartbeat_interval_ms")
}

#[test]
fn rejects_zero_rate_limit_requests() -> TestResult {
    let mut config = GatewayConfig::default();
    config.server.rate_limit = Some(RateLimitConfig {
        max_requests: 0,
        ..RateLimitConfig::default()
    });
    assert_invalid(config.validate(), "rate_limit.max_requests")
}

#[test]
fn rejects_oversized_rate_limit_window() -> TestResult {
    let mut config = GatewayConfig::default();
    config.server.rate_limit = Some(RateLimitConfig {
        window_ms: 600_000,
        ..RateLimitConfig::default()
    });
    assert_invalid(config.validate(), "rate_limit.window_ms")
}

#[test]
fn rejects_origin_without_scheme() -> TestResult {
    let mut config = GatewayConfig::default();
    config.security.allowed_origins = vec!["localhost".to_string()];
    assert_invalid(config.validate(), "allowed_origins entries must include")
}

#[test]
fn rejects_unknown_cors_method() -> TestResult {
    let mut config = GatewayConfig::default();
    config.security.cors.allow_methods = vec!["TRACE".to_string()];
    assert_invalid(config.validate(), "cors.allow_methods")
}

#[test]
fn rejects_traversing_audit_path() -> TestResult {
    let mut config = GatewayConfig::default();
    config.audit.path = Some("../audit.log".to_string());
    assert_invalid(config.validate(), "audit.path")
}
