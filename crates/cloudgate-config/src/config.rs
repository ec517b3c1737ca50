// crates/cloudgate-config/src/config.rs
// ============================================================================
// Module: Cloudgate Configuration
// Description: Configuration loading and validation for the Cloudgate gateway.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, thiserror, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size limits, then a
//! small set of environment variables is applied on top (bind host, port,
//! connection cap). Defaults favor a local-only bind; a non-loopback bind
//! requires an explicit opt-in flag. Config inputs are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "cloudgate.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "CLOUDGATE_CONFIG";
/// Environment variable overriding the HTTP bind host.
pub const HTTP_HOST_ENV_VAR: &str = "CLOUDGATE_HTTP_HOST";
/// Environment variable overriding the HTTP port.
pub const HTTP_PORT_ENV_VAR: &str = "CLOUDGATE_HTTP_PORT";
/// Environment variable overriding the concurrent connection cap.
pub const MAX_CONNECTIONS_ENV_VAR: &str = "CLOUDGATE_MAX_CONNECTIONS";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Default HTTP bind host (loopback only).
const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
/// Default HTTP port.
const DEFAULT_HTTP_PORT: u16 = 8080;
/// Default maximum concurrent tracked connections.
const DEFAULT_MAX_CONNECTIONS: usize = 100;
/// Maximum allowed concurrent tracked connections.
const MAX_TRACKED_CONNECTIONS: usize = 10_000;
/// Default maximum request body size in bytes.
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Maximum allowed request body size in bytes.
const MAX_BODY_BYTES_LIMIT: usize = 10 * 1024 * 1024;
/// Default SSE heartbeat interval in milliseconds.
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// Minimum allowed heartbeat interval in milliseconds.
const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
/// Maximum allowed heartbeat interval in milliseconds.
const MAX_HEARTBEAT_INTERVAL_MS: u64 = 300_000;
/// Default session time-to-live in milliseconds.
const DEFAULT_SESSION_TTL_MS: u64 = 30 * 60 * 1_000;
/// Default session sweep interval in milliseconds.
const DEFAULT_SESSION_SWEEP_INTERVAL_MS: u64 = 60_000;
/// Minimum allowed session sweep interval in milliseconds.
const MIN_SESSION_SWEEP_INTERVAL_MS: u64 = 1_000;
/// Minimum allowed rate limit window in milliseconds.
pub(crate) const MIN_RATE_LIMIT_WINDOW_MS: u64 = 100;
/// Maximum allowed rate limit window in milliseconds.
pub(crate) const MAX_RATE_LIMIT_WINDOW_MS: u64 = 60_000;
/// Maximum allowed requests per rate limit window.
pub(crate) const MAX_RATE_LIMIT_REQUESTS: u32 = 100_000;
/// Maximum number of tracked rate limit entries.
pub(crate) const MAX_RATE_LIMIT_ENTRIES: usize = 65_536;
/// Default max requests per window when rate limiting is enabled.
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 100;
/// Default rate limit window in milliseconds when enabled.
const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60_000;
/// Default max tracked rate limit entries when enabled.
const DEFAULT_RATE_LIMIT_MAX_ENTRIES: usize = 4_096;
/// Maximum number of allowed origin prefixes.
const MAX_ALLOWED_ORIGINS: usize = 64;
/// Maximum length of a single origin prefix.
const MAX_ORIGIN_LENGTH: usize = 256;
/// Maximum number of blocked user-agent patterns.
const MAX_BLOCKED_USER_AGENTS: usize = 64;
/// Maximum length of a single path component for audit paths.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total audit path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Cloudgate gateway configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GatewayConfig {
    /// Server and transport configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Security gate configuration.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Audit logging configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl GatewayConfig {
    /// Loads configuration from disk using the default resolution rules and
    /// applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match resolve_path(path) {
            Some(resolved) => Self::load_file(&resolved)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is missing, oversized, or
    /// malformed.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies environment variable overrides for host, port, and the
    /// connection cap.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an override value does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var(HTTP_HOST_ENV_VAR) {
            let trimmed = host.trim();
            if trimmed.is_empty() {
                return Err(ConfigError::Invalid(format!("{HTTP_HOST_ENV_VAR} must not be empty")));
            }
            self.server.bind_host = trimmed.to_string();
        }
        if let Ok(port) = env::var(HTTP_PORT_ENV_VAR) {
            self.server.port = port
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid(format!("{HTTP_PORT_ENV_VAR} must be a port")))?;
        }
        if let Ok(max) = env::var(MAX_CONNECTIONS_ENV_VAR) {
            self.server.max_connections = max.trim().parse::<usize>().map_err(|_| {
                ConfigError::Invalid(format!("{MAX_CONNECTIONS_ENV_VAR} must be an integer"))
            })?;
        }
        Ok(())
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.security.validate()?;
        self.audit.validate()?;
        Ok(())
    }
}

/// Server configuration for gateway transports.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Enabled transports.
    #[serde(default)]
    pub transports: TransportsConfig,
    /// Bind host for HTTP/SSE transports.
    #[serde(default = "default_http_host")]
    pub bind_host: String,
    /// Bind port for HTTP/SSE transports.
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Allow binding a non-loopback address (explicit opt-in).
    #[serde(default)]
    pub allow_non_loopback: bool,
    /// Maximum concurrent tracked connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// SSE heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Session lifecycle configuration.
    #[serde(default)]
    pub sessions: SessionConfig,
    /// Optional rate limit configuration.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transports: TransportsConfig::default(),
            bind_host: default_http_host(),
            port: default_http_port(),
            allow_non_loopback: false,
            max_connections: default_max_connections(),
            max_body_bytes: default_max_body_bytes(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            sessions: SessionConfig::default(),
            rate_limit: None,
        }
    }
}

impl ServerConfig {
    /// Validates server transport configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.transports.stdio && !self.transports.http && !self.transports.sse {
            return Err(ConfigError::Invalid(
                "at least one transport must be enabled".to_string(),
            ));
        }
        if self.transports.sse && !self.transports.http {
            return Err(ConfigError::Invalid(
                "sse transport requires the http transport".to_string(),
            ));
        }
        if self.transports.http {
            if self.port == 0 {
                return Err(ConfigError::Invalid("port must be greater than zero".to_string()));
            }
            let host = self.bind_host.trim();
            if host.is_empty() {
                return Err(ConfigError::Invalid("bind_host must not be empty".to_string()));
            }
            let loopback = host == "localhost"
                || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback());
            if !loopback && !self.allow_non_loopback {
                return Err(ConfigError::Invalid(
                    "non-loopback bind_host requires allow_non_loopback".to_string(),
                ));
            }
        }
        if self.max_connections == 0 || self.max_connections > MAX_TRACKED_CONNECTIONS {
            return Err(ConfigError::Invalid(format!(
                "max_connections must be between 1 and {MAX_TRACKED_CONNECTIONS}",
            )));
        }
        if self.max_body_bytes == 0 || self.max_body_bytes > MAX_BODY_BYTES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_body_bytes must be between 1 and {MAX_BODY_BYTES_LIMIT}",
            )));
        }
        if self.heartbeat_interval_ms < MIN_HEARTBEAT_INTERVAL_MS
            || self.heartbeat_interval_ms > MAX_HEARTBEAT_INTERVAL_MS
        {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_interval_ms must be between {MIN_HEARTBEAT_INTERVAL_MS} and \
                 {MAX_HEARTBEAT_INTERVAL_MS}",
            )));
        }
        self.sessions.validate()?;
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        Ok(())
    }
}

/// Enabled transport flags.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TransportsConfig {
    /// Serve newline-delimited JSON-RPC over stdin/stdout.
    #[serde(default = "default_true")]
    pub stdio: bool,
    /// Serve JSON-RPC over HTTP.
    #[serde(default = "default_true")]
    pub http: bool,
    /// Serve SSE streams over the HTTP listener.
    #[serde(default = "default_true")]
    pub sse: bool,
}

impl Default for TransportsConfig {
    fn default() -> Self {
        Self {
            stdio: true,
            http: true,
            sse: true,
        }
    }
}

/// Transport classification for request contexts and audit labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerTransport {
    /// Request arrived over stdin/stdout.
    #[default]
    Stdio,
    /// Request arrived over plain HTTP.
    Http,
    /// Request arrived over an SSE-negotiated channel.
    Sse,
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session time-to-live in milliseconds (last-activity based).
    #[serde(default = "default_session_ttl_ms")]
    pub ttl_ms: u64,
    /// Expiry sweep interval in milliseconds.
    #[serde(default = "default_session_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_session_ttl_ms(),
            sweep_interval_ms: default_session_sweep_interval_ms(),
        }
    }
}

impl SessionConfig {
    /// Validates session lifecycle settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_ms == 0 {
            return Err(ConfigError::Invalid(
                "sessions.ttl_ms must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval_ms < MIN_SESSION_SWEEP_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "sessions.sweep_interval_ms must be at least {MIN_SESSION_SWEEP_INTERVAL_MS}",
            )));
        }
        Ok(())
    }
}

/// Rate limit configuration for gateway requests.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per time window (token bucket capacity).
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: u32,
    /// Window duration in milliseconds (full bucket refill time).
    #[serde(default = "default_rate_limit_window_ms")]
    pub window_ms: u64,
    /// Maximum number of distinct client entries.
    #[serde(default = "default_rate_limit_max_entries")]
    pub max_entries: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_max_requests(),
            window_ms: default_rate_limit_window_ms(),
            max_entries: default_rate_limit_max_entries(),
        }
    }
}

impl RateLimitConfig {
    /// Validates rate limit settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_requests must be greater than zero".to_string(),
            ));
        }
        if self.max_requests > MAX_RATE_LIMIT_REQUESTS {
            return Err(ConfigError::Invalid("rate_limit.max_requests too large".to_string()));
        }
        if self.window_ms < MIN_RATE_LIMIT_WINDOW_MS || self.window_ms > MAX_RATE_LIMIT_WINDOW_MS {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.window_ms must be between {MIN_RATE_LIMIT_WINDOW_MS} and \
                 {MAX_RATE_LIMIT_WINDOW_MS}",
            )));
        }
        if self.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_entries must be greater than zero".to_string(),
            ));
        }
        if self.max_entries > MAX_RATE_LIMIT_ENTRIES {
            return Err(ConfigError::Invalid("rate_limit.max_entries too large".to_string()));
        }
        Ok(())
    }
}

/// Security gate configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Allowed origin prefixes for browser requests.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Blocklisted user-agent substrings (case-insensitive).
    #[serde(default = "default_blocked_user_agents")]
    pub blocked_user_agents: Vec<String>,
    /// CORS configuration for preflight responses.
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            blocked_user_agents: default_blocked_user_agents(),
            cors: CorsConfig::default(),
        }
    }
}

impl SecurityConfig {
    /// Validates security gate settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_origins.len() > MAX_ALLOWED_ORIGINS {
            return Err(ConfigError::Invalid("too many allowed_origins".to_string()));
        }
        for origin in &self.allowed_origins {
            let trimmed = origin.trim();
            if trimmed.is_empty() || trimmed.len() > MAX_ORIGIN_LENGTH {
                return Err(ConfigError::Invalid("invalid allowed_origins entry".to_string()));
            }
            if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
                return Err(ConfigError::Invalid(
                    "allowed_origins entries must include http:// or https://".to_string(),
                ));
            }
        }
        if self.blocked_user_agents.len() > MAX_BLOCKED_USER_AGENTS {
            return Err(ConfigError::Invalid("too many blocked_user_agents".to_string()));
        }
        for pattern in &self.blocked_user_agents {
            if pattern.trim().is_empty() {
                return Err(ConfigError::Invalid("empty blocked_user_agents entry".to_string()));
            }
        }
        self.cors.validate()?;
        Ok(())
    }
}

/// CORS preflight configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Value for `Access-Control-Allow-Origin`.
    #[serde(default = "default_cors_allow_origin")]
    pub allow_origin: String,
    /// Allowed methods for preflight responses.
    #[serde(default = "default_cors_allow_methods")]
    pub allow_methods: Vec<String>,
    /// Allowed request headers for preflight responses.
    #[serde(default = "default_cors_allow_headers")]
    pub allow_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: default_cors_allow_origin(),
            allow_methods: default_cors_allow_methods(),
            allow_headers: default_cors_allow_headers(),
        }
    }
}

impl CorsConfig {
    /// Validates CORS settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.allow_origin.trim().is_empty() {
            return Err(ConfigError::Invalid("cors.allow_origin must not be empty".to_string()));
        }
        if self.allow_methods.is_empty() {
            return Err(ConfigError::Invalid("cors.allow_methods must not be empty".to_string()));
        }
        for method in &self.allow_methods {
            if !matches!(method.as_str(), "GET" | "POST" | "OPTIONS" | "HEAD") {
                return Err(ConfigError::Invalid(format!(
                    "cors.allow_methods entry {method} is not supported",
                )));
            }
        }
        Ok(())
    }
}

/// Audit logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Enable structured audit logging.
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// Optional audit log path (JSON lines); stderr when absent.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            path: None,
        }
    }
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("audit.path", path)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Filesystem errors while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parse errors.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Semantic validation errors.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from an explicit argument, the environment, or
/// the default filename in the working directory. Returns `None` when no
/// config file is present anywhere.
fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
    if let Some(explicit) = path {
        return Some(explicit.to_path_buf());
    }
    if let Ok(from_env) = env::var(CONFIG_ENV_VAR) {
        let trimmed = from_env.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    let default = PathBuf::from(DEFAULT_CONFIG_NAME);
    default.is_file().then_some(default)
}

/// Validates a user-supplied path string against traversal and length limits.
fn validate_path_string(field: &str, path: &str) -> Result<(), ConfigError> {
    if path.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must not be empty")));
    }
    if path.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds length limit")));
    }
    for component in Path::new(path).components() {
        let text = component.as_os_str().to_string_lossy();
        if text == ".." {
            return Err(ConfigError::Invalid(format!("{field} must not traverse upward")));
        }
        if text.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} component exceeds length limit")));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Returns the default HTTP bind host.
fn default_http_host() -> String {
    DEFAULT_HTTP_HOST.to_string()
}

/// Returns the default HTTP port.
const fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

/// Returns the default concurrent connection cap.
const fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

/// Returns the default maximum request body size.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Returns the default heartbeat interval.
const fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

/// Returns the default session TTL.
const fn default_session_ttl_ms() -> u64 {
    DEFAULT_SESSION_TTL_MS
}

/// Returns the default session sweep interval.
const fn default_session_sweep_interval_ms() -> u64 {
    DEFAULT_SESSION_SWEEP_INTERVAL_MS
}

/// Returns the default token bucket capacity.
const fn default_rate_limit_max_requests() -> u32 {
    DEFAULT_RATE_LIMIT_MAX_REQUESTS
}

/// Returns the default token bucket refill window.
const fn default_rate_limit_window_ms() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_MS
}

/// Returns the default rate limit entry cap.
const fn default_rate_limit_max_entries() -> usize {
    DEFAULT_RATE_LIMIT_MAX_ENTRIES
}

/// Returns the default origin allow-list (local development origins).
fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://127.0.0.1".to_string(),
        "https://localhost".to_string(),
        "https://127.0.0.1".to_string(),
    ]
}

/// Returns the default blocked user-agent substrings.
fn default_blocked_user_agents() -> Vec<String> {
    vec![
        "sqlmap".to_string(),
        "nikto".to_string(),
        "nessus".to_string(),
        "masscan".to_string(),
        "nmap".to_string(),
        "dirbuster".to_string(),
    ]
}

/// Returns the default CORS allow-origin value.
fn default_cors_allow_origin() -> String {
    "*".to_string()
}

/// Returns the default CORS allowed methods.
fn default_cors_allow_methods() -> Vec<String> {
    vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()]
}

/// Returns the default CORS allowed headers.
fn default_cors_allow_headers() -> Vec<String> {
    vec!["Content-Type".to_string(), "Accept".to_string(), "Last-Event-ID".to_string()]
}

/// Returns true; used for serde defaults on transport flags.
const fn default_true() -> bool {
    true
}

/// Returns the default audit enabled flag.
const fn default_audit_enabled() -> bool {
    true
}
