// crates/cloudgate-cli/src/main.rs
// ============================================================================
// Module: Cloudgate CLI Entry Point
// Description: Command dispatcher for the Cloudgate gateway.
// Purpose: Provide a safe local CLI for serving and config validation.
// Dependencies: clap, cloudgate-config, cloudgate-mcp, tokio
// ============================================================================

//! ## Overview
//! The Cloudgate CLI loads configuration (file plus environment overrides),
//! wires the audit sink and the built-in handler registry, and runs the
//! transport gateway until interrupted. Security posture: configuration
//! inputs are untrusted and validated before any socket is bound.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use cloudgate_config::GatewayConfig;
use cloudgate_mcp::AuditSink;
use cloudgate_mcp::FileAuditSink;
use cloudgate_mcp::NoopAuditSink;
use cloudgate_mcp::NoopMetrics;
use cloudgate_mcp::StaticHandlerRegistry;
use cloudgate_mcp::StderrAuditSink;
use cloudgate_mcp::TransportGateway;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Definition
// ============================================================================

/// Cloudgate command-line interface.
#[derive(Parser)]
#[command(name = "cloudgate", version, about = "Protocol gateway for tool registries")]
struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the gateway on every enabled transport.
    Serve(ServeCommand),
    /// Configuration utilities.
    Config(ConfigCommand),
}

/// Arguments for the serve command.
#[derive(Args)]
struct ServeCommand {
    /// Path to the gateway TOML configuration.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Arguments for the config command group.
#[derive(Args)]
struct ConfigCommand {
    /// Config subcommand to run.
    #[command(subcommand)]
    command: ConfigSubcommand,
}

/// Configuration subcommands.
#[derive(Subcommand)]
enum ConfigSubcommand {
    /// Validate configuration and exit.
    Validate(ConfigValidateCommand),
}

/// Arguments for config validation.
#[derive(Args)]
struct ConfigValidateCommand {
    /// Path to the gateway TOML configuration.
    #[arg(long)]
    config: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failures surfaced to the operator.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration loading or validation failed.
    #[error("{0}")]
    Config(String),
    /// Gateway startup or serving failed.
    #[error("{0}")]
    Gateway(String),
}

/// Result alias for CLI commands.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Parses arguments and dispatches to the selected command.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::Config(command) => command_config(&command),
    }
}

/// Writes an error line to stderr and returns a failure code.
fn emit_error(message: &str) -> ExitCode {
    let _ = writeln!(std::io::stderr(), "cloudgate: error: {message}");
    ExitCode::FAILURE
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Loads configuration and serves until the gateway stops or ctrl-c arrives.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = GatewayConfig::load(command.config.as_deref())
        .map_err(|err| CliError::Config(err.to_string()))?;
    let audit = build_audit_sink(&config)?;
    let registry = Arc::new(StaticHandlerRegistry::with_builtins());
    let gateway = TransportGateway::new(config, registry, audit, Arc::new(NoopMetrics))
        .map_err(|err| CliError::Gateway(err.to_string()))?;
    let runner = gateway.clone();
    let mut serve_task = tokio::spawn(async move { runner.serve().await });
    tokio::select! {
        served = &mut serve_task => {
            served
                .map_err(|err| CliError::Gateway(err.to_string()))?
                .map_err(|err| CliError::Gateway(err.to_string()))?;
        }
        _ = tokio::signal::ctrl_c() => {
            gateway.shutdown();
            let _ = serve_task.await;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Builds the audit sink selected by configuration.
fn build_audit_sink(config: &GatewayConfig) -> CliResult<Arc<dyn AuditSink>> {
    if !config.audit.enabled {
        return Ok(Arc::new(NoopAuditSink));
    }
    match &config.audit.path {
        Some(path) => {
            let sink = FileAuditSink::new(std::path::Path::new(path))
                .map_err(|err| CliError::Config(format!("audit log open failed: {err}")))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(StderrAuditSink)),
    }
}

// ============================================================================
// SECTION: Config Command
// ============================================================================

/// Dispatches configuration subcommands.
fn command_config(command: &ConfigCommand) -> CliResult<ExitCode> {
    match &command.command {
        ConfigSubcommand::Validate(validate) => command_config_validate(validate),
    }
}

/// Validates configuration and reports the outcome.
fn command_config_validate(command: &ConfigValidateCommand) -> CliResult<ExitCode> {
    GatewayConfig::load(command.config.as_deref())
        .map_err(|err| CliError::Config(err.to_string()))?;
    let _ = writeln!(std::io::stdout(), "configuration valid");
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
