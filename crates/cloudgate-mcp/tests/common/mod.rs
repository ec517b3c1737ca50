// crates/cloudgate-mcp/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Shared helpers for gateway integration tests.
// Purpose: Provide reusable fixtures for end-to-end transport testing.
// Dependencies: cloudgate-config, cloudgate-mcp
// ============================================================================

//! ## Overview
//! Shared helpers for spawning a gateway on an ephemeral port and speaking
//! plain HTTP/1.1 to it over raw TCP, so the integration suite needs no HTTP
//! client dependency.

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cloudgate_config::GatewayConfig;
use cloudgate_mcp::GatewayError;
use cloudgate_mcp::NoopAuditSink;
use cloudgate_mcp::NoopMetrics;
use cloudgate_mcp::StaticHandlerRegistry;
use cloudgate_mcp::TransportGateway;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Per-read timeout for socket operations.
pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Reserves an ephemeral loopback address for a test server.
pub fn allocate_bind_addr() -> SocketAddr {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").expect("ephemeral bind");
    listener.local_addr().expect("local addr")
}

/// Running gateway fixture bound to an ephemeral port.
pub struct GatewayFixture {
    /// Gateway handle for shutdown and state inspection.
    pub gateway: TransportGateway,
    /// Bound address of the HTTP listener.
    pub addr: SocketAddr,
    /// Serve task; resolves once shutdown completes.
    pub task: tokio::task::JoinHandle<Result<(), GatewayError>>,
}

/// Spawns a gateway with the built-in ping handler on an ephemeral port.
///
/// Stdio is disabled so the test harness keeps its stdin.
pub async fn spawn_gateway(mut config: GatewayConfig) -> GatewayFixture {
    let addr = allocate_bind_addr();
    config.server.transports.stdio = false;
    config.server.bind_host = addr.ip().to_string();
    config.server.port = addr.port();
    let registry = Arc::new(StaticHandlerRegistry::with_builtins());
    let gateway = TransportGateway::new(
        config,
        registry,
        Arc::new(NoopAuditSink),
        Arc::new(NoopMetrics),
    )
    .expect("gateway");
    let runner = gateway.clone();
    let task = tokio::spawn(async move { runner.serve().await });
    wait_until_accepting(addr).await;
    GatewayFixture {
        gateway,
        addr,
        task,
    }
}

/// Waits until the listener accepts connections.
async fn wait_until_accepting(addr: SocketAddr) {
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("gateway listener never became ready");
}

// ============================================================================
// SECTION: Raw HTTP Helpers
// ============================================================================

/// Sends one HTTP/1.1 request with `Connection: close` and returns the whole
/// response (status line, headers, and body) as text.
pub async fn http_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(request.as_bytes()).await.expect("write request");
    let mut buf = Vec::new();
    tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut buf))
        .await
        .expect("response within timeout")
        .expect("read response");
    String::from_utf8_lossy(&buf).to_string()
}

/// Builds a `POST /` request with a JSON body.
pub fn post_request(body: &str, accept: &str) -> String {
    format!(
        "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nAccept: \
         {accept}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Builds a `GET` request for the given path with extra headers.
pub fn get_request(path: &str, extra_headers: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n{extra_headers}\r\n")
}

/// Reads from a stream until the needle appears or the peer closes.
pub async fn read_until(stream: &mut TcpStream, needle: &str) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let read = tokio::time::timeout(IO_TIMEOUT, stream.read(&mut chunk))
            .await
            .expect("read within timeout")
            .expect("read bytes");
        if read == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..read]);
        if String::from_utf8_lossy(&buf).contains(needle) {
            break;
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Reads until the peer closes the stream.
pub async fn read_to_eof(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut buf))
        .await
        .expect("eof within timeout")
        .expect("read to eof");
    String::from_utf8_lossy(&buf).to_string()
}

/// Returns the HTTP status code from a raw response.
pub fn status_of(response: &str) -> u16 {
    response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code")
}
