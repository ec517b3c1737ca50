// crates/cloudgate-mcp/tests/http_transport.rs
// ============================================================================
// Module: HTTP Transport Tests
// Description: End-to-end HTTP and SSE transport validation.
// Purpose: Ensure the gateway speaks protocol-compliant HTTP over real
//          sockets.
// Dependencies: cloudgate-config, cloudgate-mcp, tokio
// ============================================================================

//! ## Overview
//! End-to-end validation of the HTTP surface over raw TCP: health snapshots,
//! JSON and SSE response negotiation, admission rejections, and shutdown
//! draining of live streams.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only transport assertions."
)]

mod common;

// ============================================================================
// SECTION: Imports
// ============================================================================

use cloudgate_config::GatewayConfig;
use common::get_request;
use common::http_request;
use common::post_request;
use common::read_to_eof;
use common::read_until;
use common::spawn_gateway;
use common::status_of;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

// ============================================================================
// SECTION: Health
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn health_endpoint_reports_ok() {
    let fixture = spawn_gateway(GatewayConfig::default()).await;
    let request =
        get_request("/health", "Accept: application/json\r\nConnection: close\r\n");
    let response = http_request(fixture.addr, &request).await;
    assert_eq!(status_of(&response), 200);
    assert!(response.contains("\"status\":\"ok\""));
    assert!(response.contains("\"activeConnections\":0"));
    assert!(response.contains("\"stdio\":false"));
    assert!(response.contains("\"http\":true"));
    fixture.gateway.shutdown();
    let _ = fixture.task.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn responses_carry_the_security_header_bundle() {
    let fixture = spawn_gateway(GatewayConfig::default()).await;
    let request =
        get_request("/health", "Accept: application/json\r\nConnection: close\r\n");
    let response = http_request(fixture.addr, &request).await.to_lowercase();
    assert!(response.contains("x-content-type-options: nosniff"));
    assert!(response.contains("x-frame-options: deny"));
    assert!(response.contains("content-security-policy:"));
    fixture.gateway.shutdown();
    let _ = fixture.task.await;
}

// ============================================================================
// SECTION: JSON Mode
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn ping_round_trips_over_json() {
    let fixture = spawn_gateway(GatewayConfig::default()).await;
    let body = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
    let response =
        http_request(fixture.addr, &post_request(body, "application/json")).await;
    assert_eq!(status_of(&response), 200);
    assert!(response.contains("\"jsonrpc\":\"2.0\""));
    assert!(response.contains("\"id\":1"));
    assert!(response.contains("\"result\""));
    fixture.gateway.shutdown();
    let _ = fixture.task.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn notification_is_acknowledged_with_202() {
    let fixture = spawn_gateway(GatewayConfig::default()).await;
    let body = r#"{"jsonrpc":"2.0","id":9,"result":{"done":true}}"#;
    let response =
        http_request(fixture.addr, &post_request(body, "application/json")).await;
    assert_eq!(status_of(&response), 202);
    fixture.gateway.shutdown();
    let _ = fixture.task.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn blocked_method_is_refused_with_method_not_found() {
    let fixture = spawn_gateway(GatewayConfig::default()).await;
    let body = r#"{"jsonrpc":"2.0","id":2,"method":"system.restart"}"#;
    let response =
        http_request(fixture.addr, &post_request(body, "application/json")).await;
    assert_eq!(status_of(&response), 400);
    assert!(response.contains("-32601"));
    fixture.gateway.shutdown();
    let _ = fixture.task.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_body_is_refused_with_parse_error() {
    let fixture = spawn_gateway(GatewayConfig::default()).await;
    let response = http_request(fixture.addr, &post_request("{broken", "application/json")).await;
    assert_eq!(status_of(&response), 400);
    assert!(response.contains("-32700"));
    fixture.gateway.shutdown();
    let _ = fixture.task.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn hostile_origin_is_refused() {
    let fixture = spawn_gateway(GatewayConfig::default()).await;
    let body = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
    let request = format!(
        "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nOrigin: \
         http://evil.example\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let response = http_request(fixture.addr, &request).await;
    assert_eq!(status_of(&response), 403);
    fixture.gateway.shutdown();
    let _ = fixture.task.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_path_is_not_found() {
    let fixture = spawn_gateway(GatewayConfig::default()).await;
    let request = get_request("/missing", "Connection: close\r\n");
    let response = http_request(fixture.addr, &request).await;
    assert_eq!(status_of(&response), 404);
    fixture.gateway.shutdown();
    let _ = fixture.task.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn preflight_returns_cors_headers() {
    let fixture = spawn_gateway(GatewayConfig::default()).await;
    let request = "OPTIONS / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
    let response = http_request(fixture.addr, request).await.to_lowercase();
    assert_eq!(status_of(&response), 200);
    assert!(response.contains("access-control-allow-methods:"));
    fixture.gateway.shutdown();
    let _ = fixture.task.await;
}

// ============================================================================
// SECTION: SSE Mode
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn ping_streams_status_then_response_over_sse() {
    let fixture = spawn_gateway(GatewayConfig::default()).await;
    let body = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
    let response =
        http_request(fixture.addr, &post_request(body, "text/event-stream")).await;
    assert_eq!(status_of(&response), 200);
    assert!(response.to_lowercase().contains("content-type: text/event-stream"));
    let status_at = response.find("event: status").expect("status event");
    let response_at = response.find("event: response").expect("response event");
    assert!(status_at < response_at);
    assert!(response.contains("id:"));
    assert!(response.contains("\"result\""));
    fixture.gateway.shutdown();
    let _ = fixture.task.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn sse_stream_connects_and_counts_in_health() {
    let fixture = spawn_gateway(GatewayConfig::default()).await;
    let mut stream = TcpStream::connect(fixture.addr).await.expect("connect");
    stream
        .write_all(get_request("/sse", "Accept: text/event-stream\r\n").as_bytes())
        .await
        .expect("write request");
    let opening = read_until(&mut stream, "event: connected").await;
    assert!(opening.contains("\"sessionId\""));
    assert_eq!(fixture.gateway.connections().active(), 1);
    assert_eq!(fixture.gateway.sessions().stats().active, 1);

    let health_request =
        get_request("/health", "Accept: application/json\r\nConnection: close\r\n");
    let health = http_request(fixture.addr, &health_request).await;
    assert!(health.contains("\"activeConnections\":1"));
    assert!(health.contains("\"activeSessions\":1"));

    // Shutdown force-ends the tracked stream and releases the listener.
    fixture.gateway.shutdown();
    let _ = read_to_eof(&mut stream).await;
    assert_eq!(fixture.gateway.connections().active(), 0);
    let served = fixture.task.await.expect("serve task");
    assert!(served.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn excess_sse_connection_is_refused_with_503() {
    let mut config = GatewayConfig::default();
    config.server.max_connections = 1;
    let fixture = spawn_gateway(config).await;
    let mut first = TcpStream::connect(fixture.addr).await.expect("connect");
    first
        .write_all(get_request("/sse", "Accept: text/event-stream\r\n").as_bytes())
        .await
        .expect("write request");
    let _ = read_until(&mut first, "event: connected").await;
    assert_eq!(fixture.gateway.connections().active(), 1);

    let second_request = get_request(
        "/sse",
        "Accept: text/event-stream\r\nConnection: close\r\n",
    );
    let second = http_request(fixture.addr, &second_request).await;
    assert_eq!(status_of(&second), 503);
    assert_eq!(fixture.gateway.connections().active(), 1);

    fixture.gateway.shutdown();
    let _ = fixture.task.await;
}
