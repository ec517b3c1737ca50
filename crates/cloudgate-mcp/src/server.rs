// crates/cloudgate-mcp/src/server.rs
// ============================================================================
// Module: Transport Gateway
// Description: Gateway implementations for stdio, HTTP, and SSE transports.
// Purpose: Route admitted requests into the handler registry and negotiate
//          the response shape.
// Dependencies: cloudgate-config, axum, tokio
// ============================================================================

//! ## Overview
//! The transport gateway exposes the handler registry using JSON-RPC 2.0 over
//! stdio, HTTP, and SSE. Every HTTP request passes the security gate before
//! parsing, every parsed request is shape-checked before dispatch, and every
//! response is one of three shapes: a JSON body, a kept-open event stream, or
//! a typed rejection. Stdio is a trusted local channel and skips the gate.
//! Security posture: HTTP inputs are untrusted until admitted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;
use std::time::Instant;

use axum::Router;
use axum::extract::ConnectInfo;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::ACCEPT;
use axum::http::header::RETRY_AFTER;
use axum::http::header::USER_AGENT;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::response::Sse;
use axum::response::sse::Event;
use axum::routing::get;
use axum::routing::post;
use bytes::Bytes;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;

use crate::audit::AuditSink;
use crate::audit::GatewayAuditEvent;
use crate::audit::GatewayAuditEventParams;
use crate::audit::SecurityAuditEvent;
use crate::audit::Severity;
use crate::audit::epoch_ms;
use crate::config::GatewayConfig;
use crate::config::ServerTransport;
use crate::connection::ConnectionKind;
use crate::connection::ConnectionTracker;
use crate::handlers::HandlerError;
use crate::handlers::HandlerRegistry;
use crate::handlers::RequestContext;
use crate::jsonrpc;
use crate::jsonrpc::CodecError;
use crate::jsonrpc::Frame;
use crate::jsonrpc::JsonRpcResponse;
use crate::jsonrpc::RequestFrame;
use crate::security::AdmissionError;
use crate::security::SecurityGate;
use crate::security::apply_security_headers;
use crate::security::sanitize;
use crate::session::SessionId;
use crate::session::SessionRegistry;
use crate::telemetry::GatewayMethod;
use crate::telemetry::GatewayMetrics;
use crate::telemetry::GatewayOutcome;
use crate::telemetry::MetricEvent;


// ============================================================================
// SECTION: Constants
// ============================================================================

/// Buffered events per stream before the writer awaits the client.
const STREAM_CHANNEL_CAPACITY: usize = 16;

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Shared state owned by one gateway instance.
///
/// # Invariants
/// - The session table and connection set have exactly one owner; transports
///   hold only ids.
pub(crate) struct GatewayState {
    /// Validated configuration snapshot.
    config: GatewayConfig,
    /// Admission validator for HTTP transports.
    security: SecurityGate,
    /// Session table.
    sessions: SessionRegistry,
    /// Live stream connection set.
    connections: ConnectionTracker,
    /// Opaque handler registry.
    registry: Arc<dyn HandlerRegistry>,
    /// Request audit sink.
    audit: Arc<dyn AuditSink>,
    /// Metrics sink.
    metrics: Arc<dyn GatewayMetrics>,
    /// Monotonic SSE event id source.
    event_ids: EventIdSequence,
}

/// Transport gateway serving stdio, HTTP, and SSE.
#[derive(Clone)]
pub struct TransportGateway {
    /// Shared gateway state.
    state: Arc<GatewayState>,
    /// Shutdown signal observed by all transport loops.
    shutdown: watch::Sender<bool>,
}

impl TransportGateway {
    /// Builds a gateway from configuration and collaborator seams.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the configuration is invalid.
    pub fn new(
        config: GatewayConfig,
        registry: Arc<dyn HandlerRegistry>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<dyn GatewayMetrics>,
    ) -> Result<Self, GatewayError> {
        config.validate().map_err(|err| GatewayError::Config(err.to_string()))?;
        let security =
            SecurityGate::new(&config.security, config.server.rate_limit.clone(), audit.clone());
        let sessions = SessionRegistry::new(Duration::from_millis(config.server.sessions.ttl_ms));
        let connections = ConnectionTracker::new(config.server.max_connections);
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            state: Arc::new(GatewayState {
                config,
                security,
                sessions,
                connections,
                registry,
                audit,
                metrics,
                event_ids: EventIdSequence::new(),
            }),
            shutdown,
        })
    }

    /// Serves requests on every enabled transport until shutdown.
    ///
    /// Returns only after the listening socket has been released and the
    /// stdio loop has exited.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when a transport fails.
    pub async fn serve(&self) -> Result<(), GatewayError> {
        let sweep = tokio::spawn(run_session_sweep(
            self.state.clone(),
            self.shutdown.subscribe(),
        ));
        let http_state = self.state.clone();
        let http_shutdown = self.shutdown.subscribe();
        let http = async move {
            if http_state.config.server.transports.http {
                serve_http(http_state, http_shutdown).await
            } else {
                Ok(())
            }
        };
        let stdio_state = self.state.clone();
        let stdio_shutdown = self.shutdown.subscribe();
        let stdio = async move {
            if stdio_state.config.server.transports.stdio {
                serve_stdio(stdio_state, stdio_shutdown).await
            } else {
                Ok(())
            }
        };
        let result = tokio::try_join!(http, stdio).map(|_| ());
        sweep.abort();
        result
    }

    /// Ends every tracked stream, clears the connection set, and signals the
    /// transport loops to stop. [`Self::serve`] returns once the listener has
    /// fully released.
    pub fn shutdown(&self) {
        self.state.connections.close_all();
        let _ = self.shutdown.send(true);
    }

    /// Returns the session registry owned by this gateway.
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.state.sessions
    }

    /// Returns the connection tracker owned by this gateway.
    #[must_use]
    pub fn connections(&self) -> &ConnectionTracker {
        &self.state.connections
    }
}

// ============================================================================
// SECTION: Event Ids
// ============================================================================

/// Monotonic source of globally unique SSE event ids.
///
/// # Invariants
/// - Ids are strictly increasing within one process and seeded from the
///   startup wall clock so restarts do not reuse recent ids.
pub(crate) struct EventIdSequence {
    /// Next id to hand out.
    counter: AtomicU64,
}

impl EventIdSequence {
    /// Creates a sequence seeded from the current wall clock.
    pub(crate) fn new() -> Self {
        let seed = u64::try_from(epoch_ms()).unwrap_or(0);
        Self {
            counter: AtomicU64::new(seed),
        }
    }

    /// Returns the next event id.
    pub(crate) fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

// ============================================================================
// SECTION: Response Shapes
// ============================================================================

/// Tagged response shape produced by the request pipeline.
pub(crate) enum GatewayResponse {
    /// Single synchronous JSON-RPC body.
    Json {
        /// HTTP status for the response.
        status: StatusCode,
        /// JSON-RPC envelope body.
        envelope: JsonRpcResponse,
    },
    /// Acknowledgement without a body (notifications and responses).
    Accepted,
    /// Kept-open event stream.
    Stream(Sse<GuardedStream>),
    /// Admission rejection with a plain JSON body.
    Rejected {
        /// HTTP status for the rejection.
        status: StatusCode,
        /// JSON rejection body.
        body: Value,
        /// Optional `Retry-After` delay in milliseconds.
        retry_after_ms: Option<u64>,
    },
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut response = match self {
            Self::Json {
                status,
                envelope,
            } => (status, axum::Json(envelope)).into_response(),
            Self::Accepted => StatusCode::ACCEPTED.into_response(),
            Self::Stream(sse) => sse.into_response(),
            Self::Rejected {
                status,
                body,
                retry_after_ms,
            } => {
                let mut rejection = (status, axum::Json(body)).into_response();
                if let Some(ms) = retry_after_ms {
                    let seconds = ms.div_ceil(1_000).max(1);
                    if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                        rejection.headers_mut().insert(RETRY_AFTER, value);
                    }
                }
                rejection
            }
        };
        apply_security_headers(response.headers_mut());
        response
    }
}

/// Stream event representation decoupled from the wire type for testing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamEvent {
    /// SSE event name.
    pub(crate) name: &'static str,
    /// Optional event id (set where resumability matters).
    pub(crate) id: Option<String>,
    /// Event data payload (JSON text).
    pub(crate) data: String,
}

impl StreamEvent {
    /// Converts the event to the axum wire type.
    fn into_sse(self) -> Event {
        let mut event = Event::default().event(self.name).data(self.data);
        if let Some(id) = self.id {
            event = event.id(id);
        }
        event
    }
}

/// Drop guard tying a stream's lifetime to its session and connection slot.
struct StreamGuard {
    /// Shared gateway state.
    state: Arc<GatewayState>,
    /// Tracked connection slot.
    connection_id: crate::connection::ConnectionId,
    /// Session owned by this stream.
    session_id: SessionId,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.state.connections.release(self.connection_id);
        self.state.sessions.invalidate(&self.session_id);
    }
}

/// Event stream that releases its session and connection slot on drop.
pub(crate) struct GuardedStream {
    /// Buffered event source fed by the writer task.
    inner: ReceiverStream<Event>,
    /// Teardown guard.
    _guard: StreamGuard,
}

impl Stream for GuardedStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|event| event.map(Ok))
    }
}

// ============================================================================
// SECTION: HTTP Transport
// ============================================================================

/// Serves the HTTP and SSE surface until shutdown.
async fn serve_http(
    state: Arc<GatewayState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), GatewayError> {
    let host = state.config.server.bind_host.clone();
    let port = state.config.server.port;
    let app = router(state);
    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .map_err(|err| GatewayError::Transport(format!("http bind failed: {err}")))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|_| GatewayError::Transport("http server failed".to_string()))
}

/// Builds the HTTP route table.
fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/sse", get(handle_sse_stream))
        .route("/", post(handle_post).options(handle_preflight))
        .fallback(handle_fallback)
        .with_state(state)
}

/// Handles `GET /health` with a JSON snapshot; no session is created.
async fn handle_health(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let peer_ip = Some(peer.ip());
    // The capacity check does not apply: health never opens a stream.
    if let Err(error) = state.security.admit(ServerTransport::Http, &headers, peer_ip, true) {
        let response = rejection_response(&error);
        record_request(&state, RequestRecord {
            transport: ServerTransport::Http,
            peer_ip,
            request_id: None,
            session_id: None,
            method: GatewayMethod::Health,
            outcome: GatewayOutcome::Error,
            error_code: None,
            request_bytes: 0,
            response_bytes: 0,
            started,
        });
        return response.into_response();
    }
    let body = health_body(&state);
    let response_bytes = body.to_string().len();
    record_request(&state, RequestRecord {
        transport: ServerTransport::Http,
        peer_ip,
        request_id: None,
        session_id: None,
        method: GatewayMethod::Health,
        outcome: GatewayOutcome::Ok,
        error_code: None,
        request_bytes: 0,
        response_bytes,
        started,
    });
    let mut response = (StatusCode::OK, axum::Json(body)).into_response();
    apply_security_headers(response.headers_mut());
    response
}

/// Builds the health snapshot body.
fn health_body(state: &GatewayState) -> Value {
    json!({
        "status": "ok",
        "timestamp": epoch_ms(),
        "activeConnections": state.connections.active(),
        "activeSessions": state.sessions.stats().active,
        "transport": {
            "stdio": state.config.server.transports.stdio,
            "http": state.config.server.transports.http,
            "sse": state.config.server.transports.sse,
        },
    })
}

/// Handles `GET /sse`: a long-lived stream with connected and heartbeat
/// events.
async fn handle_sse_stream(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let peer_ip = Some(peer.ip());
    if !state.config.server.transports.sse {
        let mut response = StatusCode::NOT_FOUND.into_response();
        apply_security_headers(response.headers_mut());
        return response;
    }
    if let Err(error) = state.security.admit(
        ServerTransport::Sse,
        &headers,
        peer_ip,
        state.connections.has_capacity(),
    ) {
        return rejection_response(&error).into_response();
    }
    let metadata = stream_metadata(ConnectionKind::Sse, peer, &headers, None);
    let session_id = state.sessions.create(metadata);
    let (tx, rx) = mpsc::channel::<Event>(STREAM_CHANNEL_CAPACITY);
    let writer = tokio::spawn(sse_stream_writer(state.clone(), session_id.clone(), tx));
    let abort = writer.abort_handle();
    let connection_id = match state.connections.register(ConnectionKind::Sse, abort) {
        Ok(id) => id,
        Err(_) => {
            writer.abort();
            state.sessions.invalidate(&session_id);
            return rejection_response(&AdmissionError::ConnectionLimit).into_response();
        }
    };
    record_request(&state, RequestRecord {
        transport: ServerTransport::Sse,
        peer_ip,
        request_id: None,
        session_id: Some(session_id.to_string()),
        method: GatewayMethod::SseStream,
        outcome: GatewayOutcome::Ok,
        error_code: None,
        request_bytes: 0,
        response_bytes: 0,
        started,
    });
    let guard = StreamGuard {
        state: state.clone(),
        connection_id,
        session_id,
    };
    GatewayResponse::Stream(Sse::new(GuardedStream {
        inner: ReceiverStream::new(rx),
        _guard: guard,
    }))
    .into_response()
}

/// Writer loop for a long-lived SSE stream: one connected event, then
/// heartbeats until the client goes away or shutdown aborts the task.
async fn sse_stream_writer(
    state: Arc<GatewayState>,
    session_id: SessionId,
    tx: mpsc::Sender<Event>,
) {
    let connected = connected_event(&session_id);
    if tx.send(connected.into_sse()).await.is_err() {
        return;
    }
    let mut ticker =
        tokio::time::interval(Duration::from_millis(state.config.server.heartbeat_interval_ms));
    // The first tick completes immediately; consume it so heartbeats start one
    // interval after the connected event.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        state.sessions.touch(&session_id);
        if tx.send(heartbeat_event().into_sse()).await.is_err() {
            return;
        }
    }
}

/// Builds the `connected` event carrying the session id.
fn connected_event(session_id: &SessionId) -> StreamEvent {
    StreamEvent {
        name: "connected",
        id: None,
        data: json!({ "sessionId": session_id.as_str() }).to_string(),
    }
}

/// Builds a `heartbeat` event with the current timestamp.
fn heartbeat_event() -> StreamEvent {
    StreamEvent {
        name: "heartbeat",
        id: None,
        data: json!({ "timestamp": epoch_ms() }).to_string(),
    }
}

/// Handles `POST /`: the admission, parse, and dispatch pipeline.
async fn handle_post(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    process_post(&state, peer, &headers, &body).await.into_response()
}

/// Runs the full POST pipeline and returns the tagged response shape.
async fn process_post(
    state: &Arc<GatewayState>,
    peer: SocketAddr,
    headers: &HeaderMap,
    body: &Bytes,
) -> GatewayResponse {
    let started = Instant::now();
    let peer_ip = Some(peer.ip());
    let request_bytes = body.len();
    if let Err(error) = state.security.admit(
        ServerTransport::Http,
        headers,
        peer_ip,
        state.connections.has_capacity(),
    ) {
        let response = rejection_response(&error);
        record_request(state, RequestRecord {
            transport: ServerTransport::Http,
            peer_ip,
            request_id: None,
            session_id: None,
            method: GatewayMethod::Rejected,
            outcome: GatewayOutcome::Error,
            error_code: None,
            request_bytes,
            response_bytes: 0,
            started,
        });
        return response;
    }
    if request_bytes > state.config.server.max_body_bytes {
        let envelope = JsonRpcResponse::error(
            Value::Null,
            jsonrpc::INVALID_REQUEST,
            "request body too large",
        );
        return finish_json(state, PostRecord {
            peer_ip,
            request_id: None,
            method: GatewayMethod::Invalid,
            status: StatusCode::PAYLOAD_TOO_LARGE,
            envelope,
            request_bytes,
            started,
        });
    }
    let frame = match jsonrpc::decode(body) {
        Err(CodecError::Parse) => {
            let envelope =
                JsonRpcResponse::error(Value::Null, jsonrpc::PARSE_ERROR, "parse error");
            return finish_json(state, PostRecord {
                peer_ip,
                request_id: None,
                method: GatewayMethod::Invalid,
                status: StatusCode::BAD_REQUEST,
                envelope,
                request_bytes,
                started,
            });
        }
        Err(CodecError::Shape(message)) => {
            let envelope =
                JsonRpcResponse::error(Value::Null, jsonrpc::INVALID_REQUEST, message);
            return finish_json(state, PostRecord {
                peer_ip,
                request_id: None,
                method: GatewayMethod::Invalid,
                status: StatusCode::BAD_REQUEST,
                envelope,
                request_bytes,
                started,
            });
        }
        Ok(Frame::Notification) => {
            record_request(state, RequestRecord {
                transport: ServerTransport::Http,
                peer_ip,
                request_id: None,
                session_id: None,
                method: GatewayMethod::Notification,
                outcome: GatewayOutcome::Ok,
                error_code: None,
                request_bytes,
                response_bytes: 0,
                started,
            });
            return GatewayResponse::Accepted;
        }
        Ok(Frame::Request(frame)) => frame,
    };
    let request_id = frame.id.to_string();
    if !state.security.check_method(ServerTransport::Http, peer_ip, &frame.method) {
        let envelope =
            JsonRpcResponse::error(frame.id, jsonrpc::METHOD_NOT_FOUND, "method not allowed");
        return finish_json(state, PostRecord {
            peer_ip,
            request_id: Some(request_id),
            method: GatewayMethod::Invalid,
            status: StatusCode::BAD_REQUEST,
            envelope,
            request_bytes,
            started,
        });
    }
    if accepts_event_stream(headers) && state.config.server.transports.sse {
        return sse_request_response(state, peer, headers, frame, request_bytes, started);
    }
    let context = RequestContext::http(ServerTransport::Http, peer_ip)
        .with_request_id(request_id.clone());
    let (status, envelope) =
        dispatch_to_envelope(state, &context, frame.method, frame.id, frame.params).await;
    finish_json(state, PostRecord {
        peer_ip,
        request_id: Some(request_id),
        method: GatewayMethod::Dispatch,
        status,
        envelope,
        request_bytes,
        started,
    })
}

/// Handles `OPTIONS`: permissive CORS preflight with no body.
async fn handle_preflight(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let peer_ip = Some(peer.ip());
    if let Err(error) = state.security.admit(ServerTransport::Http, &headers, peer_ip, true) {
        return rejection_response(&error).into_response();
    }
    let cors = &state.config.security.cors;
    let mut response = StatusCode::OK.into_response();
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&cors.allow_origin) {
        response_headers.insert("access-control-allow-origin", value);
    }
    if let Ok(value) = HeaderValue::from_str(&cors.allow_methods.join(", ")) {
        response_headers.insert("access-control-allow-methods", value);
    }
    if let Ok(value) = HeaderValue::from_str(&cors.allow_headers.join(", ")) {
        response_headers.insert("access-control-allow-headers", value);
    }
    response_headers.insert("access-control-max-age", HeaderValue::from_static("86400"));
    apply_security_headers(response_headers);
    response
}

/// Handles every unrouted path: preflight for OPTIONS, 404 otherwise.
async fn handle_fallback(
    state: State<Arc<GatewayState>>,
    connect_info: ConnectInfo<SocketAddr>,
    method: axum::http::Method,
    headers: HeaderMap,
) -> Response {
    if method == axum::http::Method::OPTIONS {
        return handle_preflight(state, connect_info, headers).await;
    }
    let mut response = StatusCode::NOT_FOUND.into_response();
    apply_security_headers(response.headers_mut());
    response
}

/// Returns whether the Accept header negotiates an event stream.
fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.to_lowercase().contains("text/event-stream"))
}

/// Builds session metadata for a stream admission.
fn stream_metadata(
    kind: ConnectionKind,
    peer: SocketAddr,
    headers: &HeaderMap,
    request_id: Option<&str>,
) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("connection_type".to_string(), kind.as_str().to_string());
    metadata.insert("remote_addr".to_string(), sanitize(&peer.to_string()));
    if let Some(agent) = headers.get(USER_AGENT).and_then(|value| value.to_str().ok()) {
        metadata.insert("user_agent".to_string(), sanitize(agent));
    }
    if let Some(id) = request_id {
        metadata.insert("request_id".to_string(), sanitize(id));
    }
    metadata
}

// ============================================================================
// SECTION: SSE Request Mode
// ============================================================================

/// Responds to a POST through a single-use SSE stream.
fn sse_request_response(
    state: &Arc<GatewayState>,
    peer: SocketAddr,
    headers: &HeaderMap,
    frame: RequestFrame,
    request_bytes: usize,
    started: Instant,
) -> GatewayResponse {
    let peer_ip = Some(peer.ip());
    let request_id = frame.id.to_string();
    let metadata =
        stream_metadata(ConnectionKind::SseRequest, peer, headers, Some(&request_id));
    let session_id = state.sessions.create(metadata);
    let context = RequestContext::http(ServerTransport::Sse, peer_ip)
        .with_request_id(request_id.clone())
        .with_session(session_id.clone());
    let (tx, rx) = mpsc::channel::<Event>(STREAM_CHANNEL_CAPACITY);
    let writer = tokio::spawn(sse_request_writer(state.clone(), context, frame, tx));
    let abort = writer.abort_handle();
    let connection_id = match state.connections.register(ConnectionKind::SseRequest, abort) {
        Ok(id) => id,
        Err(_) => {
            writer.abort();
            state.sessions.invalidate(&session_id);
            return rejection_response(&AdmissionError::ConnectionLimit);
        }
    };
    record_request(state, RequestRecord {
        transport: ServerTransport::Sse,
        peer_ip,
        request_id: Some(request_id),
        session_id: Some(session_id.to_string()),
        method: GatewayMethod::Dispatch,
        outcome: GatewayOutcome::Ok,
        error_code: None,
        request_bytes,
        response_bytes: 0,
        started,
    });
    let guard = StreamGuard {
        state: state.clone(),
        connection_id,
        session_id,
    };
    GatewayResponse::Stream(Sse::new(GuardedStream {
        inner: ReceiverStream::new(rx),
        _guard: guard,
    }))
}

/// Writer for the single-use stream: status event, dispatch, terminal event,
/// close. Dropping the sender ends the stream, which releases the session and
/// connection through the stream guard.
async fn sse_request_writer(
    state: Arc<GatewayState>,
    context: RequestContext,
    frame: RequestFrame,
    tx: mpsc::Sender<Event>,
) {
    for event in sse_request_events(&state, &context, frame).await {
        if tx.send(event.into_sse()).await.is_err() {
            return;
        }
    }
}

/// Produces the ordered event sequence for a single-use SSE response.
pub(crate) async fn sse_request_events(
    state: &Arc<GatewayState>,
    context: &RequestContext,
    frame: RequestFrame,
) -> Vec<StreamEvent> {
    let status = StreamEvent {
        name: "status",
        id: None,
        data: json!({ "state": "processing" }).to_string(),
    };
    let outcome =
        dispatch_isolated(state.registry.clone(), context.clone(), frame.method, frame.params)
            .await;
    let terminal = match outcome {
        Ok(result) => {
            let envelope = JsonRpcResponse::result(frame.id, result);
            StreamEvent {
                name: "response",
                id: Some(state.event_ids.next().to_string()),
                data: encode_envelope(&envelope),
            }
        }
        Err(error) => {
            let (_, envelope) = handler_error_envelope(frame.id, &error);
            StreamEvent {
                name: "error",
                id: Some(state.event_ids.next().to_string()),
                data: encode_envelope(&envelope),
            }
        }
    };
    vec![status, terminal]
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Dispatches to the registry and maps the result to a JSON-RPC envelope.
async fn dispatch_to_envelope(
    state: &Arc<GatewayState>,
    context: &RequestContext,
    method: String,
    id: Value,
    params: Option<Value>,
) -> (StatusCode, JsonRpcResponse) {
    match dispatch_isolated(state.registry.clone(), context.clone(), method, params).await {
        Ok(result) => (StatusCode::OK, JsonRpcResponse::result(id, result)),
        Err(error) => handler_error_envelope(id, &error),
    }
}

/// Invokes the registry on its own task so a panicking handler cannot take
/// the gateway down with it.
async fn dispatch_isolated(
    registry: Arc<dyn HandlerRegistry>,
    context: RequestContext,
    method: String,
    params: Option<Value>,
) -> Result<Value, HandlerError> {
    let task =
        tokio::spawn(async move { registry.dispatch(&context, &method, params).await });
    match task.await {
        Ok(outcome) => outcome,
        Err(join_error) if join_error.is_panic() => {
            Err(HandlerError::Failed("handler panicked".to_string()))
        }
        Err(_) => Err(HandlerError::Failed("handler cancelled".to_string())),
    }
}

/// Maps a handler failure to an HTTP status and JSON-RPC error envelope.
fn handler_error_envelope(id: Value, error: &HandlerError) -> (StatusCode, JsonRpcResponse) {
    match error {
        HandlerError::UnknownMethod(_) => (
            StatusCode::BAD_REQUEST,
            JsonRpcResponse::error(id, jsonrpc::METHOD_NOT_FOUND, "method not found"),
        ),
        HandlerError::Failed(message) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            JsonRpcResponse::error_with_data(
                id,
                jsonrpc::INTERNAL_ERROR,
                "internal error",
                json!({ "detail": sanitize(message) }),
            ),
        ),
    }
}

/// Serialises an envelope, falling back to a fixed error body.
fn encode_envelope(envelope: &JsonRpcResponse) -> String {
    serde_json::to_string(envelope).unwrap_or_else(|_| {
        "{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{\"code\":-32603,\"message\":\
         \"serialization failed\"}}"
            .to_string()
    })
}

// ============================================================================
// SECTION: Rejections
// ============================================================================

/// Maps an admission failure to its HTTP rejection shape.
fn rejection_response(error: &AdmissionError) -> GatewayResponse {
    match error {
        AdmissionError::Headers {
            errors,
        } => GatewayResponse::Rejected {
            status: StatusCode::FORBIDDEN,
            body: json!({ "error": "forbidden", "details": errors }),
            retry_after_ms: None,
        },
        AdmissionError::RateLimited {
            retry_after_ms,
        } => GatewayResponse::Rejected {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: json!({ "error": "rate limited" }),
            retry_after_ms: Some(*retry_after_ms),
        },
        AdmissionError::Origin => GatewayResponse::Rejected {
            status: StatusCode::FORBIDDEN,
            body: json!({ "error": "origin not allowed" }),
            retry_after_ms: None,
        },
        AdmissionError::ConnectionLimit => GatewayResponse::Rejected {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: json!({ "error": "connection limit reached" }),
            retry_after_ms: None,
        },
    }
}

// ============================================================================
// SECTION: Stdio Transport
// ============================================================================

/// Serves newline-delimited JSON-RPC over stdin/stdout until EOF or shutdown.
async fn serve_stdio(
    state: Arc<GatewayState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), GatewayError> {
    let mut reader = tokio::io::BufReader::new(tokio::io::stdin());
    let mut writer = tokio::io::stdout();
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => return Ok(()),
            read = reader.read_line(&mut line) => read,
        };
        let bytes = read.map_err(|_| GatewayError::Transport("stdio read failed".to_string()))?;
        if bytes == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }
        let Some(envelope) = process_stdio_line(&state, line.trim()).await else {
            continue;
        };
        let payload = serde_json::to_vec(&envelope)
            .map_err(|_| GatewayError::Transport("json-rpc serialization failed".to_string()))?;
        writer
            .write_all(&payload)
            .await
            .map_err(|_| GatewayError::Transport("stdio write failed".to_string()))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|_| GatewayError::Transport("stdio write failed".to_string()))?;
        writer
            .flush()
            .await
            .map_err(|_| GatewayError::Transport("stdio write failed".to_string()))?;
    }
}

/// Processes one stdio line; returns the reply envelope, or `None` for
/// notifications.
pub(crate) async fn process_stdio_line(
    state: &Arc<GatewayState>,
    line: &str,
) -> Option<JsonRpcResponse> {
    let started = Instant::now();
    let request_bytes = line.len();
    if request_bytes > state.config.server.max_body_bytes {
        return Some(JsonRpcResponse::error(
            Value::Null,
            jsonrpc::INVALID_REQUEST,
            "request body too large",
        ));
    }
    match jsonrpc::decode(line.as_bytes()) {
        Err(CodecError::Parse) => {
            Some(JsonRpcResponse::error(Value::Null, jsonrpc::PARSE_ERROR, "parse error"))
        }
        Err(CodecError::Shape(message)) => {
            Some(JsonRpcResponse::error(Value::Null, jsonrpc::INVALID_REQUEST, message))
        }
        Ok(Frame::Notification) => {
            record_request(state, RequestRecord {
                transport: ServerTransport::Stdio,
                peer_ip: None,
                request_id: None,
                session_id: None,
                method: GatewayMethod::Notification,
                outcome: GatewayOutcome::Ok,
                error_code: None,
                request_bytes,
                response_bytes: 0,
                started,
            });
            None
        }
        Ok(Frame::Request(frame)) => {
            let request_id = frame.id.to_string();
            let context = RequestContext::stdio().with_request_id(request_id.clone());
            let (_, envelope) =
                dispatch_to_envelope(state, &context, frame.method, frame.id, frame.params)
                    .await;
            let response_bytes = encode_envelope(&envelope).len();
            record_request(state, RequestRecord {
                transport: ServerTransport::Stdio,
                peer_ip: None,
                request_id: Some(request_id),
                session_id: None,
                method: GatewayMethod::Dispatch,
                outcome: if envelope.error.is_some() {
                    GatewayOutcome::Error
                } else {
                    GatewayOutcome::Ok
                },
                error_code: envelope.error.as_ref().map(|err| err.code),
                request_bytes,
                response_bytes,
                started,
            });
            Some(envelope)
        }
    }
}

// ============================================================================
// SECTION: Background Tasks
// ============================================================================

/// Periodically sweeps expired sessions until shutdown.
async fn run_session_sweep(state: Arc<GatewayState>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(
        state.config.server.sessions.sweep_interval_ms,
    ));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => return,
            _ = ticker.tick() => {
                let removed = state.sessions.cleanup_expired();
                if removed > 0 {
                    let event = SecurityAuditEvent::new(
                        "session_sweep",
                        Severity::Low,
                        Some(format!("removed {removed} expired sessions")),
                        ServerTransport::Http,
                        None,
                    );
                    state.audit.record_security(&event);
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Request Accounting
// ============================================================================

/// Fields recorded for every handled request.
struct RequestRecord {
    /// Transport classification.
    transport: ServerTransport,
    /// Peer IP when available.
    peer_ip: Option<IpAddr>,
    /// Request identifier when parsed.
    request_id: Option<String>,
    /// Session id when a session was involved.
    session_id: Option<String>,
    /// Method classification.
    method: GatewayMethod,
    /// Outcome classification.
    outcome: GatewayOutcome,
    /// JSON-RPC error code when present.
    error_code: Option<i64>,
    /// Request body size in bytes.
    request_bytes: usize,
    /// Response body size in bytes.
    response_bytes: usize,
    /// Pipeline start instant for latency observation.
    started: Instant,
}

/// Records audit and metric events for one request.
fn record_request(state: &GatewayState, record: RequestRecord) {
    let event = GatewayAuditEvent::new(GatewayAuditEventParams {
        request_id: record.request_id,
        transport: record.transport,
        peer_ip: record.peer_ip.map(|ip| ip.to_string()),
        method: record.method,
        outcome: record.outcome,
        error_code: record.error_code,
        session_id: record.session_id,
        request_bytes: record.request_bytes,
        response_bytes: record.response_bytes,
    });
    state.audit.record(&event);
    let metric = MetricEvent {
        transport: record.transport,
        method: record.method,
        outcome: record.outcome,
        error_code: record.error_code,
        request_bytes: record.request_bytes,
        response_bytes: record.response_bytes,
    };
    state.metrics.record_request(metric.clone());
    state.metrics.record_latency(metric, record.started.elapsed());
}

/// Fields specific to a JSON-bodied POST completion.
struct PostRecord {
    /// Peer IP when available.
    peer_ip: Option<IpAddr>,
    /// Request identifier when parsed.
    request_id: Option<String>,
    /// Method classification.
    method: GatewayMethod,
    /// HTTP status for the response.
    status: StatusCode,
    /// Response envelope.
    envelope: JsonRpcResponse,
    /// Request body size in bytes.
    request_bytes: usize,
    /// Pipeline start instant.
    started: Instant,
}

/// Records accounting for a JSON response and returns the response shape.
fn finish_json(state: &GatewayState, record: PostRecord) -> GatewayResponse {
    let response_bytes = encode_envelope(&record.envelope).len();
    let (outcome, error_code) = record.envelope.error.as_ref().map_or(
        (GatewayOutcome::Ok, None),
        |error| (GatewayOutcome::Error, Some(error.code)),
    );
    record_request(state, RequestRecord {
        transport: ServerTransport::Http,
        peer_ip: record.peer_ip,
        request_id: record.request_id,
        session_id: None,
        method: record.method,
        outcome,
        error_code,
        request_bytes: record.request_bytes,
        response_bytes,
        started: record.started,
    });
    GatewayResponse::Json {
        status: record.status,
        envelope: record.envelope,
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Transport gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}
