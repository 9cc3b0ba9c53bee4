//! Session-multiplexed HTTP transport.
//!
//! `POST /mcp` carries client messages, `GET /mcp` streams server-initiated messages as SSE,
//! `DELETE /mcp` ends a session. Every request after `initialize` must carry the
//! `mcp-session-id` header returned by the initialize response.

use super::session::{request_key, response_key, Session, SessionRegistry, INITIALIZE};
use crate::server::SearchServer;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures::stream::{self, Stream};
use rmcp::model::ClientJsonRpcMessage;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const MCP_PATH: &str = "/mcp";
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Bad Request: No valid session ID provided")]
    InvalidSession,
    #[error("Bad Request: Server already initialized")]
    AlreadyInitialized,
    #[error("Bad Request: initialize handshake failed")]
    InitializeFailed,
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid Request: {0}")]
    InvalidMessage(String),
    #[error("Invalid Request: duplicate request id {0}")]
    DuplicateRequestId(String),
    #[error("Invalid Request: session is not initialized; send notifications/initialized first")]
    NotInitialized,
    #[error("Internal server error")]
    ConnectionClosed,
}

impl TransportError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ConnectionClosed => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::InvalidSession | Self::AlreadyInitialized | Self::InitializeFailed => -32000,
            Self::Parse(_) => -32700,
            Self::InvalidMessage(_) | Self::DuplicateRequestId(_) | Self::NotInitialized => -32600,
            Self::ConnectionClosed => -32603,
        }
    }

    /// JSON-RPC error envelope; transport errors are never tied to a request id.
    pub fn envelope(&self) -> Value {
        json!({
            "jsonrpc": "2.0",
            "error": { "code": self.rpc_code(), "message": self.to_string() },
            "id": null,
        })
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.envelope())).into_response()
    }
}

#[derive(Clone)]
pub struct HttpState {
    pub registry: SessionRegistry,
    pub server: SearchServer,
}

pub fn router(state: HttpState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            HeaderName::from_static(SESSION_HEADER),
            HeaderName::from_static("mcp-protocol-version"),
            HeaderName::from_static("last-event-id"),
        ])
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route("/health", get(health))
        .route(
            MCP_PATH,
            get(handle_get).post(handle_post).delete(handle_delete),
        )
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<HttpState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "transport": "http",
        "sessions": state.registry.len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn lookup(state: &HttpState, headers: &HeaderMap) -> Result<Arc<Session>, TransportError> {
    session_id(headers)
        .and_then(|id| state.registry.get(id))
        .ok_or(TransportError::InvalidSession)
}

/// Split a POST body into individual messages. Returns the messages and whether it was a batch.
fn parse_body(body: &[u8]) -> Result<(Vec<Value>, bool), TransportError> {
    let v: Value =
        serde_json::from_slice(body).map_err(|e| TransportError::Parse(e.to_string()))?;
    let (msgs, batch) = match v {
        Value::Array(items) => (items, true),
        other => (vec![other], false),
    };
    if msgs.is_empty() {
        return Err(TransportError::InvalidMessage("empty batch".to_string()));
    }
    if msgs.iter().any(|m| !m.is_object()) {
        return Err(TransportError::InvalidMessage(
            "every message must be a JSON object".to_string(),
        ));
    }
    // The server side treats an undecodable line as fatal, so nothing it cannot read gets through.
    for m in &msgs {
        serde_json::from_value::<ClientJsonRpcMessage>(m.clone())
            .map_err(|e| TransportError::InvalidMessage(e.to_string()))?;
    }
    Ok((msgs, batch))
}

fn is_initialize(msg: &Value) -> bool {
    msg.get("method").and_then(Value::as_str) == Some(INITIALIZE)
}

async fn handle_post(State(state): State<HttpState>, headers: HeaderMap, body: Bytes) -> Response {
    match post(&state, &headers, &body).await {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "rejected mcp POST");
            e.into_response()
        }
    }
}

async fn post(state: &HttpState, headers: &HeaderMap, body: &[u8]) -> Result<Response, TransportError> {
    let (msgs, batch) = parse_body(body)?;
    let wants_init = msgs.iter().any(is_initialize);

    if let Some(id) = session_id(headers) {
        let session = state
            .registry
            .get(id)
            .ok_or(TransportError::InvalidSession)?;
        if wants_init {
            return Err(TransportError::AlreadyInitialized);
        }
        let replies = forward(&session, &msgs).await?;
        return Ok(reply(replies, batch));
    }

    if !wants_init {
        return Err(TransportError::InvalidSession);
    }
    open_session(state, msgs, batch).await
}

async fn open_session(
    state: &HttpState,
    msgs: Vec<Value>,
    batch: bool,
) -> Result<Response, TransportError> {
    let id = uuid::Uuid::new_v4().to_string();
    let on_close = {
        let registry = state.registry.clone();
        move |id: &str| {
            if registry.remove(id).is_some() {
                info!(session_id = %id, "session ended by connection close");
            }
        }
    };
    let session = Session::spawn(id.clone(), state.server.clone(), on_close);

    let replies = match forward(&session, &msgs).await {
        Ok(r) => r,
        Err(e) => {
            session.close();
            warn!(session_id = %id, error = %e, "initialize failed");
            return Err(match e {
                TransportError::ConnectionClosed => TransportError::InitializeFailed,
                other => other,
            });
        }
    };
    let answered = |key: &str| {
        replies
            .iter()
            .any(|r| response_key(r).as_deref() == Some(key) && r.get("result").is_some())
    };
    let init_keys: Vec<String> = msgs
        .iter()
        .filter(|m| is_initialize(m))
        .filter_map(request_key)
        .collect();
    let init_ok = !init_keys.is_empty() && init_keys.iter().all(|k| answered(k));
    if !init_ok {
        session.close();
        warn!(session_id = %id, "initialize was not answered with a result");
        return Err(TransportError::InitializeFailed);
    }

    state.registry.insert(session.clone());
    if session.is_closed() {
        // The connection died between the handshake and registration.
        state.registry.remove(&id);
        return Err(TransportError::InitializeFailed);
    }
    info!(session_id = %id, sessions = state.registry.len(), "session opened");

    let mut resp = reply(replies, batch);
    if let Ok(v) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert(SESSION_HEADER, v);
    }
    Ok(resp)
}

/// Write `msgs` into the session in order and wait for the response to every request among them.
async fn forward(session: &Session, msgs: &[Value]) -> Result<Vec<Value>, TransportError> {
    let mut keys: Vec<String> = Vec::new();
    let mut waiters = Vec::new();
    for m in msgs {
        let Some(key) = request_key(m) else { continue };
        if keys.contains(&key) {
            session.abandon_requests(keys.iter().map(String::as_str));
            return Err(TransportError::DuplicateRequestId(key));
        }
        match session.begin_request(&key) {
            Ok(rx) => waiters.push(rx),
            Err(e) => {
                session.abandon_requests(keys.iter().map(String::as_str));
                return Err(e);
            }
        }
        keys.push(key);
    }

    if let Err(e) = session.deliver(msgs) {
        session.abandon_requests(keys.iter().map(String::as_str));
        return Err(e);
    }

    let mut replies = Vec::with_capacity(waiters.len());
    for rx in waiters {
        replies.push(rx.await.map_err(|_| TransportError::ConnectionClosed)?);
    }
    Ok(replies)
}

fn reply(mut replies: Vec<Value>, batch: bool) -> Response {
    if replies.is_empty() {
        return StatusCode::ACCEPTED.into_response();
    }
    if batch {
        Json(Value::Array(replies)).into_response()
    } else {
        Json(replies.swap_remove(0)).into_response()
    }
}

async fn handle_get(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let session = match lookup(&state, &headers) {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };
    debug!(session_id = %session.id(), "event stream opened");
    Sse::new(event_stream(&session))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn event_stream(session: &Session) -> impl Stream<Item = Result<Event, Infallible>> {
    let rx = session.subscribe();
    let ct: CancellationToken = session.cancellation_token();
    let sid = session.id().to_string();
    stream::unfold((rx, ct, sid), |(mut rx, ct, sid)| async move {
        loop {
            tokio::select! {
                _ = ct.cancelled() => return None,
                msg = rx.recv() => match msg {
                    Ok(v) => {
                        let ev = Event::default().event("message").data(v.to_string());
                        return Some((Ok(ev), (rx, ct, sid)));
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(session_id = %sid, skipped = n, "event stream lagged");
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    })
}

async fn handle_delete(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return TransportError::InvalidSession.into_response();
    };
    if state.registry.close(id) {
        info!(session_id = %id, "session terminated by client");
        StatusCode::OK.into_response()
    } else {
        TransportError::InvalidSession.into_response()
    }
}

/// A bound, running HTTP transport.
pub struct HttpTransport {
    local_addr: SocketAddr,
    registry: SessionRegistry,
    shutdown: CancellationToken,
    task: Option<JoinHandle<std::io::Result<()>>>,
    grace: Duration,
}

impl HttpTransport {
    pub async fn bind(addr: SocketAddr, server: SearchServer) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let registry = SessionRegistry::new();
        let app = router(HttpState {
            registry: registry.clone(),
            server,
        });

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });
        info!(addr = %local_addr, path = MCP_PATH, "http transport listening");

        Ok(Self {
            local_addr,
            registry,
            shutdown,
            task: Some(task),
            grace: DEFAULT_GRACE_PERIOD,
        })
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Resolves if the server stops on its own (listener failure).
    pub async fn wait(&mut self) -> std::io::Result<()> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        // Keep the handle until it has completed so `stop` can still await it.
        let joined = task.await;
        self.task = None;
        joined?
    }

    /// Close every session, stop accepting, and give in-flight requests the grace period.
    pub async fn stop(mut self) -> std::io::Result<()> {
        let closed = self.registry.close_all();
        info!(sessions = closed.len(), "closing http sessions");
        self.shutdown.cancel();

        let Some(mut task) = self.task.take() else {
            return Ok(());
        };
        let res = match tokio::time::timeout(self.grace, &mut task).await {
            Ok(joined) => joined?,
            Err(_) => {
                warn!(grace_ms = self.grace.as_millis() as u64, "http shutdown grace period expired");
                task.abort();
                Ok(())
            }
        };
        for s in &closed {
            s.abort();
        }
        res
    }
}
