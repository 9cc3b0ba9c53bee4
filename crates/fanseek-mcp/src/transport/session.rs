//! One HTTP client session = one MCP server connection over an in-memory pipe.
//!
//! The server side of the pipe speaks newline-delimited JSON-RPC (the same framing as stdio).
//! The HTTP side writes client messages into the pipe and reads everything the server emits:
//! responses are routed back to the POST that is waiting for them, anything else goes out on
//! the session's event stream.

use super::http::TransportError;
use rmcp::ServiceExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PIPE_CAPACITY: usize = 64 * 1024;
const EVENT_BACKLOG: usize = 256;

pub const INITIALIZE: &str = "initialize";
pub const INITIALIZED: &str = "notifications/initialized";

/// Where a connection is in the MCP handshake.
///
/// rmcp drops the connection if anything other than `initialize` and then
/// `notifications/initialized` arrives before the handshake completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    AwaitingInitialize,
    AwaitingInitialized,
    Ready,
}

impl Handshake {
    fn admit(self, msg: &Value) -> Result<Self, TransportError> {
        let method = msg.get("method").and_then(Value::as_str);
        match (self, method) {
            (Self::Ready, _) => Ok(Self::Ready),
            (Self::AwaitingInitialize, Some(INITIALIZE)) => Ok(Self::AwaitingInitialized),
            (Self::AwaitingInitialized, Some(INITIALIZED)) => Ok(Self::Ready),
            _ => Err(TransportError::NotInitialized),
        }
    }
}

pub struct Session {
    id: String,
    outbound: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    events: broadcast::Sender<Value>,
    cancel: CancellationToken,
    closed: AtomicBool,
    handshake: Mutex<Handshake>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Start a server connection for `service` and the reader/writer tasks bridging it.
    ///
    /// `on_close` runs once, when the server side of the pipe goes away for any reason.
    pub fn spawn<S, F>(id: String, service: S, on_close: F) -> Arc<Self>
    where
        S: rmcp::ServerHandler,
        F: FnOnce(&str) + Send + 'static,
    {
        let (client_io, server_io) = tokio::io::duplex(PIPE_CAPACITY);
        let (client_read, mut client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (events, _) = broadcast::channel(EVENT_BACKLOG);
        let cancel = CancellationToken::new();

        let session = Arc::new(Self {
            id,
            outbound,
            pending: Mutex::new(HashMap::new()),
            events,
            cancel: cancel.clone(),
            closed: AtomicBool::new(false),
            handshake: Mutex::new(Handshake::AwaitingInitialize),
            tasks: Mutex::new(Vec::new()),
        });

        let server_ct = cancel.child_token();
        let sid = session.id.clone();
        let server_task = tokio::spawn(async move {
            match service.serve_with_ct((server_read, server_write), server_ct).await {
                Ok(running) => {
                    let reason = running.waiting().await;
                    debug!(session_id = %sid, ?reason, "mcp connection finished");
                }
                Err(e) => warn!(session_id = %sid, error = %e, "mcp handshake failed"),
            }
        });

        let writer_ct = cancel.clone();
        let writer_task = tokio::spawn(async move {
            loop {
                let line = tokio::select! {
                    _ = writer_ct.cancelled() => break,
                    line = outbound_rx.recv() => match line {
                        Some(line) => line,
                        None => break,
                    },
                };
                if client_write.write_all(line.as_bytes()).await.is_err()
                    || client_write.flush().await.is_err()
                {
                    break;
                }
            }
            let _ = client_write.shutdown().await;
        });

        let reader = session.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(client_read).lines();
            loop {
                tokio::select! {
                    _ = reader.cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => reader.route(&line),
                        Ok(None) => break,
                        Err(e) => {
                            warn!(session_id = %reader.id, error = %e, "mcp pipe read failed");
                            break;
                        }
                    },
                }
            }
            reader.close();
            on_close(&reader.id);
        });

        session
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([server_task, writer_task, reader_task]);
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Reserve a slot for the response to request `key` (the JSON form of its id).
    pub fn begin_request(&self, key: &str) -> Result<oneshot::Receiver<Value>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.contains_key(key) {
            return Err(TransportError::DuplicateRequestId(key.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(key.to_string(), tx);
        Ok(rx)
    }

    /// Drop reservations made by `begin_request` that will never be answered.
    pub fn abandon_requests<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        for k in keys {
            pending.remove(k);
        }
    }

    pub fn handshake(&self) -> Handshake {
        *self.handshake.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `msgs` for the server, in order and back to back.
    ///
    /// Nothing is queued if the batch would break the handshake; the connection stays as it was.
    pub fn deliver(&self, msgs: &[Value]) -> Result<(), TransportError> {
        let mut stage = self.handshake.lock().unwrap_or_else(|e| e.into_inner());
        let next = msgs.iter().try_fold(*stage, |h, m| h.admit(m))?;
        for m in msgs {
            self.send(m)?;
        }
        *stage = next;
        Ok(())
    }

    fn send(&self, msg: &Value) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        let mut line = msg.to_string();
        line.push('\n');
        self.outbound
            .send(line)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Server messages that are not answers to a pending POST.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.events.subscribe()
    }

    /// Tear the connection down. Safe to call any number of times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        // Waiting POSTs observe a dropped sender.
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!(session_id = %self.id, "session closed");
    }

    /// Abort whatever is still running. Used after the shutdown grace period.
    pub fn abort(&self) {
        for t in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            t.abort();
        }
    }

    fn route(&self, line: &str) {
        let msg: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "dropping unparseable server message");
                return;
            }
        };
        if let Some(key) = response_key(&msg) {
            let waiter = self
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);
            if let Some(tx) = waiter {
                let _ = tx.send(msg);
                return;
            }
        }
        // No subscribers is fine; the message is simply not observed.
        let _ = self.events.send(msg);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Pending-table key of a JSON-RPC request (has `method` and a non-null `id`).
pub fn request_key(msg: &Value) -> Option<String> {
    let obj = msg.as_object()?;
    obj.get("method")?;
    match obj.get("id") {
        None | Some(Value::Null) => None,
        Some(id) => Some(id.to_string()),
    }
}

/// Pending-table key of a JSON-RPC response (has `result` or `error`, and an `id`).
pub fn response_key(msg: &Value) -> Option<String> {
    let obj = msg.as_object()?;
    if obj.contains_key("method") {
        return None;
    }
    if !obj.contains_key("result") && !obj.contains_key("error") {
        return None;
    }
    obj.get("id").map(|id| id.to_string())
}

/// Live sessions by id.
///
/// The lock is only ever held for a map operation; session teardown happens outside it.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.id().to_string(), session);
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    /// Remove and close one session. Returns whether it was registered.
    pub fn close(&self, id: &str) -> bool {
        match self.remove(id) {
            Some(s) => {
                s.close();
                true
            }
            None => false,
        }
    }

    /// Close every session and hand them back, e.g. to abort stragglers later.
    pub fn close_all(&self) -> Vec<Arc<Session>> {
        let drained: Vec<Arc<Session>> = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, s)| s)
            .collect();
        for s in &drained {
            s.close();
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
