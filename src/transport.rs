//! Resilient RPC transport to out-of-process backends
//!
//! A correlation-based request/response client over a persistent byte stream:
//! a Unix domain socket to a long-lived sidecar, or the piped stdio of a
//! spawned subprocess. Every request carries a unique id and parks a waiter
//! in an in-flight map; responses resolve waiters by id, so arrival order
//! never matters. Connection loss drives an explicit state machine through a
//! capped number of reconnect attempts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{HostError, Result};
use crate::protocol::{encode_request, parse_response, RpcRequest, RpcResponse};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<RpcResponse>>>>;

/// One dialed backend connection. The optional child handle keeps a spawned
/// backend subprocess alive for exactly as long as the connection is used.
pub struct Connection {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub child: Option<Child>,
}

/// How the transport reaches its backend. Injected so tests can script
/// connections and count dial attempts.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<Connection>;
}

/// Connects to a long-lived sidecar over a Unix domain socket.
pub struct UnixDialer {
    socket_path: PathBuf,
}

impl UnixDialer {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }
}

#[async_trait]
impl Dialer for UnixDialer {
    async fn dial(&self) -> Result<Connection> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            HostError::Transport(format!(
                "connect to {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;
        let (reader, writer) = stream.into_split();
        Ok(Connection {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        })
    }
}

/// Spawns a backend subprocess and speaks the wire protocol over its stdio.
pub struct SubprocessDialer {
    command: String,
    args: Vec<String>,
}

impl SubprocessDialer {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl Dialer for SubprocessDialer {
    async fn dial(&self) -> Result<Connection> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HostError::Transport(format!("spawn {}: {}", self.command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::Transport("backend stdout not captured".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostError::Transport("backend stdin not captured".to_string()))?;

        Ok(Connection {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting(u32),
    Failed,
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub request_timeout: Duration,
    pub auto_reconnect: bool,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }
}

/// Request/response client over a reconnecting connection.
pub struct RpcTransport {
    dialer: Arc<dyn Dialer>,
    options: TransportOptions,
    pending: PendingMap,
    writer: Arc<Mutex<Option<BoxedWriter>>>,
    state: Arc<watch::Sender<ConnectionState>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl RpcTransport {
    pub fn new(dialer: Arc<dyn Dialer>, options: TransportOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            dialer,
            options,
            pending: Arc::new(Mutex::new(HashMap::new())),
            writer: Arc::new(Mutex::new(None)),
            state: Arc::new(state),
            reader_task: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch channel for state transitions; used by the host for liveness
    /// reporting and by tests to wait on transitions without polling.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Number of requests currently awaiting a response.
    pub async fn in_flight(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Establish the connection. Idempotent: calling while already connected
    /// (or while a connect/reconnect is in progress) returns immediately.
    pub async fn connect(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected
            | ConnectionState::Connecting
            | ConnectionState::Reconnecting(_) => return Ok(()),
            ConnectionState::Disconnected | ConnectionState::Failed => {}
        }

        self.state.send_replace(ConnectionState::Connecting);
        let conn = match self.dialer.dial().await {
            Ok(conn) => conn,
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let Connection {
            reader,
            writer,
            child,
        } = conn;
        *self.writer.lock().await = Some(writer);
        // Mark connected before the read loop starts so an immediate EOF
        // transitions forward rather than racing this assignment.
        self.state.send_replace(ConnectionState::Connected);

        let task = tokio::spawn(run_read_loop(
            reader,
            child,
            Arc::clone(&self.pending),
            Arc::clone(&self.writer),
            Arc::clone(&self.state),
            Arc::clone(&self.dialer),
            self.options.clone(),
        ));
        *self.reader_task.lock().await = Some(task);

        info!("transport connected");
        Ok(())
    }

    /// Send a request and await its correlated response.
    ///
    /// Rejects with a timeout error after `request_timeout`; the pending
    /// entry is removed first, so a late response for the same id is dropped
    /// rather than resolved twice. A timeout only abandons the wait; the
    /// backend is not told to stop working on the request.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if self.state() == ConnectionState::Failed {
            return Err(HostError::Transport(
                "transport failed after exhausting reconnect attempts".to_string(),
            ));
        }

        let id = format!("req_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let request = RpcRequest {
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        let line = encode_request(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        {
            let mut writer = self.writer.lock().await;
            let writer = match writer.as_mut() {
                Some(w) => w,
                None => {
                    self.pending.lock().await.remove(&id);
                    return Err(HostError::Transport("not connected".to_string()));
                }
            };
            if let Err(e) = write_line(writer, &line).await {
                self.pending.lock().await.remove(&id);
                return Err(HostError::Transport(format!("write failed: {}", e)));
            }
        }
        debug!(id = %id, method = %method, "request sent");

        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(err) = response.error {
                    return Err(HostError::Backend(format!(
                        "{} (code {})",
                        err.message, err.code
                    )));
                }
                Ok(response.result.unwrap_or(Value::Null))
            }
            Ok(Err(_)) => Err(HostError::Transport(
                "connection closed while awaiting response".to_string(),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(HostError::Timeout(format!(
                    "no response to '{}' within {:?}",
                    method, self.options.request_timeout
                )))
            }
        }
    }

    /// Tear down the connection and fail any in-flight requests. Idempotent.
    pub async fn close(&self) {
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        *self.writer.lock().await = None;
        self.pending.lock().await.clear();
        self.state.send_replace(ConnectionState::Disconnected);
        info!("transport closed");
    }
}

/// Thin calling surface adapters depend on, so tests can substitute a mock
/// for the whole transport.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value>;
}

#[async_trait]
impl RpcChannel for RpcTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.request(method, params).await
    }
}

async fn write_line(writer: &mut BoxedWriter, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Reads response lines until the connection drops, then walks the reconnect
/// state machine. Exits via `Disconnected` (reconnect disabled, or `close`)
/// or `Failed` (attempts exhausted).
async fn run_read_loop(
    reader: BoxedReader,
    child: Option<Child>,
    pending: PendingMap,
    writer_slot: Arc<Mutex<Option<BoxedWriter>>>,
    state: Arc<watch::Sender<ConnectionState>>,
    dialer: Arc<dyn Dialer>,
    options: TransportOptions,
) {
    let mut current = Some((reader, child));

    while let Some((reader, mut child)) = current.take() {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => dispatch_line(&line, &pending).await,
                Ok(None) => {
                    debug!("backend closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "read failed on backend connection");
                    break;
                }
            }
        }

        if let Some(mut c) = child.take() {
            let _ = c.start_kill();
        }
        *writer_slot.lock().await = None;
        // Dropping the senders fails every in-flight waiter.
        pending.lock().await.clear();

        if !options.auto_reconnect {
            state.send_replace(ConnectionState::Disconnected);
            info!("connection closed, reconnect disabled");
            return;
        }

        for attempt in 1..=options.max_reconnect_attempts {
            state.send_replace(ConnectionState::Reconnecting(attempt));
            tokio::time::sleep(options.reconnect_delay).await;
            match dialer.dial().await {
                Ok(conn) => {
                    *writer_slot.lock().await = Some(conn.writer);
                    state.send_replace(ConnectionState::Connected);
                    info!(attempt, "reconnected to backend");
                    current = Some((conn.reader, conn.child));
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }

        if current.is_none() {
            state.send_replace(ConnectionState::Failed);
            error!(
                attempts = options.max_reconnect_attempts,
                "reconnect attempts exhausted, transport failed"
            );
            return;
        }
    }
}

async fn dispatch_line(line: &str, pending: &PendingMap) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    match parse_response(trimmed) {
        Ok(response) => {
            let waiter = pending.lock().await.remove(&response.id);
            match waiter {
                // A failed send means the waiter just timed out; nothing to do.
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => {
                    debug!(id = %response.id, "dropping response with no pending request")
                }
            }
        }
        Err(e) => warn!(error = %e, "failed to parse backend line"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use tokio::io::{ReadHalf, WriteHalf};

    /// Hands out pre-built connections in order; dials fail once the script
    /// runs out. Counts every dial attempt.
    struct ScriptedDialer {
        connections: std::sync::Mutex<VecDeque<Connection>>,
        dials: AtomicU32,
    }

    impl ScriptedDialer {
        fn new(connections: Vec<Connection>) -> Self {
            Self {
                connections: std::sync::Mutex::new(connections.into_iter().collect()),
                dials: AtomicU32::new(0),
            }
        }

        fn dial_count(&self) -> u32 {
            self.dials.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Dialer for ScriptedDialer {
        async fn dial(&self) -> Result<Connection> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            match self.connections.lock() {
                Ok(mut queue) => queue
                    .pop_front()
                    .ok_or_else(|| HostError::Transport("dial refused".to_string())),
                Err(_) => Err(HostError::Transport("dialer poisoned".to_string())),
            }
        }
    }

    type ServerEnd = (
        tokio::io::Lines<BufReader<ReadHalf<tokio::io::DuplexStream>>>,
        WriteHalf<tokio::io::DuplexStream>,
    );

    fn duplex_connection() -> (Connection, ServerEnd) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let conn = Connection {
            reader: Box::new(client_read),
            writer: Box::new(client_write),
            child: None,
        };
        (conn, (BufReader::new(server_read).lines(), server_write))
    }

    fn fast_options() -> TransportOptions {
        TransportOptions {
            request_timeout: Duration::from_millis(200),
            auto_reconnect: true,
            reconnect_delay: Duration::from_millis(5),
            max_reconnect_attempts: 5,
        }
    }

    async fn respond(server_write: &mut WriteHalf<tokio::io::DuplexStream>, response: &str) {
        server_write
            .write_all(format!("{}\n", response).as_bytes())
            .await
            .unwrap();
        server_write.flush().await.unwrap();
    }

    async fn wait_for_state(transport: &RpcTransport, want: ConnectionState) {
        let mut rx = transport.state_changes();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
            .await
            .expect("state not reached in time")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn test_connect_idempotent() {
        let (conn, _server) = duplex_connection();
        let dialer = Arc::new(ScriptedDialer::new(vec![conn]));
        let transport = RpcTransport::new(dialer.clone(), fast_options());

        transport.connect().await.unwrap();
        transport.connect().await.unwrap();
        transport.connect().await.unwrap();

        assert_eq!(transport.state(), ConnectionState::Connected);
        assert_eq!(dialer.dial_count(), 1);
    }

    #[tokio::test]
    async fn test_request_resolves_matching_id() {
        let (conn, (mut server_lines, mut server_write)) = duplex_connection();
        let dialer = Arc::new(ScriptedDialer::new(vec![conn]));
        let transport = Arc::new(RpcTransport::new(dialer, fast_options()));
        transport.connect().await.unwrap();

        let server = tokio::spawn(async move {
            let line = server_lines.next_line().await.unwrap().unwrap();
            let request: RpcRequest = serde_json::from_str(&line).unwrap();
            // Unrelated responses first; they must be dropped, not crash.
            respond(&mut server_write, r#"{"id": "req_999", "result": "stray"}"#).await;
            respond(&mut server_write, r#"{"id": "ghost", "result": null}"#).await;
            let reply = format!(r#"{{"id": "{}", "result": {{"pong": true}}}}"#, request.id);
            respond(&mut server_write, &reply).await;
            server_write
        });

        let result = transport.request("ping", json!({})).await.unwrap();
        assert_eq!(result["pong"], true);
        assert_eq!(transport.in_flight().await, 0);

        // Keep the server end alive until the exchange is done.
        let _server_write = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_error_response() {
        let (conn, (mut server_lines, mut server_write)) = duplex_connection();
        let dialer = Arc::new(ScriptedDialer::new(vec![conn]));
        let transport = Arc::new(RpcTransport::new(dialer, fast_options()));
        transport.connect().await.unwrap();

        let server = tokio::spawn(async move {
            let line = server_lines.next_line().await.unwrap().unwrap();
            let request: RpcRequest = serde_json::from_str(&line).unwrap();
            let reply = format!(
                r#"{{"id": "{}", "error": {{"code": -32601, "message": "Method not found: explode"}}}}"#,
                request.id
            );
            respond(&mut server_write, &reply).await;
            server_write
        });

        let err = transport.request("explode", json!({})).await.unwrap_err();
        assert!(matches!(err, HostError::Backend(_)));
        assert!(err.to_string().contains("Method not found"));

        let _server_write = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_and_late_response_is_dropped() {
        let mut options = fast_options();
        options.request_timeout = Duration::from_millis(50);

        let (conn, (mut server_lines, mut server_write)) = duplex_connection();
        let dialer = Arc::new(ScriptedDialer::new(vec![conn]));
        let transport = Arc::new(RpcTransport::new(dialer, options));
        transport.connect().await.unwrap();

        let err = transport.request("slow_call", json!({})).await.unwrap_err();
        assert!(matches!(err, HostError::Timeout(_)));
        assert_eq!(transport.in_flight().await, 0);

        // Deliver the response after the timeout; it must be dropped quietly.
        let line = server_lines.next_line().await.unwrap().unwrap();
        let request: RpcRequest = serde_json::from_str(&line).unwrap();
        let late = format!(r#"{{"id": "{}", "result": "too late"}}"#, request.id);
        respond(&mut server_write, &late).await;

        // The transport is still healthy: a fresh request works.
        let server = tokio::spawn(async move {
            let line = server_lines.next_line().await.unwrap().unwrap();
            let request: RpcRequest = serde_json::from_str(&line).unwrap();
            let reply = format!(r#"{{"id": "{}", "result": "fresh"}}"#, request.id);
            respond(&mut server_write, &reply).await;
            server_write
        });

        let result = transport.request("ping", json!({})).await.unwrap();
        assert_eq!(result, "fresh");
        let _server_write = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_before_connect_fails() {
        let dialer = Arc::new(ScriptedDialer::new(vec![]));
        let transport = RpcTransport::new(dialer, fast_options());

        let err = transport.request("ping", json!({})).await.unwrap_err();
        assert!(matches!(err, HostError::Transport(_)));
        assert!(err.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn test_no_reconnect_when_disabled() {
        let mut options = fast_options();
        options.auto_reconnect = false;

        let (conn, server) = duplex_connection();
        let dialer = Arc::new(ScriptedDialer::new(vec![conn]));
        let transport = RpcTransport::new(dialer.clone(), options);
        transport.connect().await.unwrap();

        // Dropping the server end closes the connection.
        drop(server);
        wait_for_state(&transport, ConnectionState::Disconnected).await;

        // Exactly one connection attempt total, no redial.
        assert_eq!(dialer.dial_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_attempts_capped() {
        let mut options = fast_options();
        options.max_reconnect_attempts = 3;

        // Only the first dial succeeds; every reconnect dial fails.
        let (conn, server) = duplex_connection();
        let dialer = Arc::new(ScriptedDialer::new(vec![conn]));
        let transport = RpcTransport::new(dialer.clone(), options);
        transport.connect().await.unwrap();

        drop(server);
        wait_for_state(&transport, ConnectionState::Failed).await;

        // Initial connect plus at most three reconnect attempts.
        assert_eq!(dialer.dial_count(), 4);

        // Once failed, new requests fail immediately.
        let err = transport.request("ping", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("exhausting reconnect attempts"));
    }

    #[tokio::test]
    async fn test_reconnect_then_request_succeeds() {
        let (first, first_server) = duplex_connection();
        let (second, (mut server_lines, mut server_write)) = duplex_connection();
        let dialer = Arc::new(ScriptedDialer::new(vec![first, second]));
        let transport = Arc::new(RpcTransport::new(dialer.clone(), fast_options()));
        transport.connect().await.unwrap();

        drop(first_server);
        let mut rx = transport.state_changes();
        tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| matches!(s, ConnectionState::Reconnecting(_))),
        )
        .await
        .expect("never entered reconnecting")
        .expect("state channel closed");
        wait_for_state(&transport, ConnectionState::Connected).await;
        assert_eq!(dialer.dial_count(), 2);

        let server = tokio::spawn(async move {
            let line = server_lines.next_line().await.unwrap().unwrap();
            let request: RpcRequest = serde_json::from_str(&line).unwrap();
            let reply = format!(r#"{{"id": "{}", "result": "back"}}"#, request.id);
            respond(&mut server_write, &reply).await;
            server_write
        });

        let result = transport.request("ping", json!({})).await.unwrap();
        assert_eq!(result, "back");
        let _server_write = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_fails_in_flight_requests() {
        let mut options = fast_options();
        options.request_timeout = Duration::from_secs(5);
        options.auto_reconnect = false;

        let (conn, (mut server_lines, server_write)) = duplex_connection();
        let dialer = Arc::new(ScriptedDialer::new(vec![conn]));
        let transport = Arc::new(RpcTransport::new(dialer, options));
        transport.connect().await.unwrap();

        let t = Arc::clone(&transport);
        let request = tokio::spawn(async move { t.request("hang", json!({})).await });

        // Wait for the request to hit the wire, then sever the connection.
        let _ = server_lines.next_line().await.unwrap().unwrap();
        drop(server_lines);
        drop(server_write);

        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, HostError::Transport(_)));
        assert!(err.to_string().contains("connection closed"));
    }

    #[tokio::test]
    async fn test_close_idempotent() {
        let (conn, _server) = duplex_connection();
        let dialer = Arc::new(ScriptedDialer::new(vec![conn]));
        let transport = RpcTransport::new(dialer, fast_options());
        transport.connect().await.unwrap();

        transport.close().await;
        transport.close().await;
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        let err = transport.request("ping", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn test_request_ids_unique() {
        let transport = RpcTransport::new(
            Arc::new(ScriptedDialer::new(vec![])),
            fast_options(),
        );
        let a = transport.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let b = transport.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        assert_ne!(a, b);
    }

    #[test]
    fn test_default_options() {
        let options = TransportOptions::default();
        assert_eq!(options.request_timeout, Duration::from_secs(30));
        assert!(options.auto_reconnect);
        assert_eq!(options.reconnect_delay, Duration::from_secs(1));
        assert_eq!(options.max_reconnect_attempts, 5);
    }
}
