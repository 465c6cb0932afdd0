//! A scripted language server over in-memory pipes.
//!
//! [`FakeServer`] speaks the real wire protocol through the transport's framing, so a
//! wrapper under test goes through the same code paths as with a spawned process.

use async_trait::async_trait;
use langlink_lsp::connection::{ConnectionFactory, ConnectionProvider, ServerStreams};
use langlink_lsp::transport::{
    read_message, write_message, IncomingMessage, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, RequestId,
};
use langlink_lsp::wrapper::{ServerStatus, ServerWrapper};
use langlink_lsp::{LspError, LspResult, ServerDefinition};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{BufReader, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// How long the wait helpers poll before giving up.
const WAIT: Duration = Duration::from_secs(5);
const PIPE_CAPACITY: usize = 64 * 1024;

enum Outgoing {
    Message(String),
    Close,
}

#[derive(Default)]
struct Script {
    capabilities: Value,
    responses: HashMap<String, Value>,
    errors: HashMap<String, (i64, String)>,
    silent: HashSet<String>,
}

struct Inner {
    script: Mutex<Script>,
    received: Mutex<Vec<(String, Value)>>,
    link: Mutex<Option<mpsc::UnboundedSender<Outgoing>>>,
    pending: Mutex<HashMap<i64, oneshot::Sender<Value>>>,
    next_id: AtomicI64,
    starts: AtomicUsize,
    refuse_start: AtomicBool,
}

/// A language server double.
///
/// Answers `initialize` with the configured capabilities, every other request from its
/// response table (`null` by default), and records everything the client sends. Every
/// [`start`](ConnectionProvider::start) opens a fresh connection; the script and the
/// record survive across connections.
///
/// # Example
///
/// ```rust,ignore
/// use langlink_test_utils::FakeServer;
/// use serde_json::json;
///
/// let server = FakeServer::new(json!({ "hoverProvider": true }))
///     .respond("textDocument/hover", json!({ "contents": "a function" }))
///     .fail("textDocument/definition", -32603, "internal error");
///
/// // Connect a wrapper through FakeConnections::new(server.clone()) ...
///
/// assert_eq!(server.calls("textDocument/hover"), 1);
/// ```
#[derive(Clone)]
pub struct FakeServer {
    inner: Arc<Inner>,
}

impl FakeServer {
    /// Create a server advertising `capabilities` (a `ServerCapabilities` object).
    pub fn new(capabilities: Value) -> Self {
        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(Script {
                    capabilities,
                    ..Default::default()
                }),
                received: Mutex::new(Vec::new()),
                link: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1),
                starts: AtomicUsize::new(0),
                refuse_start: AtomicBool::new(false),
            }),
        }
    }

    /// Answer `method` with `result`.
    pub fn respond(self, method: &str, result: Value) -> Self {
        self.set_response(method, result);
        self
    }

    /// Answer `method` with a JSON-RPC error.
    pub fn fail(self, method: &str, code: i64, message: &str) -> Self {
        self.inner
            .script
            .lock()
            .unwrap()
            .errors
            .insert(method.to_string(), (code, message.to_string()));
        self
    }

    /// Never answer `method`.
    pub fn silence(self, method: &str) -> Self {
        self.inner
            .script
            .lock()
            .unwrap()
            .silent
            .insert(method.to_string());
        self
    }

    pub fn set_response(&self, method: &str, result: Value) {
        self.inner
            .script
            .lock()
            .unwrap()
            .responses
            .insert(method.to_string(), result);
    }

    /// Make the following starts fail as if the executable were missing.
    pub fn refuse_start(&self, refuse: bool) {
        self.inner.refuse_start.store(refuse, Ordering::SeqCst);
    }

    /// Number of connections opened so far.
    pub fn starts(&self) -> usize {
        self.inner.starts.load(Ordering::SeqCst)
    }

    /// Number of requests and notifications received for `method`.
    pub fn calls(&self, method: &str) -> usize {
        self.inner
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    /// Params of every message received for `method`.
    pub fn params(&self, method: &str) -> Vec<Value> {
        self.inner
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Methods received, in order.
    pub fn methods(&self) -> Vec<String> {
        self.inner
            .received
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .link
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|link| !link.is_closed())
    }

    /// Send a notification to the client. Returns `false` when not connected.
    pub fn notify(&self, method: &str, params: Value) -> bool {
        let notification = JsonRpcNotification::new(method, Some(params));
        match serde_json::to_string(&notification) {
            Ok(content) => self.send(Outgoing::Message(content)),
            Err(_) => false,
        }
    }

    /// Send a request to the client and wait for its result.
    pub async fn request(&self, method: &str, params: Value) -> Option<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(id, tx);

        let request = JsonRpcRequest::new(RequestId::Number(id), method, Some(params));
        let content = serde_json::to_string(&request).ok()?;
        if !self.send(Outgoing::Message(content)) {
            self.inner.pending.lock().unwrap().remove(&id);
            return None;
        }
        tokio::time::timeout(WAIT, rx).await.ok()?.ok()
    }

    /// Drop the current connection, as a crashing process would.
    pub fn drop_connection(&self) {
        if let Some(link) = self.inner.link.lock().unwrap().take() {
            let _ = link.send(Outgoing::Close);
        }
    }

    fn send(&self, message: Outgoing) -> bool {
        self.inner
            .link
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|link| link.send(message).is_ok())
    }
}

impl Inner {
    fn record(&self, method: &str, params: &Value) {
        trace!(method, "Fake server received");
        self.received
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));
    }

    fn answer(&self, method: &str) -> Option<Result<Value, JsonRpcError>> {
        let script = self.script.lock().unwrap();
        if script.silent.contains(method) {
            return None;
        }
        if let Some((code, message)) = script.errors.get(method) {
            return Some(Err(JsonRpcError::new(*code, message.clone())));
        }
        if method == "initialize" {
            return Some(Ok(json!({ "capabilities": script.capabilities })));
        }
        Some(Ok(script
            .responses
            .get(method)
            .cloned()
            .unwrap_or(Value::Null)))
    }
}

async fn write_loop(mut output: DuplexStream, mut outgoing: mpsc::UnboundedReceiver<Outgoing>) {
    while let Some(message) = outgoing.recv().await {
        match message {
            Outgoing::Message(content) => {
                if write_message(&mut output, &content).await.is_err() {
                    break;
                }
            }
            Outgoing::Close => break,
        }
    }
}

async fn read_loop(inner: Arc<Inner>, input: DuplexStream, link: mpsc::UnboundedSender<Outgoing>) {
    let mut reader = BufReader::new(input);
    while let Ok(Some(content)) = read_message(&mut reader).await {
        let Ok(message) = IncomingMessage::parse(&content) else {
            continue;
        };
        match message {
            IncomingMessage::Request { id, method, params } => {
                inner.record(&method, &params);
                let Some(outcome) = inner.answer(&method) else {
                    continue;
                };
                let response = JsonRpcResponse::from_outcome(id, outcome);
                if let Ok(content) = serde_json::to_string(&response) {
                    let _ = link.send(Outgoing::Message(content));
                }
            }
            IncomingMessage::Notification { method, params } => {
                inner.record(&method, &params);
                if method == "exit" {
                    break;
                }
            }
            IncomingMessage::Response { id, outcome } => {
                if let RequestId::Number(id) = id {
                    if let Some(sender) = inner.pending.lock().unwrap().remove(&id) {
                        let _ = sender.send(outcome.unwrap_or(Value::Null));
                    }
                }
            }
        }
    }
    let _ = link.send(Outgoing::Close);
}

#[async_trait]
impl ConnectionProvider for FakeServer {
    async fn start(&self) -> LspResult<ServerStreams> {
        if self.inner.refuse_start.load(Ordering::SeqCst) {
            return Err(LspError::Launch(
                "Failed to start server: not found".to_string(),
            ));
        }

        let (client_writer, server_input) = tokio::io::duplex(PIPE_CAPACITY);
        let (server_output, client_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(previous) = self.inner.link.lock().unwrap().replace(tx.clone()) {
            let _ = previous.send(Outgoing::Close);
        }
        tokio::spawn(write_loop(server_output, rx));
        tokio::spawn(read_loop(Arc::clone(&self.inner), server_input, tx));
        self.inner.starts.fetch_add(1, Ordering::SeqCst);

        Ok(ServerStreams {
            reader: Box::new(client_reader),
            writer: Box::new(client_writer),
            stderr: None,
        })
    }

    async fn stop(&self) {
        self.drop_connection();
    }
}

/// Connection factory handing out fake servers by definition id.
pub struct FakeConnections {
    default: Option<FakeServer>,
    servers: Mutex<HashMap<String, FakeServer>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl FakeConnections {
    /// A factory serving `server` for every definition.
    pub fn new(server: FakeServer) -> Arc<Self> {
        Arc::new(Self::with_default(Some(server)))
    }

    /// A factory serving only the servers added with [`add`](Self::add).
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::with_default(None))
    }

    fn with_default(default: Option<FakeServer>) -> Self {
        Self {
            default,
            servers: Mutex::new(HashMap::new()),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Serve `server` for definitions with id `server_id`.
    pub fn add(&self, server_id: &str, server: FakeServer) {
        self.servers
            .lock()
            .unwrap()
            .insert(server_id.to_string(), server);
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for FakeConnections {
    fn acquire(
        &self,
        definition: &ServerDefinition,
        _root: &Path,
    ) -> LspResult<Arc<dyn ConnectionProvider>> {
        let server = self
            .servers
            .lock()
            .unwrap()
            .get(&definition.id)
            .cloned()
            .or_else(|| self.default.clone())
            .ok_or_else(|| LspError::UnknownServer(definition.id.clone()))?;
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(server))
    }

    fn release(&self, _definition: &ServerDefinition, _root: &Path) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wait until `wrapper` reaches `status`. Returns `false` on timeout.
pub async fn wait_for_status(wrapper: &ServerWrapper, status: ServerStatus) -> bool {
    let mut updates = wrapper.subscribe();
    let reached = tokio::time::timeout(WAIT, updates.wait_for(|s| *s == status)).await;
    matches!(reached, Ok(Ok(_)))
}

/// Poll `condition` until it holds. Returns `false` on timeout.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
