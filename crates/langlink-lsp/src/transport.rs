//! LSP transport implementation (JSON-RPC over a framed byte stream).
//!
//! Messages are framed as `Content-Length: N\r\n\r\n<json>`. [`StdioTransport`] owns the
//! writer half and a reader task that resolves pending requests and hands server-initiated
//! traffic to a [`ServerMessageHandler`].

use crate::error::{LspError, LspResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// JSON-RPC error code for a method the receiver does not implement.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code for malformed parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Largest message body accepted from a server.
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Boxed read half of a server connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a server connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// JSON-RPC request id. Servers may use numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

/// JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Build a response from a handler outcome.
    pub fn from_outcome(id: RequestId, outcome: Result<Value, JsonRpcError>) -> Self {
        match outcome {
            Ok(result) => Self {
                jsonrpc: "2.0".to_string(),
                id,
                result: Some(result),
                error: None,
            },
            Err(error) => Self {
                jsonrpc: "2.0".to_string(),
                id,
                result: None,
                error: Some(error),
            },
        }
    }
}

/// JSON-RPC error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Unhandled method {method}"))
    }
}

impl From<JsonRpcError> for LspError {
    fn from(error: JsonRpcError) -> Self {
        LspError::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

/// JSON-RPC notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Any message read off the wire, before it is classified.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// A classified incoming message.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: RequestId,
        outcome: Result<Value, JsonRpcError>,
    },
}

impl IncomingMessage {
    /// Parse and classify one framed message body.
    pub fn parse(content: &str) -> LspResult<Self> {
        let raw: RawMessage = serde_json::from_str(content)
            .map_err(|e| LspError::protocol(format!("Invalid message: {e}")))?;
        let params = raw.params.unwrap_or(Value::Null);
        match (raw.id, raw.method) {
            (Some(id), Some(method)) => Ok(Self::Request { id, method, params }),
            (None, Some(method)) => Ok(Self::Notification { method, params }),
            (Some(id), None) => {
                let outcome = match raw.error {
                    Some(error) => Err(error),
                    None => Ok(raw.result.unwrap_or(Value::Null)),
                };
                Ok(Self::Response { id, outcome })
            }
            (None, None) => Err(LspError::protocol(
                "Message has neither id nor method",
            )),
        }
    }
}

/// Write one framed message.
pub async fn write_message<W>(writer: &mut W, content: &str) -> LspResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let message = format!("Content-Length: {}\r\n\r\n{}", content.len(), content);
    trace!(message = %content, "Sending LSP message");

    writer.write_all(message.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message. Returns `None` on a clean end of stream.
pub async fn read_message<R>(reader: &mut R) -> LspResult<Option<String>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;
    loop {
        let mut line = String::new();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            if saw_header {
                return Err(LspError::disconnected("Stream closed mid-message"));
            }
            return Ok(None);
        }

        let line = line.trim();
        if line.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;

        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                content_length = Some(
                    value
                        .trim()
                        .parse()
                        .map_err(|_| LspError::protocol("Invalid Content-Length"))?,
                );
            }
        }
    }

    let content_length = content_length
        .ok_or_else(|| LspError::protocol("Missing Content-Length header"))?;
    if content_length > MAX_CONTENT_LENGTH {
        return Err(LspError::protocol(format!(
            "Content-Length {content_length} exceeds {MAX_CONTENT_LENGTH}"
        )));
    }

    let mut content = vec![0u8; content_length];
    reader.read_exact(&mut content).await?;

    let content = String::from_utf8(content)
        .map_err(|e| LspError::protocol(format!("Invalid UTF-8: {e}")))?;

    trace!(content = %content, "Received LSP message");

    Ok(Some(content))
}

/// Client side of a server connection.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Send a request and wait for its result.
    async fn request(&self, method: &str, params: Value) -> LspResult<Value>;

    /// Send a notification.
    async fn notify(&self, method: &str, params: Value) -> LspResult<()>;

    /// Stop reading and release the writer.
    async fn close(&self) -> LspResult<()>;

    /// Whether the stream is still open.
    fn is_connected(&self) -> bool;
}

/// Receiver of server-initiated traffic.
#[async_trait]
pub trait ServerMessageHandler: Send + Sync {
    /// Answer a server-to-client request.
    async fn on_request(&self, method: &str, params: Value) -> Result<Value, JsonRpcError>;

    /// Handle a server-to-client notification.
    async fn on_notification(&self, method: &str, params: Value);

    /// The stream ended or failed without [`ServerTransport::close`] being called.
    fn on_disconnect(&self, reason: LspError);
}

type PendingMap = HashMap<i64, oneshot::Sender<LspResult<Value>>>;

/// Shared state between the transport handle and its reader task.
struct Shared {
    writer: Mutex<Option<BoxedWriter>>,
    pending: StdMutex<PendingMap>,
    connected: AtomicBool,
    closing: AtomicBool,
}

impl Shared {
    fn pending(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail_pending(&self, reason: &str) {
        for (_, sender) in self.pending().drain() {
            let _ = sender.send(Err(LspError::disconnected(reason.to_string())));
        }
    }

    async fn send(&self, content: &str) -> LspResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| LspError::disconnected("Transport closed"))?;
        write_message(writer, content).await
    }
}

/// Removes a pending entry when the awaiting future is dropped (e.g. on timeout).
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: i64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.id);
    }
}

/// LSP transport over a pair of byte streams (a process's stdio or an in-memory pipe).
pub struct StdioTransport {
    shared: Arc<Shared>,
    next_id: AtomicI64,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Wrap the streams and start the reader task.
    pub fn start(
        reader: BoxedReader,
        writer: BoxedWriter,
        handler: Arc<dyn ServerMessageHandler>,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            writer: Mutex::new(Some(writer)),
            pending: StdMutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            closing: AtomicBool::new(false),
        });

        let task = tokio::spawn(Self::read_loop(
            BufReader::new(reader),
            Arc::clone(&shared),
            handler,
        ));

        Arc::new(Self {
            shared,
            next_id: AtomicI64::new(1),
            reader: StdMutex::new(Some(task)),
        })
    }

    async fn read_loop(
        mut reader: BufReader<BoxedReader>,
        shared: Arc<Shared>,
        handler: Arc<dyn ServerMessageHandler>,
    ) {
        let reason = loop {
            let content = match read_message(&mut reader).await {
                Ok(Some(content)) => content,
                Ok(None) => break LspError::disconnected("Server closed connection"),
                Err(e) => break e,
            };

            match IncomingMessage::parse(&content) {
                Ok(IncomingMessage::Response { id, outcome }) => {
                    let RequestId::Number(id) = id else {
                        warn!(id = ?id, "Response with non-numeric id");
                        continue;
                    };
                    let sender = shared.pending().remove(&id);
                    match sender {
                        Some(sender) => {
                            let _ = sender.send(outcome.map_err(LspError::from));
                        }
                        None => debug!(id, "Discarding response for abandoned request"),
                    }
                }
                Ok(IncomingMessage::Notification { method, params }) => {
                    handler.on_notification(&method, params).await;
                }
                Ok(IncomingMessage::Request { id, method, params }) => {
                    let handler = Arc::clone(&handler);
                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        let outcome = handler.on_request(&method, params).await;
                        let response = JsonRpcResponse::from_outcome(id, outcome);
                        let sent = match serde_json::to_string(&response) {
                            Ok(json) => shared.send(&json).await,
                            Err(e) => Err(e.into()),
                        };
                        if let Err(e) = sent {
                            warn!(method = %method, error = %e, "Failed to answer server request");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Dropping unparseable message"),
            }
        };

        shared.connected.store(false, Ordering::SeqCst);
        shared.fail_pending("Server closed connection");
        if !shared.closing.load(Ordering::SeqCst) {
            debug!(reason = %reason, "LSP stream ended");
            handler.on_disconnect(reason);
        }
    }
}

#[async_trait]
impl ServerTransport for StdioTransport {
    async fn request(&self, method: &str, params: Value) -> LspResult<Value> {
        if !self.is_connected() {
            return Err(LspError::disconnected("Transport closed"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(id, tx);
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        let request = JsonRpcRequest::new(RequestId::Number(id), method, Some(params));
        self.shared.send(&serde_json::to_string(&request)?).await?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(LspError::disconnected("Response channel dropped")),
        }
    }

    async fn notify(&self, method: &str, params: Value) -> LspResult<()> {
        if !self.is_connected() {
            return Err(LspError::disconnected("Transport closed"));
        }
        let notification = JsonRpcNotification::new(method, Some(params));
        self.shared
            .send(&serde_json::to_string(&notification)?)
            .await
    }

    async fn close(&self) -> LspResult<()> {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);

        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        let task = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        self.shared.fail_pending("Transport closed");

        debug!("Closed LSP transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.reader.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as SyncMutex;
    use tokio::io::{duplex, split};

    #[derive(Default)]
    struct RecordingHandler {
        notifications: SyncMutex<Vec<String>>,
        disconnects: SyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl ServerMessageHandler for RecordingHandler {
        async fn on_request(&self, method: &str, _params: Value) -> Result<Value, JsonRpcError> {
            if method == "workspace/configuration" {
                Ok(serde_json::json!([{"enabled": true}]))
            } else {
                Err(JsonRpcError::method_not_found(method))
            }
        }

        async fn on_notification(&self, method: &str, _params: Value) {
            self.notifications.lock().unwrap().push(method.to_string());
        }

        fn on_disconnect(&self, reason: LspError) {
            self.disconnects.lock().unwrap().push(reason.to_string());
        }
    }

    #[tokio::test]
    async fn test_read_write_roundtrip_framing() {
        let (client, server) = duplex(4096);
        let (_server_read, mut server_write) = split(server);
        let (client_read, _client_write) = split(client);

        write_message(&mut server_write, r#"{"jsonrpc":"2.0","method":"x"}"#)
            .await
            .unwrap();
        let mut reader = BufReader::new(client_read);
        let message = read_message(&mut reader).await.unwrap();
        assert_eq!(message.as_deref(), Some(r#"{"jsonrpc":"2.0","method":"x"}"#));
    }

    #[tokio::test]
    async fn test_read_message_ignores_extra_headers() {
        let body = r#"{"id":1,"result":null}"#;
        let raw = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let mut reader = BufReader::new(raw.as_bytes());
        assert_eq!(read_message(&mut reader).await.unwrap().as_deref(), Some(body));
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_message_missing_length() {
        let mut reader = BufReader::new("X-Other: 1\r\n\r\n{}".as_bytes());
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("Missing Content-Length"));
    }

    #[tokio::test]
    async fn test_read_message_rejects_oversized_length() {
        let mut reader = BufReader::new("Content-Length: 18446744073709551615\r\n\r\n{}".as_bytes());
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, LspError::Protocol(_)));

        let header = format!("Content-Length: {}\r\n\r\n", MAX_CONTENT_LENGTH + 1);
        let mut reader = BufReader::new(header.as_bytes());
        assert!(matches!(
            read_message(&mut reader).await,
            Err(LspError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_reports_disconnect() {
        let (client, server) = duplex(1024);
        let (_server_read, mut server_write) = split(server);
        let (client_read, client_write) = split(client);
        let handler = Arc::new(RecordingHandler::default());
        let transport = StdioTransport::start(
            Box::new(client_read),
            Box::new(client_write),
            handler.clone(),
        );

        server_write
            .write_all(b"Content-Length: 18446744073709551615\r\n\r\n")
            .await
            .unwrap();
        for _ in 0..50 {
            if !handler.disconnects.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let disconnects = handler.disconnects.lock().unwrap().clone();
        assert_eq!(disconnects.len(), 1);
        assert!(disconnects[0].starts_with("Malformed message"));
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_classify_messages() {
        let request = IncomingMessage::parse(
            r#"{"jsonrpc":"2.0","id":"a","method":"client/registerCapability","params":{}}"#,
        )
        .unwrap();
        assert!(matches!(request, IncomingMessage::Request { id: RequestId::String(_), .. }));

        let notification =
            IncomingMessage::parse(r#"{"jsonrpc":"2.0","method":"window/logMessage"}"#).unwrap();
        assert!(matches!(notification, IncomingMessage::Notification { .. }));

        let error = IncomingMessage::parse(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"nope"}}"#,
        )
        .unwrap();
        match error {
            IncomingMessage::Response { id, outcome } => {
                assert_eq!(id, RequestId::Number(3));
                assert_eq!(outcome.unwrap_err().code, METHOD_NOT_FOUND);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(IncomingMessage::parse(r#"{"jsonrpc":"2.0"}"#).is_err());
    }

    #[tokio::test]
    async fn test_request_response_and_server_traffic() {
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = split(client);
        let (server_read, mut server_write) = split(server);
        let handler = Arc::new(RecordingHandler::default());
        let transport = StdioTransport::start(
            Box::new(client_read),
            Box::new(client_write),
            handler.clone(),
        );

        let server_task = tokio::spawn(async move {
            let mut reader = BufReader::new(server_read);
            let content = read_message(&mut reader).await.unwrap().unwrap();
            let request: JsonRpcRequest = serde_json::from_str(&content).unwrap();
            assert_eq!(request.method, "textDocument/hover");

            write_message(
                &mut server_write,
                r#"{"jsonrpc":"2.0","method":"window/logMessage","params":{"type":3,"message":"hi"}}"#,
            )
            .await
            .unwrap();
            write_message(
                &mut server_write,
                r#"{"jsonrpc":"2.0","id":7,"method":"workspace/configuration","params":{"items":[]}}"#,
            )
            .await
            .unwrap();
            let response = JsonRpcResponse::from_outcome(
                request.id,
                Ok(serde_json::json!({"contents": "doc"})),
            );
            write_message(&mut server_write, &serde_json::to_string(&response).unwrap())
                .await
                .unwrap();

            let answer = read_message(&mut reader).await.unwrap().unwrap();
            let answer: JsonRpcResponse = serde_json::from_str(&answer).unwrap();
            assert_eq!(answer.id, RequestId::Number(7));
            assert!(answer.result.is_some());
        });

        let result = transport
            .request("textDocument/hover", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result["contents"], "doc");

        server_task.await.unwrap();
        assert_eq!(
            handler.notifications.lock().unwrap().as_slice(),
            ["window/logMessage".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unexpected_eof_reports_disconnect() {
        let (client, server) = duplex(1024);
        let (client_read, client_write) = split(client);
        let handler = Arc::new(RecordingHandler::default());
        let transport = StdioTransport::start(
            Box::new(client_read),
            Box::new(client_write),
            handler.clone(),
        );

        drop(server);
        let err = transport
            .request("shutdown", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, LspError::Disconnected(_) | LspError::Io(_)));

        for _ in 0..50 {
            if !handler.disconnects.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(handler.disconnects.lock().unwrap().len(), 1);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_close_does_not_report_disconnect() {
        let (client, _server) = duplex(1024);
        let (client_read, client_write) = split(client);
        let handler = Arc::new(RecordingHandler::default());
        let transport = StdioTransport::start(
            Box::new(client_read),
            Box::new(client_write),
            handler.clone(),
        );

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        assert!(transport.notify("exit", Value::Null).await.is_err());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(handler.disconnects.lock().unwrap().is_empty());
    }
}
