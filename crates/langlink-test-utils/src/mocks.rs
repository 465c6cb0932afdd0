//! Mock implementations for testing.
//!
//! Recording doubles for the collaborators the client talks to: document buffers, the
//! notification sink, the editor host, the config store, the transport and the server
//! monitor.

use async_trait::async_trait;
use langlink_lsp::config::{ConfigStore, ServerSettings};
use langlink_lsp::host::{
    DiagnosticMarker, DocumentBuffer, EditorHost, HoverText, NotificationSink, OpenDocument,
};
use langlink_lsp::registration::DynamicMethod;
use langlink_lsp::request_manager::ServerMonitor;
use langlink_lsp::session::snippet::Snippet;
use langlink_lsp::session::CompletionEntry;
use langlink_lsp::timeout::RequestKind;
use langlink_lsp::transport::ServerTransport;
use langlink_lsp::wrapper::ServerStatus;
use langlink_lsp::{LspError, LspResult};
use lsp_types::{MessageType, Uri};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// An in-memory document buffer.
///
/// # Example
///
/// ```rust
/// use langlink_lsp::DocumentBuffer;
/// use langlink_test_utils::MemoryDocument;
///
/// let buffer = MemoryDocument::new("hello world");
/// buffer.replace(0, 5, "howdy");
/// assert_eq!(buffer.text(), "howdy world");
/// ```
#[derive(Debug, Default)]
pub struct MemoryDocument {
    text: Mutex<String>,
    saves: AtomicUsize,
}

impl MemoryDocument {
    pub fn new(text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            text: Mutex::new(text.into()),
            saves: AtomicUsize::new(0),
        })
    }

    /// Overwrite the whole text, as a user edit would.
    pub fn set_text(&self, text: impl Into<String>) {
        *self.text.lock().unwrap() = text.into();
    }

    /// Number of times the buffer was saved.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl DocumentBuffer for MemoryDocument {
    fn text(&self) -> String {
        self.text.lock().unwrap().clone()
    }

    fn replace(&self, start: usize, end: usize, text: &str) {
        let mut current = self.text.lock().unwrap();
        let end = end.min(current.len());
        let start = start.min(end);
        if current.is_char_boundary(start) && current.is_char_boundary(end) {
            current.replace_range(start..end, text);
        }
    }

    fn save(&self) {
        self.saves.fetch_add(1, Ordering::SeqCst);
    }
}

/// A notification sink that records everything it is shown.
#[derive(Debug, Default)]
pub struct RecordingSink {
    diagnostics: Mutex<Vec<(String, Vec<DiagnosticMarker>)>>,
    hovers: Mutex<Vec<(String, HoverText)>>,
    highlights: Mutex<Vec<(String, Vec<(usize, usize)>)>>,
    signatures: Mutex<Vec<String>>,
    completions: Mutex<Vec<Vec<String>>>,
    snippets: Mutex<Vec<(usize, Snippet)>>,
    messages: Mutex<Vec<(MessageType, String)>>,
    errors: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Markers of the last diagnostics update for `uri`.
    pub fn diagnostics_for(&self, uri: &Uri) -> Option<Vec<DiagnosticMarker>> {
        self.diagnostics
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(u, _)| u == uri.as_str())
            .map(|(_, markers)| markers.clone())
    }

    pub fn hovers(&self) -> Vec<HoverText> {
        self.hovers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, h)| h.clone())
            .collect()
    }

    pub fn highlights(&self) -> Vec<Vec<(usize, usize)>> {
        self.highlights
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn signatures(&self) -> Vec<String> {
        self.signatures.lock().unwrap().clone()
    }

    /// Labels of every completion list shown.
    pub fn completions(&self) -> Vec<Vec<String>> {
        self.completions.lock().unwrap().clone()
    }

    pub fn snippets(&self) -> Vec<(usize, Snippet)> {
        self.snippets.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<(MessageType, String)> {
        self.messages.lock().unwrap().clone()
    }

    /// Error popups as `(title, message)`.
    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn diagnostics(&self, uri: &Uri, markers: &[DiagnosticMarker]) {
        self.diagnostics
            .lock()
            .unwrap()
            .push((uri.as_str().to_string(), markers.to_vec()));
    }

    fn hover(&self, uri: &Uri, hover: &HoverText) {
        self.hovers
            .lock()
            .unwrap()
            .push((uri.as_str().to_string(), hover.clone()));
    }

    fn highlights(&self, uri: &Uri, ranges: &[(usize, usize)]) {
        self.highlights
            .lock()
            .unwrap()
            .push((uri.as_str().to_string(), ranges.to_vec()));
    }

    fn signature(&self, _uri: &Uri, label: &str) {
        self.signatures.lock().unwrap().push(label.to_string());
    }

    fn completions(&self, _uri: &Uri, entries: &[CompletionEntry]) {
        self.completions
            .lock()
            .unwrap()
            .push(entries.iter().map(|e| e.label.clone()).collect());
    }

    fn snippet(&self, _uri: &Uri, offset: usize, snippet: &Snippet) {
        self.snippets.lock().unwrap().push((offset, snippet.clone()));
    }

    fn message(&self, kind: MessageType, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((kind, message.to_string()));
    }

    fn error(&self, title: &str, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }
}

/// An editor host with a fixed, editable set of open documents.
#[derive(Default)]
pub struct StaticHost {
    documents: Mutex<Vec<OpenDocument>>,
}

impl StaticHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self, document: OpenDocument) {
        let mut documents = self.documents.lock().unwrap();
        documents.retain(|d| d.uri != document.uri);
        documents.push(document);
    }

    pub fn close(&self, uri: &Uri) {
        self.documents.lock().unwrap().retain(|d| d.uri != *uri);
    }
}

impl EditorHost for StaticHost {
    fn open_documents(&self) -> Vec<OpenDocument> {
        self.documents.lock().unwrap().clone()
    }
}

/// A config store backed by maps, keyed by server id.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    settings: Mutex<HashMap<String, ServerSettings>>,
    settings_paths: Mutex<HashMap<String, PathBuf>>,
    timeouts: Mutex<HashMap<RequestKind, u64>>,
}

impl MemoryConfigStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set the settings document of a server.
    ///
    /// # Panics
    ///
    /// Panics if `json` is not a valid settings document.
    pub fn set_settings(&self, server_id: &str, json: Value) {
        let settings = ServerSettings::parse(&json).expect("valid settings document");
        self.settings
            .lock()
            .unwrap()
            .insert(server_id.to_string(), settings);
    }

    pub fn set_settings_path(&self, server_id: &str, path: impl Into<PathBuf>) {
        self.settings_paths
            .lock()
            .unwrap()
            .insert(server_id.to_string(), path.into());
    }

    pub fn set_timeout(&self, kind: RequestKind, millis: u64) {
        self.timeouts.lock().unwrap().insert(kind, millis);
    }
}

impl ConfigStore for MemoryConfigStore {
    fn server_settings(&self, _root: &Path, server_id: &str) -> Option<ServerSettings> {
        self.settings.lock().unwrap().get(server_id).cloned()
    }

    fn settings_path(&self, _root: &Path, server_id: &str) -> Option<PathBuf> {
        self.settings_paths.lock().unwrap().get(server_id).cloned()
    }

    fn timeout_overrides(&self) -> HashMap<RequestKind, u64> {
        self.timeouts.lock().unwrap().clone()
    }
}

/// A transport that records calls and answers from a table.
///
/// Requests for methods without a configured answer return `null`.
///
/// # Example
///
/// ```rust
/// use langlink_lsp::ServerTransport;
/// use langlink_test_utils::MockTransport;
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let transport = MockTransport::new().with_response("shutdown", json!(null));
/// transport.notify("exit", json!(null)).await.unwrap();
/// assert_eq!(transport.count("exit"), 1);
/// # });
/// ```
#[derive(Debug)]
pub struct MockTransport {
    calls: Mutex<Vec<(String, Value)>>,
    responses: Mutex<HashMap<String, Value>>,
    errors: Mutex<HashMap<String, (i64, String)>>,
    connected: AtomicBool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, method: &str, result: Value) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(method.to_string(), result);
        self
    }

    /// Answer `method` with a JSON-RPC error.
    pub fn with_error(self, method: &str, code: i64, message: &str) -> Self {
        self.errors
            .lock()
            .unwrap()
            .insert(method.to_string(), (code, message.to_string()));
        self
    }

    /// Make every following call fail as if the server went away.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Every request and notification, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    /// Params of every call to `method`.
    pub fn params(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn record(&self, method: &str, params: Value) -> LspResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        if self.is_connected() {
            Ok(())
        } else {
            Err(LspError::disconnected("Transport closed"))
        }
    }
}

#[async_trait]
impl ServerTransport for MockTransport {
    async fn request(&self, method: &str, params: Value) -> LspResult<Value> {
        self.record(method, params)?;
        if let Some((code, message)) = self.errors.lock().unwrap().get(method) {
            return Err(LspError::Rpc {
                code: *code,
                message: message.clone(),
            });
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(method)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn notify(&self, method: &str, params: Value) -> LspResult<()> {
        self.record(method, params)
    }

    async fn close(&self) -> LspResult<()> {
        self.disconnect();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A server monitor with a settable status that records crash reports.
#[derive(Debug)]
pub struct StaticMonitor {
    status: Mutex<ServerStatus>,
    crashes: Mutex<Vec<String>>,
    registered: Mutex<Vec<DynamicMethod>>,
}

impl StaticMonitor {
    pub fn new(status: ServerStatus) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
            crashes: Mutex::new(Vec::new()),
            registered: Mutex::new(Vec::new()),
        })
    }

    pub fn set_status(&self, status: ServerStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Pretend the server registered `method` dynamically.
    pub fn register(&self, method: DynamicMethod) {
        self.registered.lock().unwrap().push(method);
    }

    /// Messages of the reported crashes.
    pub fn crashes(&self) -> Vec<String> {
        self.crashes.lock().unwrap().clone()
    }
}

impl ServerMonitor for StaticMonitor {
    fn status(&self) -> ServerStatus {
        *self.status.lock().unwrap()
    }

    fn report_crash(&self, error: LspError) {
        self.crashes.lock().unwrap().push(error.to_string());
    }

    fn is_registered(&self, method: &DynamicMethod) -> bool {
        self.registered.lock().unwrap().contains(method)
    }
}
