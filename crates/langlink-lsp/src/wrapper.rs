//! Server lifecycle state machine.
//!
//! A [`ServerWrapper`] owns one language server process for one (definition, project
//! root) pair: it starts the process, runs the `initialize` handshake, keeps the
//! capability snapshot and dynamic registrations, connects document sessions, and
//! recovers from crashes.
//!
//! ```text
//!   Stopped ──start──▶ Starting ──initialize ok──▶ Started
//!      ▲                  │                          │
//!      │                  └──timeout / io error──▶ Failed
//!      └──────────────────────── stop ◀──────────────┘
//! ```

use crate::client::ClientHandler;
use crate::config::{ServerSettings, GLOBAL_SCOPE};
use crate::connection::{spawn_error_log, ConnectionProvider};
use crate::context::LspContext;
use crate::definition::{language_id, ServerDefinition};
use crate::error::{LspError, LspResult};
use crate::host::{path_to_uri, uri_to_path, OpenDocument};
use crate::registration::{DynamicMethod, RegistrationTable};
use crate::request_manager::{RequestManager, ServerMonitor};
use crate::session::DocumentSession;
use crate::timeout::RequestKind;
use crate::transport::{ServerTransport, StdioTransport};
use lsp_types::{
    ClientCapabilities, CompletionClientCapabilities, CompletionItemCapability,
    DidChangeConfigurationParams, DidChangeWatchedFilesClientCapabilities,
    DidChangeWatchedFilesParams, DynamicRegistrationClientCapabilities, FileChangeType, FileEvent,
    HoverClientCapabilities, InitializeParams, InitializeResult, InitializedParams, MarkupKind,
    PublishDiagnosticsClientCapabilities, RenameClientCapabilities,
    SignatureHelpClientCapabilities, TextDocumentClientCapabilities,
    TextDocumentSyncClientCapabilities, Uri, WorkspaceClientCapabilities,
    WorkspaceEditClientCapabilities, WorkspaceFolder,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Started,
    Failed,
}

impl ServerStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ServerStatus) -> bool {
        use ServerStatus::*;
        matches!(
            (self, next),
            (Stopped | Failed, Starting)
                | (Starting, Started)
                | (Starting | Started, Failed)
                | (_, Stopped)
        )
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerStatus::Stopped => "stopped",
            ServerStatus::Starting => "starting",
            ServerStatus::Started => "started",
            ServerStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Handles of one live connection.
#[derive(Default)]
struct Connection {
    monitor: Option<Arc<ConnectionMonitor>>,
    provider: Option<Arc<dyn ConnectionProvider>>,
    transport: Option<Arc<dyn ServerTransport>>,
    error_log: Option<JoinHandle<()>>,
    init_task: Option<JoinHandle<()>>,
    started_at: Option<Instant>,
}

/// The wrapper as seen by the request manager of one connection.
///
/// Once the connection is gone it reports `Stopped` and drops crash reports.
struct ConnectionMonitor {
    wrapper: Weak<ServerWrapper>,
    generation: u64,
}

impl ServerMonitor for ConnectionMonitor {
    fn status(&self) -> ServerStatus {
        match self.wrapper.upgrade() {
            Some(wrapper) if wrapper.generation() == self.generation => wrapper.status(),
            _ => ServerStatus::Stopped,
        }
    }

    fn report_crash(&self, error: LspError) {
        let Some(wrapper) = self.wrapper.upgrade() else {
            return;
        };
        let generation = self.generation;
        tokio::spawn(async move { wrapper.crashed_at(generation, error).await });
    }

    fn is_registered(&self, method: &DynamicMethod) -> bool {
        self.wrapper
            .upgrade()
            .is_some_and(|w| w.with_registrations(|r| r.is_registered(method)))
    }
}

/// One language server process for one project root.
pub struct ServerWrapper {
    definition: ServerDefinition,
    root: PathBuf,
    context: Arc<LspContext>,
    this: Weak<ServerWrapper>,

    status: watch::Sender<ServerStatus>,
    transitions: StdMutex<Vec<(ServerStatus, ServerStatus)>>,
    /// Bumped on every start and stop; reports from older connections are dropped.
    generation: AtomicU64,
    crash_count: AtomicU32,
    failure_shown: AtomicBool,
    crash_shown: AtomicBool,

    /// Serializes start, stop and crash handling.
    lifecycle: Mutex<()>,
    connection: StdMutex<Connection>,
    request_manager: StdMutex<Option<Arc<RequestManager>>>,
    registrations: StdMutex<RegistrationTable>,
    settings: StdMutex<ServerSettings>,

    connected: StdMutex<HashMap<String, Arc<DocumentSession>>>,
    /// Documents waiting for the handshake, in arrival order.
    to_connect: StdMutex<VecDeque<OpenDocument>>,
}

impl ServerWrapper {
    pub fn new(
        definition: ServerDefinition,
        root: impl Into<PathBuf>,
        context: Arc<LspContext>,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(ServerStatus::Stopped);
        let root = root.into();
        Arc::new_cyclic(|this| Self {
            definition,
            root,
            context,
            this: this.clone(),
            status,
            transitions: StdMutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            crash_count: AtomicU32::new(0),
            failure_shown: AtomicBool::new(false),
            crash_shown: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            connection: StdMutex::new(Connection::default()),
            request_manager: StdMutex::new(None),
            registrations: StdMutex::new(RegistrationTable::new()),
            settings: StdMutex::new(ServerSettings::default()),
            connected: StdMutex::new(HashMap::new()),
            to_connect: StdMutex::new(VecDeque::new()),
        })
    }

    pub fn definition(&self) -> &ServerDefinition {
        &self.definition
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn context(&self) -> &Arc<LspContext> {
        &self.context
    }

    pub fn status(&self) -> ServerStatus {
        *self.status.borrow()
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.status.subscribe()
    }

    /// Every status transition so far, oldest first.
    pub fn transitions(&self) -> Vec<(ServerStatus, ServerStatus)> {
        self.transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn crash_count(&self) -> u32 {
        self.crash_count.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Request manager of the live connection, once initialized.
    pub fn request_manager(&self) -> Option<Arc<RequestManager>> {
        self.request_manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Time since the `initialize` request was sent.
    pub fn uptime(&self) -> Option<std::time::Duration> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .started_at
            .map(|t| t.elapsed())
    }

    pub fn settings(&self) -> ServerSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn with_registrations<T>(&self, f: impl FnOnce(&mut RegistrationTable) -> T) -> T {
        f(&mut self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }

    /// Uris of the connected documents.
    pub fn connected_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self
            .connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        uris.sort();
        uris
    }

    pub fn is_connected_to(&self, uri: &Uri) -> bool {
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(uri.as_str())
    }

    /// Whether the document waits for the server to finish starting.
    pub fn is_pending(&self, uri: &Uri) -> bool {
        self.to_connect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|d| d.uri == *uri)
    }

    /// Stopped, with no document connected or waiting.
    pub fn is_idle(&self) -> bool {
        self.status() == ServerStatus::Stopped
            && self
                .connected
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
            && self
                .to_connect
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
    }

    pub fn session(&self, uri: &Uri) -> Option<Arc<DocumentSession>> {
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri.as_str())
            .cloned()
    }

    fn set_status(&self, next: ServerStatus) -> bool {
        let current = self.status();
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!(
                server = %self.definition.id,
                from = %current,
                to = %next,
                "Refusing illegal status transition"
            );
            return false;
        }
        self.transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((current, next));
        self.status.send_replace(next);
        debug!(server = %self.definition.id, from = %current, to = %next, "Server status changed");
        true
    }

    // Lifecycle

    /// Start the server unless it is already starting or started.
    ///
    /// Returns once the process runs and `initialize` is sent; the handshake completes in
    /// the background and moves the status to `Started` or `Failed`.
    pub async fn start(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.start_locked().await;
    }

    async fn start_locked(&self) {
        if !matches!(self.status(), ServerStatus::Stopped | ServerStatus::Failed) {
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        self.set_status(ServerStatus::Starting);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            server = %self.definition.id,
            root = %self.root.display(),
            "Starting language server"
        );

        if let Err(e) = self.launch(&this, generation).await {
            error!(server = %self.definition.id, error = %e, "Failed to start language server");
            self.show_failure(&format!("Can't start server, please check settings\n{e}"));
            self.set_status(ServerStatus::Failed);
            self.stop_locked().await;
        }
    }

    async fn launch(&self, this: &Arc<Self>, generation: u64) -> LspResult<()> {
        let provider = self
            .context
            .connections
            .acquire(&self.definition, &self.root)?;
        let streams = provider.start().await?;

        let error_log = streams
            .stderr
            .map(|stderr| spawn_error_log(self.definition.id.clone(), stderr));

        self.load_settings();

        let handler = Arc::new(ClientHandler::new(Arc::downgrade(this), generation));
        let transport: Arc<dyn ServerTransport> =
            StdioTransport::start(streams.reader, streams.writer, handler);
        let monitor = Arc::new(ConnectionMonitor {
            wrapper: Arc::downgrade(this),
            generation,
        });

        let params = serde_json::to_value(self.initialize_params()?)?;
        let init_task = tokio::spawn(Self::initialize(
            Arc::clone(this),
            Arc::clone(&transport),
            Arc::clone(&monitor),
            params,
            generation,
        ));

        let mut connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        connection.monitor = Some(monitor);
        connection.provider = Some(provider);
        connection.transport = Some(transport);
        connection.error_log = error_log;
        connection.init_task = Some(init_task);
        connection.started_at = Some(Instant::now());
        Ok(())
    }

    fn initialize_params(&self) -> LspResult<InitializeParams> {
        let root_uri = path_to_uri(&self.root)?;
        let name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string());

        Ok(InitializeParams {
            process_id: Some(std::process::id()),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name,
            }]),
            initialization_options: self.definition.initialization_options.clone(),
            capabilities: client_capabilities(),
            ..Default::default()
        })
    }

    async fn initialize(
        self: Arc<Self>,
        transport: Arc<dyn ServerTransport>,
        monitor: Arc<ConnectionMonitor>,
        params: Value,
        generation: u64,
    ) {
        let response = self
            .context
            .timeouts
            .limit(RequestKind::Init, transport.request("initialize", params))
            .await;
        let result = response.and_then(|r| r).and_then(|value| {
            serde_json::from_value::<InitializeResult>(value)
                .map_err(|e| LspError::Initialize(e.to_string()))
        });

        match result {
            Ok(result) => self.initialized(result, transport, &monitor, generation).await,
            Err(e) => {
                if self.generation() != generation {
                    return;
                }
                let message = match &e {
                    LspError::Timeout => format!(
                        "Language server {} not initialized after {}s\nCheck settings",
                        self.definition.id,
                        self.context.timeouts.get(RequestKind::Init).as_secs()
                    ),
                    other => format!("Language server {} failed to initialize: {other}", self.definition.id),
                };
                warn!(server = %self.definition.id, error = %e, "Initialization failed");
                self.show_failure(&message);
                self.set_status(ServerStatus::Failed);
                // Runs outside this task, which stop cancels.
                let wrapper = Arc::clone(&self);
                tokio::spawn(async move { wrapper.stop_generation(generation).await });
            }
        }
    }

    async fn initialized(
        &self,
        result: InitializeResult,
        transport: Arc<dyn ServerTransport>,
        monitor: &Arc<ConnectionMonitor>,
        generation: u64,
    ) {
        // Held until the queue is flushed, so a stop cannot interleave with the transition.
        let _lifecycle = self.lifecycle.lock().await;
        if self.generation() != generation || self.status() != ServerStatus::Starting {
            debug!(server = %self.definition.id, "Dropping initialize result of a stopped connection");
            return;
        }
        info!(server = %self.definition.id, "Language server initialized");

        let monitor: Weak<dyn ServerMonitor> = Arc::downgrade(monitor) as Weak<dyn ServerMonitor>;
        let manager = Arc::new(RequestManager::new(
            Arc::clone(&transport),
            result.capabilities,
            monitor,
        ));
        *self
            .request_manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&manager));
        self.set_status(ServerStatus::Started);

        if let Err(e) = transport
            .notify(
                "initialized",
                serde_json::to_value(InitializedParams {}).unwrap_or(Value::Null),
            )
            .await
        {
            warn!(server = %self.definition.id, error = %e, "Failed to send initialized");
        }
        self.push_settings(&manager).await;

        let queued: Vec<OpenDocument> = self
            .to_connect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for document in queued {
            self.open_session(&document).await;
        }
    }

    fn load_settings(&self) {
        let settings = self
            .context
            .config
            .server_settings(&self.root, &self.definition.id)
            .unwrap_or_default();
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    async fn push_settings(&self, manager: &RequestManager) {
        let settings = self.settings().section("", GLOBAL_SCOPE);
        if settings.is_null() {
            return;
        }
        manager
            .did_change_configuration(DidChangeConfigurationParams { settings })
            .await;
    }

    /// Stop the server and disconnect every document. A failed server stays failed.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    async fn stop_generation(&self, generation: u64) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.generation() == generation {
            self.stop_locked().await;
        }
    }

    async fn stop_locked(&self) {
        // Sessions close first so their didClose still reaches a live server.
        let sessions: Vec<Arc<DocumentSession>> = self
            .connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, s)| s)
            .collect();
        for session in sessions {
            self.context.documents.remove(&session);
            session.document_closed().await;
        }
        self.to_connect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        self.generation.fetch_add(1, Ordering::SeqCst);
        let connection = std::mem::take(
            &mut *self
                .connection
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if let Some(init_task) = connection.init_task {
            init_task.abort();
        }
        let manager = self
            .request_manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(transport) = &connection.transport {
            if manager.is_some() && transport.is_connected() {
                let shutdown = self
                    .context
                    .timeouts
                    .limit(RequestKind::Shutdown, transport.request("shutdown", Value::Null))
                    .await;
                match shutdown {
                    Ok(Ok(_)) => {
                        let _ = transport.notify("exit", Value::Null).await;
                    }
                    // Most likely the process is already gone.
                    Ok(Err(e)) => debug!(server = %self.definition.id, error = %e, "Shutdown failed"),
                    Err(_) => debug!(server = %self.definition.id, "Shutdown timed out"),
                }
            }
            let _ = transport.close().await;
        }
        if let Some(provider) = connection.provider {
            provider.stop().await;
            self.context.connections.release(&self.definition, &self.root);
        }
        self.with_registrations(RegistrationTable::clear);

        if self.status() != ServerStatus::Failed {
            self.set_status(ServerStatus::Stopped);
        }
        if let Some(error_log) = connection.error_log {
            error_log.abort();
        }
        info!(server = %self.definition.id, root = %self.root.display(), "Language server stopped");
    }

    /// The connection failed.
    ///
    /// Below the crash threshold the server restarts and reconnects every document that
    /// was connected; at the threshold it is left failed until [`restart`](Self::restart).
    pub async fn crashed(&self, error: LspError) {
        let generation = self.generation();
        self.crashed_at(generation, error).await;
    }

    pub(crate) async fn crashed_at(&self, generation: u64, error: LspError) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.generation() != generation {
            debug!(server = %self.definition.id, error = %error, "Ignoring stale crash report");
            return;
        }

        let count = self.crash_count.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(server = %self.definition.id, count, error = %error, "Language server crashed");

        if count < self.context.crash_threshold {
            let documents = self.connected_documents();
            self.stop_locked().await;
            if documents.is_empty() {
                return;
            }
            self.start_locked().await;
            for document in documents {
                self.connect_started(document).await;
            }
        } else {
            if self.status() != ServerStatus::Failed {
                self.set_status(ServerStatus::Failed);
            }
            self.stop_locked().await;
            if !self.crash_shown.swap(true, Ordering::SeqCst) {
                self.context.sink.error(
                    "LSP Error",
                    &format!(
                        "Language server {} for {} keeps crashing due to\n{error}\nCheck settings.",
                        self.definition.id,
                        self.root.display()
                    ),
                );
            }
        }
    }

    /// Stop if running, then reconnect every open document this server handles.
    ///
    /// Clears the crash count, so a failed server may start again.
    pub async fn restart(&self) {
        {
            let _lifecycle = self.lifecycle.lock().await;
            if matches!(self.status(), ServerStatus::Started | ServerStatus::Starting) {
                info!(server = %self.definition.id, "Stopping for restart");
                self.stop_locked().await;
            }
            self.crash_count.store(0, Ordering::SeqCst);
            self.crash_shown.store(false, Ordering::SeqCst);
            self.failure_shown.store(false, Ordering::SeqCst);
        }

        let documents: Vec<OpenDocument> = self
            .context
            .host
            .open_documents()
            .into_iter()
            .filter(|d| d.root == self.root && self.definition.handles_extension(&d.extension()))
            .collect();
        if documents.is_empty() {
            return;
        }
        self.start().await;
        for document in documents {
            self.connect_started(document).await;
        }
    }

    fn show_failure(&self, message: &str) {
        if !self.failure_shown.swap(true, Ordering::SeqCst) {
            self.context.sink.error("LSP Error", message);
        }
    }

    /// Connected and queued documents.
    fn connected_documents(&self) -> Vec<OpenDocument> {
        let mut documents: Vec<OpenDocument> = self
            .connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|s| OpenDocument {
                uri: s.uri().clone(),
                path: s.path().to_path_buf(),
                root: self.root.clone(),
                buffer: Arc::clone(s.buffer()),
            })
            .collect();
        let queue = self.to_connect.lock().unwrap_or_else(PoisonError::into_inner);
        for document in queue.iter() {
            if !documents.iter().any(|d| d.uri == document.uri) {
                documents.push(document.clone());
            }
        }
        documents
    }

    // Documents

    /// Connect a document, starting the server if needed.
    ///
    /// While the handshake runs the document is queued and connected once it completes.
    /// A failed server is not started again here.
    pub async fn connect(&self, document: OpenDocument) {
        if self.status() == ServerStatus::Failed {
            debug!(server = %self.definition.id, uri = %document.uri.as_str(), "Server failed, not connecting");
            return;
        }
        self.start().await;
        self.connect_started(document).await;
    }

    async fn connect_started(&self, document: OpenDocument) {
        if self.is_connected_to(&document.uri) {
            return;
        }
        {
            let mut queue = self.to_connect.lock().unwrap_or_else(PoisonError::into_inner);
            match self.status() {
                ServerStatus::Starting => {
                    if !queue.iter().any(|d| d.uri == document.uri) {
                        queue.push_back(document);
                    }
                    return;
                }
                ServerStatus::Started => {}
                status => {
                    debug!(server = %self.definition.id, %status, "Server not running, dropping document");
                    return;
                }
            }
        }
        self.open_session(&document).await;
    }

    async fn open_session(&self, document: &OpenDocument) {
        let session = {
            let mut connected = self.connected.lock().unwrap_or_else(PoisonError::into_inner);
            let key = document.uri.as_str().to_string();
            if connected.contains_key(&key) {
                return;
            }
            let extension = document.extension();
            let language = language_id(&extension)
                .map(str::to_string)
                .unwrap_or_else(|| extension.clone());
            let session = DocumentSession::new(
                document,
                language,
                self.this.clone(),
                Arc::clone(&self.context),
            );
            connected.insert(key, Arc::clone(&session));
            session
        };
        self.context
            .documents
            .insert(Arc::clone(&session), self.this.clone());
        session.document_opened().await;
        info!(server = %self.definition.id, uri = %document.uri.as_str(), "Connected document");
    }

    /// Disconnect a document; the last disconnect stops the server.
    pub async fn disconnect(&self, uri: &Uri) {
        let (session, now_empty) = {
            let mut connected = self.connected.lock().unwrap_or_else(PoisonError::into_inner);
            (connected.remove(uri.as_str()), connected.is_empty())
        };
        let (was_pending, queue_empty) = {
            let mut queue = self.to_connect.lock().unwrap_or_else(PoisonError::into_inner);
            let before = queue.len();
            queue.retain(|d| d.uri != *uri);
            (queue.len() != before, queue.is_empty())
        };

        if let Some(session) = &session {
            self.context.documents.remove(session);
            session.document_closed().await;
            debug!(server = %self.definition.id, uri = %uri.as_str(), "Disconnected document");
        }
        if (session.is_some() || was_pending) && now_empty && queue_empty {
            self.stop().await;
        }
    }

    // Workspace

    /// A watched file changed on disk.
    ///
    /// Reloads the settings when it is this server's settings file, then forwards the
    /// event if the server's watchers accept it.
    pub async fn did_change_watched_files(&self, uri: &Uri, change: FileChangeType) {
        let path = uri_to_path(uri);
        let settings_path = self
            .context
            .config
            .settings_path(&self.root, &self.definition.id);
        let manager = self.request_manager();

        if path.is_some() && path == settings_path {
            self.load_settings();
            if let Some(manager) = &manager {
                info!(server = %self.definition.id, "Settings changed, pushing configuration");
                self.push_settings(manager).await;
            }
        }

        let forward = match &path {
            Some(path) => self.with_registrations(|r| r.should_forward(path, change)),
            None => self.with_registrations(|r| !r.is_registered(&DynamicMethod::DidChangeWatchedFiles)),
        };
        if !forward {
            return;
        }
        if let Some(manager) = manager {
            manager
                .did_change_watched_files(DidChangeWatchedFilesParams {
                    changes: vec![FileEvent::new(uri.clone(), change)],
                })
                .await;
        }
    }
}

impl std::fmt::Debug for ServerWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerWrapper")
            .field("server", &self.definition.id)
            .field("root", &self.root)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn client_capabilities() -> ClientCapabilities {
    let dynamic = Some(true);
    ClientCapabilities {
        workspace: Some(WorkspaceClientCapabilities {
            apply_edit: Some(true),
            workspace_edit: Some(WorkspaceEditClientCapabilities {
                document_changes: Some(true),
                ..Default::default()
            }),
            did_change_configuration: Some(DynamicRegistrationClientCapabilities {
                dynamic_registration: dynamic,
            }),
            did_change_watched_files: Some(DidChangeWatchedFilesClientCapabilities {
                dynamic_registration: dynamic,
                relative_pattern_support: Some(true),
            }),
            execute_command: Some(DynamicRegistrationClientCapabilities {
                dynamic_registration: dynamic,
            }),
            configuration: Some(true),
            ..Default::default()
        }),
        text_document: Some(TextDocumentClientCapabilities {
            synchronization: Some(TextDocumentSyncClientCapabilities {
                dynamic_registration: dynamic,
                will_save: Some(true),
                will_save_wait_until: Some(true),
                did_save: Some(true),
            }),
            completion: Some(CompletionClientCapabilities {
                dynamic_registration: dynamic,
                completion_item: Some(CompletionItemCapability {
                    snippet_support: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            hover: Some(HoverClientCapabilities {
                dynamic_registration: dynamic,
                content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
            }),
            signature_help: Some(SignatureHelpClientCapabilities {
                dynamic_registration: dynamic,
                ..Default::default()
            }),
            rename: Some(RenameClientCapabilities {
                dynamic_registration: dynamic,
                prepare_support: Some(true),
                ..Default::default()
            }),
            publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                related_information: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
