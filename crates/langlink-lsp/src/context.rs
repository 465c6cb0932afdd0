//! Application-wide runtime context shared by the registry, wrappers and sessions.

use crate::config::{ConfigStore, FileConfigStore};
use crate::connection::{ConnectionFactory, ProcessConnections};
use crate::host::{EditorHost, NotificationSink};
use crate::session::DocumentSession;
use crate::timeout::{RequestKind, TimeoutRegistry};
use crate::wrapper::ServerWrapper;
use lsp_types::Uri;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Default number of consecutive crashes before a server is left failed.
pub const DEFAULT_CRASH_THRESHOLD: u32 = 4;

/// Non-owning lookup of open documents: uri to session and uri to wrapper.
#[derive(Default)]
pub struct DocumentIndex {
    sessions: Mutex<HashMap<String, Arc<DocumentSession>>>,
    wrappers: Mutex<HashMap<String, Weak<ServerWrapper>>>,
}

impl DocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session; a later insert for the same uri replaces the mapping.
    pub fn insert(&self, session: Arc<DocumentSession>, wrapper: Weak<ServerWrapper>) {
        let key = session.uri().as_str().to_string();
        self.wrappers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), wrapper);
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, session);
    }

    /// Drop the uri's entries, but only if they still belong to `session`.
    pub fn remove(&self, session: &Arc<DocumentSession>) {
        let key = session.uri().as_str();
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions.get(key).is_some_and(|s| Arc::ptr_eq(s, session)) {
            sessions.remove(key);
            self.wrappers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key);
        }
    }

    pub fn session(&self, uri: &Uri) -> Option<Arc<DocumentSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri.as_str())
            .cloned()
    }

    pub fn wrapper(&self, uri: &Uri) -> Option<Arc<ServerWrapper>> {
        self.wrappers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri.as_str())
            .and_then(Weak::upgrade)
    }

    pub fn sessions(&self) -> Vec<Arc<DocumentSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything a wrapper or session reaches for outside itself.
pub struct LspContext {
    pub crash_threshold: u32,
    pub timeouts: TimeoutRegistry,
    pub documents: DocumentIndex,
    pub connections: Arc<dyn ConnectionFactory>,
    pub sink: Arc<dyn NotificationSink>,
    pub config: Arc<dyn ConfigStore>,
    pub host: Arc<dyn EditorHost>,
}

impl LspContext {
    pub fn builder(sink: Arc<dyn NotificationSink>, host: Arc<dyn EditorHost>) -> LspContextBuilder {
        LspContextBuilder {
            sink,
            host,
            connections: None,
            config: None,
            crash_threshold: DEFAULT_CRASH_THRESHOLD,
            timeouts: HashMap::new(),
        }
    }
}

/// Builder for [`LspContext`].
pub struct LspContextBuilder {
    sink: Arc<dyn NotificationSink>,
    host: Arc<dyn EditorHost>,
    connections: Option<Arc<dyn ConnectionFactory>>,
    config: Option<Arc<dyn ConfigStore>>,
    crash_threshold: u32,
    timeouts: HashMap<RequestKind, u64>,
}

impl LspContextBuilder {
    pub fn connections(mut self, connections: Arc<dyn ConnectionFactory>) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn config(mut self, config: Arc<dyn ConfigStore>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn crash_threshold(mut self, threshold: u32) -> Self {
        self.crash_threshold = threshold;
        self
    }

    /// Timeout overrides in milliseconds, applied after the config store's.
    pub fn timeouts(mut self, timeouts: HashMap<RequestKind, u64>) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn build(self) -> Arc<LspContext> {
        let config = self
            .config
            .unwrap_or_else(|| Arc::new(FileConfigStore::new()));
        let timeouts = TimeoutRegistry::with_overrides(&config.timeout_overrides());
        timeouts.apply(&self.timeouts);

        Arc::new(LspContext {
            crash_threshold: self.crash_threshold,
            timeouts,
            documents: DocumentIndex::new(),
            connections: self
                .connections
                .unwrap_or_else(|| Arc::new(ProcessConnections::new())),
            sink: self.sink,
            config,
            host: self.host,
        })
    }
}
