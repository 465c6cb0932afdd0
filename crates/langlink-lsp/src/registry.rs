//! Routing of editor events to servers and sessions.
//!
//! [`LspRegistry`] maps extensions to definitions, (definition, root) pairs to wrappers,
//! and uris to sessions, so the host can forward editor events without knowing anything
//! about the protocol.

use crate::config::{ForcedAssociation, LspConfig};
use crate::context::LspContext;
use crate::definition::ServerDefinition;
use crate::host::{uri_to_path, OpenDocument};
use crate::session::DocumentSession;
use crate::timeout::RequestKind;
use crate::wrapper::{ServerStatus, ServerWrapper};
use futures::future::join_all;
use lsp_types::{
    FileChangeType, Location, OneOf, PartialResultParams, SymbolKind, Uri, WorkDoneProgressParams,
    WorkspaceSymbolParams, WorkspaceSymbolResponse,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// One workspace symbol found by a server.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolMatch {
    pub name: String,
    pub kind: SymbolKind,
    pub container_name: Option<String>,
    pub uri: Uri,
    /// Absent when the server only gave the symbol's document.
    pub range: Option<lsp_types::Range>,
    /// Id of the server that found it.
    pub server: String,
}

/// Dispatch layer between the editor and the servers.
pub struct LspRegistry {
    context: Arc<LspContext>,
    /// Extension key (split parts and combined keys) to definition.
    definitions: Mutex<HashMap<String, ServerDefinition>>,
    /// Document uri to the definition it is pinned to.
    forced: Mutex<HashMap<String, ForcedAssociation>>,
    wrappers: Mutex<Vec<Arc<ServerWrapper>>>,
}

impl LspRegistry {
    pub fn new(context: Arc<LspContext>) -> Self {
        Self {
            context,
            definitions: Mutex::new(HashMap::new()),
            forced: Mutex::new(HashMap::new()),
            wrappers: Mutex::new(Vec::new()),
        }
    }

    /// Registry seeded with the definitions and forced associations of `config`.
    pub fn from_config(context: Arc<LspContext>, config: &LspConfig) -> Self {
        let registry = Self::new(context);
        *registry.definitions.lock().unwrap_or_else(PoisonError::into_inner) =
            flatten(config.definitions());
        let mut forced = registry.forced.lock().unwrap_or_else(PoisonError::into_inner);
        for association in &config.forced_associations {
            match ServerDefinition::from_array(&association.definition) {
                Ok(_) => {
                    forced.insert(association.uri.clone(), association.clone());
                }
                Err(e) => warn!(uri = %association.uri, error = %e, "Skipping forced association"),
            }
        }
        drop(forced);
        registry
    }

    pub fn context(&self) -> &Arc<LspContext> {
        &self.context
    }

    /// Flattened extension mapping.
    pub fn definitions(&self) -> HashMap<String, ServerDefinition> {
        self.definitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn wrappers(&self) -> Vec<Arc<ServerWrapper>> {
        self.wrappers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn forced_associations(&self) -> Vec<ForcedAssociation> {
        let mut associations: Vec<ForcedAssociation> = self
            .forced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        associations.sort_by(|a, b| a.uri.cmp(&b.uri));
        associations
    }

    pub fn is_extension_supported(&self, ext: &str) -> bool {
        self.definitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(ext)
    }

    /// Replace the extension mapping.
    ///
    /// Wrappers of removed or modified definitions are stopped and dropped, forced
    /// associations to definitions that no longer exist are dropped, and open documents
    /// whose extension gained a definition are opened again.
    pub async fn set_definitions(&self, definitions: Vec<ServerDefinition>) {
        let new = flatten(definitions);
        let old = std::mem::replace(
            &mut *self.definitions.lock().unwrap_or_else(PoisonError::into_inner),
            new.clone(),
        );

        let modified: HashSet<&String> = new
            .iter()
            .filter(|(ext, def)| old.get(*ext).is_some_and(|o| o != *def))
            .map(|(ext, _)| ext)
            .collect();
        let added: HashSet<&String> = new
            .keys()
            .filter(|ext| !old.contains_key(*ext))
            .chain(modified.iter().copied())
            .collect();
        let removed: HashSet<&String> = old
            .keys()
            .filter(|ext| !new.contains_key(*ext))
            .chain(modified.iter().copied())
            .collect();
        info!(
            added = added.len(),
            removed = removed.len(),
            modified = modified.len(),
            "Server definitions changed"
        );

        let stale_forced: Vec<String> = {
            let mut forced = self.forced.lock().unwrap_or_else(PoisonError::into_inner);
            let stale: Vec<String> = forced
                .iter()
                .filter(|(_, a)| {
                    ServerDefinition::from_array(&a.definition)
                        .map_or(true, |def| !new.values().any(|d| *d == def))
                })
                .map(|(uri, _)| uri.clone())
                .collect();
            for uri in &stale {
                forced.remove(uri);
            }
            stale
        };
        for uri in stale_forced {
            if let Ok(uri) = uri.parse::<Uri>() {
                self.disconnect(&uri).await;
            }
        }

        let dropped: Vec<Arc<ServerWrapper>> = {
            let mut wrappers = self.wrappers.lock().unwrap_or_else(PoisonError::into_inner);
            let (dropped, kept): (Vec<_>, Vec<_>) = wrappers.drain(..).partition(|w| {
                w.definition()
                    .extensions()
                    .iter()
                    .any(|ext| removed.contains(ext))
            });
            *wrappers = kept;
            dropped
        };
        for wrapper in dropped {
            info!(server = %wrapper.definition().id, "Removing server");
            wrapper.stop().await;
        }

        for document in self.context.host.open_documents() {
            if added.contains(&document.extension()) {
                self.document_opened(document).await;
            }
        }
    }

    /// Definition a document should use: its forced association, else its extension's.
    pub fn definition_for(&self, document: &OpenDocument) -> Option<ServerDefinition> {
        let forced = self
            .forced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document.uri.as_str())
            .and_then(|a| ServerDefinition::from_array(&a.definition).ok());
        forced.or_else(|| {
            self.definitions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&document.extension())
                .cloned()
        })
    }

    fn wrapper_for_definition(&self, definition: &ServerDefinition, root: &Path) -> Arc<ServerWrapper> {
        let mut wrappers = self.wrappers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(wrapper) = wrappers
            .iter()
            .find(|w| w.definition() == definition && w.root() == root)
        {
            return Arc::clone(wrapper);
        }
        info!(
            server = %definition.id,
            extension = %definition.extension,
            root = %root.display(),
            "Creating server wrapper"
        );
        let wrapper = ServerWrapper::new(definition.clone(), root, Arc::clone(&self.context));
        wrappers.push(Arc::clone(&wrapper));
        wrapper
    }

    /// A document was opened in the editor.
    pub async fn document_opened(&self, document: OpenDocument) {
        let Some(definition) = self.definition_for(&document) else {
            debug!(uri = %document.uri.as_str(), "No server for document");
            return;
        };
        let wrapper = self.wrapper_for_definition(&definition, &document.root);
        if let Some(current) = self.wrapper_for(&document.uri) {
            if Arc::ptr_eq(&current, &wrapper) {
                return;
            }
            current.disconnect(&document.uri).await;
        }
        wrapper.connect(document).await;
        self.track(&wrapper);
        self.prune();
    }

    /// Keep `wrapper` listed; a concurrent prune may have dropped it before it connected.
    fn track(&self, wrapper: &Arc<ServerWrapper>) {
        let mut wrappers = self.wrappers.lock().unwrap_or_else(PoisonError::into_inner);
        if !wrapper.is_idle() && !wrappers.iter().any(|w| Arc::ptr_eq(w, wrapper)) {
            wrappers.push(Arc::clone(wrapper));
        }
    }

    /// Forget wrappers that are stopped and hold no documents.
    ///
    /// Failed wrappers stay, so their crash count survives until a restart.
    fn prune(&self) {
        let mut wrappers = self.wrappers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = wrappers.len();
        wrappers.retain(|w| !w.is_idle());
        if wrappers.len() != before {
            debug!(pruned = before - wrappers.len(), "Dropped idle server wrappers");
        }
    }

    /// Pin a document to `definition` and reconnect it.
    pub async fn force_association(&self, document: OpenDocument, definition: ServerDefinition) {
        self.forced.lock().unwrap_or_else(PoisonError::into_inner).insert(
            document.uri.as_str().to_string(),
            ForcedAssociation {
                uri: document.uri.as_str().to_string(),
                root: document.root.clone(),
                definition: definition.to_array(),
            },
        );
        info!(uri = %document.uri.as_str(), server = %definition.id, "Forcing server association");
        self.document_opened(document).await;
    }

    /// Drop every forced association and disconnect its documents.
    pub async fn reset_associations(&self) {
        let uris: Vec<String> = self
            .forced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(uri, _)| uri)
            .collect();
        for uri in uris {
            if let Ok(uri) = uri.parse::<Uri>() {
                self.disconnect(&uri).await;
            }
        }
    }

    async fn disconnect(&self, uri: &Uri) {
        if let Some(wrapper) = self.wrapper_for(uri) {
            wrapper.disconnect(uri).await;
            self.prune();
        }
    }

    /// A document was closed in the editor.
    pub async fn document_closed(&self, uri: &Uri) {
        self.disconnect(uri).await;
    }

    /// Wrapper a document is connected to, or queued on while its server starts.
    pub fn wrapper_for(&self, uri: &Uri) -> Option<Arc<ServerWrapper>> {
        self.context
            .documents
            .wrapper(uri)
            .or_else(|| self.wrappers().into_iter().find(|w| w.is_pending(uri)))
    }

    pub fn session_for(&self, uri: &Uri) -> Option<Arc<DocumentSession>> {
        self.context.documents.session(uri)
    }

    fn started(&self) -> Vec<Arc<ServerWrapper>> {
        self.wrappers()
            .into_iter()
            .filter(|w| w.status() == ServerStatus::Started)
            .collect()
    }

    /// Search symbols on every started server of `root`.
    ///
    /// An empty `kinds` keeps every kind.
    pub async fn workspace_symbols(
        &self,
        root: &Path,
        query: &str,
        kinds: &[SymbolKind],
    ) -> Vec<SymbolMatch> {
        let searches = self
            .started()
            .into_iter()
            .filter(|w| w.root() == root)
            .filter_map(|wrapper| {
                let manager = wrapper.request_manager()?;
                let params = WorkspaceSymbolParams {
                    query: query.to_string(),
                    work_done_progress_params: WorkDoneProgressParams::default(),
                    partial_result_params: PartialResultParams::default(),
                };
                let server = wrapper.definition().id.clone();
                Some(async move {
                    let response = self
                        .context
                        .timeouts
                        .run(RequestKind::Symbols, manager.workspace_symbol(params))
                        .await;
                    symbol_matches(response, &server)
                })
            });

        join_all(searches)
            .await
            .into_iter()
            .flatten()
            .filter(|m| kinds.is_empty() || kinds.contains(&m.kind))
            .collect()
    }

    /// A file changed on disk.
    ///
    /// A change to an open document is reported as a save to its own server; every other
    /// started server gets a watched-file event, subject to its watchers.
    pub async fn file_changed(&self, uri: &Uri, change: FileChangeType) {
        let owner = self.context.documents.wrapper(uri);
        if change == FileChangeType::CHANGED {
            if let Some(session) = self.context.documents.session(uri) {
                session.document_saved().await;
            }
        }
        debug!(uri = %uri.as_str(), change = ?change, "File changed");

        for wrapper in self.started() {
            let is_owner = owner.as_ref().is_some_and(|o| Arc::ptr_eq(o, &wrapper));
            if change == FileChangeType::CHANGED && is_owner {
                continue;
            }
            wrapper.did_change_watched_files(uri, change).await;
        }
    }

    /// Path-based variant of [`file_changed`](Self::file_changed).
    pub async fn path_changed(&self, path: &Path, change: FileChangeType) {
        match crate::host::path_to_uri(path) {
            Ok(uri) => self.file_changed(&uri, change).await,
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring file change"),
        }
    }

    /// Root directories that currently have a wrapper.
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self
            .wrappers()
            .iter()
            .map(|w| w.root().to_path_buf())
            .collect();
        roots.sort();
        roots.dedup();
        roots
    }

    /// Stop every server.
    pub async fn shutdown(&self) {
        let wrappers = std::mem::take(&mut *self.wrappers.lock().unwrap_or_else(PoisonError::into_inner));
        for wrapper in wrappers {
            wrapper.stop().await;
        }
        info!("All language servers stopped");
    }
}

impl std::fmt::Debug for LspRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LspRegistry")
            .field("wrappers", &self.wrappers().len())
            .finish_non_exhaustive()
    }
}

/// Map every extension key of every definition; the first definition for a key wins.
fn flatten(definitions: Vec<ServerDefinition>) -> HashMap<String, ServerDefinition> {
    let mut map = HashMap::new();
    for definition in definitions {
        for ext in definition.extensions() {
            map.entry(ext).or_insert_with(|| definition.clone());
        }
    }
    map
}

fn symbol_matches(response: Option<WorkspaceSymbolResponse>, server: &str) -> Vec<SymbolMatch> {
    match response {
        None => Vec::new(),
        Some(WorkspaceSymbolResponse::Flat(symbols)) => symbols
            .into_iter()
            .map(|s| SymbolMatch {
                name: s.name,
                kind: s.kind,
                container_name: s.container_name,
                uri: s.location.uri,
                range: Some(s.location.range),
                server: server.to_string(),
            })
            .collect(),
        Some(WorkspaceSymbolResponse::Nested(symbols)) => symbols
            .into_iter()
            .map(|s| {
                let (uri, range) = match s.location {
                    OneOf::Left(Location { uri, range }) => (uri, Some(range)),
                    OneOf::Right(location) => (location.uri, None),
                };
                SymbolMatch {
                    name: s.name,
                    kind: s.kind,
                    container_name: s.container_name,
                    uri,
                    range,
                    server: server.to_string(),
                }
            })
            .collect(),
    }
}

/// Path of a symbol match, when it is a file.
pub fn symbol_path(symbol: &SymbolMatch) -> Option<PathBuf> {
    uri_to_path(&symbol.uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_first_definition_wins() {
        let ts = ServerDefinition::executable("ts;tsx", "tsls", vec!["--stdio"]);
        let other = ServerDefinition::executable("tsx", "other", Vec::<String>::new());
        let map = flatten(vec![ts.clone(), other]);
        assert_eq!(map.get("ts"), Some(&ts));
        assert_eq!(map.get("tsx"), Some(&ts));
        assert_eq!(map.get("ts;tsx"), Some(&ts));
    }

    #[test]
    fn test_symbol_matches_both_shapes() {
        let flat: WorkspaceSymbolResponse = serde_json::from_value(json!([{
            "name": "main",
            "kind": 12,
            "location": {
                "uri": "file:///p/main.rs",
                "range": {"start": {"line": 1, "character": 0}, "end": {"line": 1, "character": 4}}
            }
        }]))
        .unwrap();
        let matches = symbol_matches(Some(flat), "rust");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].kind, SymbolKind::FUNCTION);
        assert!(matches[0].range.is_some());

        let nested: WorkspaceSymbolResponse = serde_json::from_value(json!([{
            "name": "Thing",
            "kind": 5,
            "location": {"uri": "file:///p/thing.rs"}
        }]))
        .unwrap();
        let matches = symbol_matches(Some(nested), "rust");
        assert_eq!(matches[0].name, "Thing");
        assert!(matches[0].range.is_none());
        assert_eq!(symbol_path(&matches[0]), Some(PathBuf::from("/p/thing.rs")));
    }
}
