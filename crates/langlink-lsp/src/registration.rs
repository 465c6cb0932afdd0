//! Dynamic capability registration and watched-file filtering.

use lsp_types::{FileChangeType, Registration, Unregistration};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Event-kind bits of a file system watcher.
pub const WATCH_CREATE: u8 = 1;
pub const WATCH_CHANGE: u8 = 2;
pub const WATCH_DELETE: u8 = 4;
const WATCH_ALL: u8 = WATCH_CREATE | WATCH_CHANGE | WATCH_DELETE;

/// Methods a server may register dynamically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DynamicMethod {
    DidChangeConfiguration,
    DidChangeWatchedFiles,
    WorkspaceSymbol,
    ExecuteCommand,
    Synchronization,
    Completion,
    Hover,
    SignatureHelp,
    References,
    DocumentHighlight,
    DocumentSymbol,
    Formatting,
    RangeFormatting,
    OnTypeFormatting,
    Definition,
    CodeAction,
    CodeLens,
    DocumentLink,
    Rename,
    Unknown(String),
}

impl DynamicMethod {
    pub fn from_method(method: &str) -> Self {
        match method {
            "workspace/didChangeConfiguration" => Self::DidChangeConfiguration,
            "workspace/didChangeWatchedFiles" => Self::DidChangeWatchedFiles,
            "workspace/symbol" => Self::WorkspaceSymbol,
            "workspace/executeCommand" => Self::ExecuteCommand,
            "textDocument/synchronization" => Self::Synchronization,
            "textDocument/completion" => Self::Completion,
            "textDocument/hover" => Self::Hover,
            "textDocument/signatureHelp" => Self::SignatureHelp,
            "textDocument/references" => Self::References,
            "textDocument/documentHighlight" => Self::DocumentHighlight,
            "textDocument/documentSymbol" => Self::DocumentSymbol,
            "textDocument/formatting" => Self::Formatting,
            "textDocument/rangeFormatting" => Self::RangeFormatting,
            "textDocument/onTypeFormatting" => Self::OnTypeFormatting,
            "textDocument/definition" => Self::Definition,
            "textDocument/codeAction" => Self::CodeAction,
            "textDocument/codeLens" => Self::CodeLens,
            "textDocument/documentLink" => Self::DocumentLink,
            "textDocument/rename" => Self::Rename,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::DidChangeConfiguration => "workspace/didChangeConfiguration",
            Self::DidChangeWatchedFiles => "workspace/didChangeWatchedFiles",
            Self::WorkspaceSymbol => "workspace/symbol",
            Self::ExecuteCommand => "workspace/executeCommand",
            Self::Synchronization => "textDocument/synchronization",
            Self::Completion => "textDocument/completion",
            Self::Hover => "textDocument/hover",
            Self::SignatureHelp => "textDocument/signatureHelp",
            Self::References => "textDocument/references",
            Self::DocumentHighlight => "textDocument/documentHighlight",
            Self::DocumentSymbol => "textDocument/documentSymbol",
            Self::Formatting => "textDocument/formatting",
            Self::RangeFormatting => "textDocument/rangeFormatting",
            Self::OnTypeFormatting => "textDocument/onTypeFormatting",
            Self::Definition => "textDocument/definition",
            Self::CodeAction => "textDocument/codeAction",
            Self::CodeLens => "textDocument/codeLens",
            Self::DocumentLink => "textDocument/documentLink",
            Self::Rename => "textDocument/rename",
            Self::Unknown(method) => method,
        }
    }
}

/// Mask bit of a file change type.
pub fn change_bit(change: FileChangeType) -> u8 {
    if change == FileChangeType::CREATED {
        WATCH_CREATE
    } else if change == FileChangeType::CHANGED {
        WATCH_CHANGE
    } else if change == FileChangeType::DELETED {
        WATCH_DELETE
    } else {
        0
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawGlob {
    Plain(String),
    Relative {
        #[serde(rename = "baseUri")]
        base_uri: Value,
        pattern: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWatcher {
    glob_pattern: RawGlob,
    kind: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct RawWatchOptions {
    #[serde(default)]
    watchers: Vec<RawWatcher>,
}

/// One registered file system watcher.
#[derive(Debug, Clone)]
pub struct FileWatcher {
    patterns: Vec<glob::Pattern>,
    kind: u8,
}

impl FileWatcher {
    /// Create a watcher; brace alternatives (`*.{ts,js}`) expand into several patterns.
    pub fn new(pattern: &str, kind: u8) -> Option<Self> {
        let patterns: Vec<glob::Pattern> = expand_braces(pattern)
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Ignoring invalid watcher pattern");
                    None
                }
            })
            .collect();
        if patterns.is_empty() {
            return None;
        }
        Some(Self { patterns, kind })
    }

    pub fn kind(&self) -> u8 {
        self.kind
    }

    /// Whether the path matches, tried against the full path and the file name.
    pub fn matches_path(&self, path: &Path) -> bool {
        let full = path.to_string_lossy();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        self.patterns
            .iter()
            .any(|p| p.matches(&full) || (!name.is_empty() && p.matches(&name)))
    }

    pub fn accepts(&self, path: &Path, change: FileChangeType) -> bool {
        self.kind & change_bit(change) != 0 && self.matches_path(path)
    }
}

/// Registrations issued by one server instance.
#[derive(Debug, Default)]
pub struct RegistrationTable {
    registrations: HashMap<String, DynamicMethod>,
    watchers: HashMap<String, Vec<FileWatcher>>,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: &Registration) {
        let method = DynamicMethod::from_method(&registration.method);
        if let DynamicMethod::Unknown(name) = &method {
            debug!(method = %name, "Registration for unknown method");
        }
        if method == DynamicMethod::DidChangeWatchedFiles {
            let watchers = registration
                .register_options
                .clone()
                .map(parse_watchers)
                .unwrap_or_default();
            self.watchers.insert(registration.id.clone(), watchers);
        }
        self.registrations.insert(registration.id.clone(), method);
    }

    /// Remove by id, or by method when the id is unknown.
    pub fn unregister(&mut self, unregistration: &Unregistration) {
        if self.registrations.remove(&unregistration.id).is_some() {
            self.watchers.remove(&unregistration.id);
            return;
        }
        let method = DynamicMethod::from_method(&unregistration.method);
        let ids: Vec<String> = self
            .registrations
            .iter()
            .filter(|(_, m)| **m == method)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.registrations.remove(&id);
            self.watchers.remove(&id);
        }
    }

    pub fn is_registered(&self, method: &DynamicMethod) -> bool {
        self.registrations.values().any(|m| m == method)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn clear(&mut self) {
        self.registrations.clear();
        self.watchers.clear();
    }

    /// Whether a file event should reach the server.
    ///
    /// Without a watched-files registration every event is forwarded.
    pub fn should_forward(&self, path: &Path, change: FileChangeType) -> bool {
        if self.watchers.is_empty() {
            return true;
        }
        self.watchers
            .values()
            .flatten()
            .any(|w| w.accepts(path, change))
    }
}

fn parse_watchers(options: Value) -> Vec<FileWatcher> {
    let options: RawWatchOptions = match serde_json::from_value(options) {
        Ok(options) => options,
        Err(e) => {
            warn!(error = %e, "Invalid didChangeWatchedFiles options");
            return Vec::new();
        }
    };
    options
        .watchers
        .into_iter()
        .filter_map(|w| {
            let pattern = match w.glob_pattern {
                RawGlob::Plain(p) => p,
                RawGlob::Relative { base_uri, pattern } => {
                    match relative_base(&base_uri) {
                        Some(base) => format!("{}/{}", base.trim_end_matches('/'), pattern),
                        None => pattern,
                    }
                }
            };
            FileWatcher::new(&pattern, w.kind.unwrap_or(WATCH_ALL))
        })
        .collect()
}

/// Filesystem path of a relative pattern's base (a uri or a workspace folder).
fn relative_base(base: &Value) -> Option<String> {
    let uri = match base {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("uri")?.as_str()?,
        _ => return None,
    };
    url::Url::parse(uri)
        .ok()?
        .to_file_path()
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

/// Expand `{a,b}` alternatives, which `glob` does not support.
fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };
    let Some(close) = pattern[open..].find('}').map(|i| open + i) else {
        return vec![pattern.to_string()];
    };
    let (prefix, rest) = (&pattern[..open], &pattern[close + 1..]);
    pattern[open + 1..close]
        .split(',')
        .flat_map(|alt| expand_braces(&format!("{prefix}{alt}{rest}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registration(id: &str, method: &str, options: Option<Value>) -> Registration {
        Registration {
            id: id.to_string(),
            method: method.to_string(),
            register_options: options,
        }
    }

    #[test]
    fn test_method_table() {
        assert_eq!(
            DynamicMethod::from_method("textDocument/rename"),
            DynamicMethod::Rename
        );
        assert_eq!(DynamicMethod::Rename.as_str(), "textDocument/rename");
        let unknown = DynamicMethod::from_method("x/y");
        assert_eq!(unknown, DynamicMethod::Unknown("x/y".to_string()));
        assert_eq!(unknown.as_str(), "x/y");
    }

    #[test]
    fn test_forward_everything_without_registration() {
        let table = RegistrationTable::new();
        assert!(table.should_forward(Path::new("/p/a.rs"), FileChangeType::CREATED));
    }

    #[test]
    fn test_watcher_mask_filtering() {
        let mut table = RegistrationTable::new();
        table.register(&registration(
            "w1",
            "workspace/didChangeWatchedFiles",
            Some(json!({"watchers": [{"globPattern": "*.conf", "kind": 6}]})),
        ));

        let path = Path::new("/proj/app.conf");
        assert!(!table.should_forward(path, FileChangeType::CREATED));
        assert!(table.should_forward(path, FileChangeType::CHANGED));
        assert!(table.should_forward(path, FileChangeType::DELETED));
        assert!(!table.should_forward(Path::new("/proj/app.toml"), FileChangeType::CHANGED));
    }

    #[test]
    fn test_default_kind_and_braces() {
        let mut table = RegistrationTable::new();
        table.register(&registration(
            "w",
            "workspace/didChangeWatchedFiles",
            Some(json!({"watchers": [{"globPattern": "**/*.{ts,js}"}]})),
        ));
        assert!(table.should_forward(Path::new("/p/src/a.ts"), FileChangeType::CREATED));
        assert!(table.should_forward(Path::new("/p/src/a.js"), FileChangeType::DELETED));
        assert!(!table.should_forward(Path::new("/p/src/a.rs"), FileChangeType::CHANGED));
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_pattern() {
        let mut table = RegistrationTable::new();
        table.register(&registration(
            "w",
            "workspace/didChangeWatchedFiles",
            Some(json!({"watchers": [{
                "globPattern": {"baseUri": "file:///proj", "pattern": "cfg/*.json"},
                "kind": 2
            }]})),
        ));
        assert!(table.should_forward(Path::new("/proj/cfg/a.json"), FileChangeType::CHANGED));
        assert!(!table.should_forward(Path::new("/other/cfg/a.json"), FileChangeType::CHANGED));
    }

    #[test]
    fn test_unregister_by_id_and_method() {
        let mut table = RegistrationTable::new();
        table.register(&registration(
            "w",
            "workspace/didChangeWatchedFiles",
            Some(json!({"watchers": [{"globPattern": "*.conf", "kind": 2}]})),
        ));
        table.register(&registration("h", "textDocument/hover", None));
        assert_eq!(table.len(), 2);
        assert!(!table.should_forward(Path::new("/a.rs"), FileChangeType::CHANGED));

        table.unregister(&Unregistration {
            id: "w".to_string(),
            method: "workspace/didChangeWatchedFiles".to_string(),
        });
        assert!(table.should_forward(Path::new("/a.rs"), FileChangeType::CHANGED));

        table.unregister(&Unregistration {
            id: "other-id".to_string(),
            method: "textDocument/hover".to_string(),
        });
        assert!(table.is_empty());
        assert!(!table.is_registered(&DynamicMethod::Hover));
    }

    #[test]
    fn test_expand_braces() {
        assert_eq!(expand_braces("*.{a,b}"), vec!["*.a", "*.b"]);
        assert_eq!(expand_braces("{x,y}/*.{a,b}").len(), 4);
        assert_eq!(expand_braces("*.{a"), vec!["*.{a"]);
    }
}
