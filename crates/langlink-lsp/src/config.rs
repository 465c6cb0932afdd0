//! Client configuration and per-server workspace settings.

use crate::definition::ServerDefinition;
use crate::error::{LspError, LspResult};
use crate::timeout::RequestKind;
use langlink_util::LogLevel;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Scope every setting lands in unless the file names another one.
pub const GLOBAL_SCOPE: &str = "global";

fn default_crash_threshold() -> u32 {
    4
}

/// A document pinned to a definition, regardless of its extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForcedAssociation {
    /// Document uri.
    pub uri: String,
    /// Project root the document belongs to.
    pub root: PathBuf,
    /// Flat definition encoding.
    pub definition: Vec<String>,
}

/// Persisted client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LspConfig {
    /// Extension key to flat definition encoding.
    #[serde(default)]
    pub servers: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub forced_associations: Vec<ForcedAssociation>,

    /// Timeout overrides in milliseconds.
    #[serde(default)]
    pub timeouts: HashMap<RequestKind, u64>,

    /// Consecutive crashes after which a server is left failed.
    #[serde(default = "default_crash_threshold")]
    pub crash_threshold: u32,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for LspConfig {
    fn default() -> Self {
        Self {
            servers: BTreeMap::new(),
            forced_associations: Vec::new(),
            timeouts: HashMap::new(),
            crash_threshold: default_crash_threshold(),
            log_level: None,
        }
    }
}

impl LspConfig {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> LspResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        debug!(path = %path.display(), servers = config.servers.len(), "Loaded LSP config");
        Ok(config)
    }

    /// Load from the default location, or fall back to defaults.
    pub fn load_default() -> Self {
        let Some(path) = langlink_util::path::default_config_file() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid LSP config, using defaults");
                Self::default()
            }
        }
    }

    /// Save as pretty JSON.
    pub fn save(&self, path: &Path) -> LspResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Configuration holding the built-in presets.
    pub fn with_presets() -> Self {
        let mut config = Self::default();
        for def in presets::all() {
            config.add_definition(&def);
        }
        config
    }

    pub fn add_definition(&mut self, definition: &ServerDefinition) {
        self.servers
            .insert(definition.extension.clone(), definition.to_array());
    }

    /// Parsed definitions; unparseable entries are logged and skipped.
    pub fn definitions(&self) -> Vec<ServerDefinition> {
        self.servers
            .iter()
            .filter_map(|(ext, arr)| match ServerDefinition::from_array(arr) {
                Ok(def) => Some(def),
                Err(e) => {
                    warn!(extension = %ext, error = %e, "Skipping server definition");
                    None
                }
            })
            .collect()
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level.as_deref().and_then(LogLevel::parse)
    }
}

/// Built-in executable definitions.
pub mod presets {
    use crate::definition::ServerDefinition;

    pub fn rust_analyzer() -> ServerDefinition {
        ServerDefinition::executable("rs", "rust-analyzer", Vec::<String>::new())
    }

    pub fn typescript() -> ServerDefinition {
        ServerDefinition::executable("ts;tsx;js;jsx", "typescript-language-server", vec!["--stdio"])
            .with_id("typescript")
    }

    pub fn pyright() -> ServerDefinition {
        ServerDefinition::executable("py", "pyright-langserver", vec!["--stdio"])
    }

    pub fn gopls() -> ServerDefinition {
        ServerDefinition::executable("go", "gopls", Vec::<String>::new())
    }

    pub fn clangd() -> ServerDefinition {
        ServerDefinition::executable("c;cpp;cc;cxx;h;hpp", "clangd", Vec::<String>::new())
    }

    pub fn all() -> Vec<ServerDefinition> {
        vec![rust_analyzer(), typescript(), pyright(), gopls(), clangd()]
    }
}

/// Workspace settings of one server, per scope, with flattened dotted keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerSettings {
    scopes: HashMap<String, Map<String, Value>>,
}

impl ServerSettings {
    /// Parse a settings document. Keys written `<scope>` hold scoped objects.
    pub fn parse(json: &Value) -> LspResult<Self> {
        let Value::Object(root) = json else {
            return Err(LspError::protocol("Settings must be a JSON object"));
        };

        let mut scopes: HashMap<String, Map<String, Value>> = HashMap::new();
        scopes.insert(GLOBAL_SCOPE.to_string(), Map::new());
        for (key, value) in root {
            if key.starts_with('<') && key.ends_with('>') {
                let Value::Object(_) = value else {
                    return Err(LspError::protocol(format!(
                        "Scope {key} must hold an object"
                    )));
                };
                let scope = scopes.entry(key.clone()).or_default();
                flatten("", value, scope);
            } else {
                let global = scopes.entry(GLOBAL_SCOPE.to_string()).or_default();
                flatten(key, value, global);
            }
        }
        Ok(Self { scopes })
    }

    /// Load from a settings file. A missing or empty file gives empty settings.
    pub fn load(path: &Path) -> LspResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Self::parse(&serde_json::from_str(&content)?)
    }

    /// Scope a document uri belongs to: the longest `<prefix>` scope the uri starts with,
    /// else the global one.
    pub fn scope_for_uri(&self, uri: &str) -> &str {
        if uri.is_empty() {
            return GLOBAL_SCOPE;
        }
        self.scopes
            .keys()
            .filter(|key| {
                key.strip_prefix('<')
                    .and_then(|k| k.strip_suffix('>'))
                    .is_some_and(|prefix| uri.starts_with(prefix))
            })
            .max_by_key(|key| key.len())
            .map_or(GLOBAL_SCOPE, String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.values().all(Map::is_empty)
    }

    /// Flat attributes under `section`, with the section prefix stripped.
    ///
    /// A scoped lookup starts from the global attributes and overrides them.
    pub fn attributes(&self, section: &str, scope: &str) -> Option<Map<String, Value>> {
        let scoped = self.scopes.get(scope)?;
        let global = self.scopes.get(GLOBAL_SCOPE).filter(|_| scope != GLOBAL_SCOPE);
        let mut attributes = Map::new();
        for layer in global.into_iter().chain(Some(scoped)) {
            attributes.extend(layer.iter().filter_map(|(key, value)| {
                if section.is_empty() {
                    return Some((key.clone(), value.clone()));
                }
                let rest = key.strip_prefix(section)?;
                if rest.is_empty() || rest.starts_with('.') {
                    Some((rest.trim_start_matches('.').to_string(), value.clone()))
                } else {
                    None
                }
            }));
        }
        Some(attributes)
    }

    /// Attributes under `section` re-nested into a JSON value.
    ///
    /// A key equal to the section itself yields its value directly.
    pub fn section(&self, section: &str, scope: &str) -> Value {
        let Some(attributes) = self.attributes(section, scope) else {
            return Value::Null;
        };
        if attributes.is_empty() {
            return Value::Null;
        }
        if let Some(value) = attributes.get("") {
            return value.clone();
        }
        let mut nested = Map::new();
        for (key, value) in attributes {
            insert_nested(&mut nested, &key, value);
        }
        Value::Object(nested)
    }

    /// The whole global scope, re-nested.
    pub fn to_value(&self) -> Value {
        self.section("", GLOBAL_SCOPE)
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&key, inner, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

fn insert_nested(target: &mut Map<String, Value>, dotted: &str, value: Value) {
    match dotted.split_once('.') {
        None => {
            target.insert(dotted.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                insert_nested(inner, rest, value);
            }
        }
    }
}

/// Source of workspace settings and timeout overrides.
pub trait ConfigStore: Send + Sync {
    /// Settings of `server_id` for the project at `root`.
    fn server_settings(&self, root: &Path, server_id: &str) -> Option<ServerSettings>;

    /// File the settings are read from, used to detect changes.
    fn settings_path(&self, root: &Path, server_id: &str) -> Option<PathBuf>;

    /// Timeout overrides in milliseconds.
    fn timeout_overrides(&self) -> HashMap<RequestKind, u64> {
        HashMap::new()
    }
}

/// Reads `<root>/.lsp/<server-id>.json`.
#[derive(Debug, Clone, Default)]
pub struct FileConfigStore {
    timeouts: HashMap<RequestKind, u64>,
}

impl FileConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &LspConfig) -> Self {
        Self {
            timeouts: config.timeouts.clone(),
        }
    }
}

impl ConfigStore for FileConfigStore {
    fn server_settings(&self, root: &Path, server_id: &str) -> Option<ServerSettings> {
        let path = langlink_util::path::server_settings_file(root, server_id);
        if !path.exists() {
            return None;
        }
        match ServerSettings::load(&path) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid server settings");
                None
            }
        }
    }

    fn settings_path(&self, root: &Path, server_id: &str) -> Option<PathBuf> {
        Some(langlink_util::path::server_settings_file(root, server_id))
    }

    fn timeout_overrides(&self) -> HashMap<RequestKind, u64> {
        self.timeouts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_defaults() {
        let config: LspConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.crash_threshold, 4);
        assert!(config.servers.is_empty());
        assert!(config.log_level().is_none());
    }

    #[test]
    fn test_config_parse() {
        let config: LspConfig = serde_json::from_value(json!({
            "servers": {
                "rs": ["exe", "rs", "rust-analyzer"],
                "bad": ["exe"]
            },
            "forcedAssociations": [
                {"uri": "file:///p/x.txt", "root": "/p", "definition": ["exe", "txt", "ls"]}
            ],
            "timeouts": {"hover": 500},
            "crashThreshold": 2,
            "logLevel": "warning"
        }))
        .unwrap();

        assert_eq!(config.crash_threshold, 2);
        assert_eq!(config.timeouts[&RequestKind::Hover], 500);
        assert_eq!(config.log_level(), Some(LogLevel::Warn));
        assert_eq!(config.forced_associations[0].root, PathBuf::from("/p"));
        let defs = config.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].id, "rust");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("langlink.json");
        let config = LspConfig::with_presets();
        config.save(&path).unwrap();
        let loaded = LspConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.definitions().len(), presets::all().len());
    }

    #[test]
    fn test_settings_flatten_and_scopes() {
        let settings = ServerSettings::parse(&json!({
            "rust": {"check": {"command": "clippy"}, "features": ["a", "b"]},
            "<file:///p>": {"rust": {"check": {"command": "check"}}},
            "top": 1
        }))
        .unwrap();

        let attrs = settings.attributes("rust", GLOBAL_SCOPE).unwrap();
        assert_eq!(attrs["check.command"], "clippy");
        assert_eq!(attrs["features"], json!(["a", "b"]));

        let scoped = settings.attributes("rust", "<file:///p>").unwrap();
        assert_eq!(scoped["check.command"], "check");

        assert_eq!(
            settings.section("rust", GLOBAL_SCOPE),
            json!({"check": {"command": "clippy"}, "features": ["a", "b"]})
        );
        assert_eq!(settings.section("rust.check.command", GLOBAL_SCOPE), json!("clippy"));
        assert_eq!(settings.section("top", GLOBAL_SCOPE), json!(1));
        assert_eq!(settings.section("missing", GLOBAL_SCOPE), Value::Null);
        assert!(settings.attributes("rust", "<nope>").is_none());
    }

    #[test]
    fn test_scope_for_uri_picks_longest_prefix() {
        let settings = ServerSettings::parse(&json!({
            "rust": {"check": {"command": "clippy"}, "features": ["a"]},
            "<file:///work>": {"rust": {"check": {"command": "check"}}},
            "<file:///work/legacy>": {"rust": {"features": []}}
        }))
        .unwrap();

        assert_eq!(settings.scope_for_uri(""), GLOBAL_SCOPE);
        assert_eq!(settings.scope_for_uri("file:///other/a.rs"), GLOBAL_SCOPE);
        assert_eq!(settings.scope_for_uri("file:///work/a.rs"), "<file:///work>");
        assert_eq!(
            settings.scope_for_uri("file:///work/legacy/a.rs"),
            "<file:///work/legacy>"
        );

        let scope = settings.scope_for_uri("file:///work/a.rs");
        assert_eq!(
            settings.section("rust", scope),
            json!({"check": {"command": "check"}, "features": ["a"]})
        );
        let scope = settings.scope_for_uri("file:///work/legacy/a.rs");
        assert_eq!(
            settings.section("rust", scope),
            json!({"check": {"command": "clippy"}, "features": []})
        );
    }

    #[test]
    fn test_section_prefix_needs_dot_boundary() {
        let settings = ServerSettings::parse(&json!({"rust": {"a": 1}, "rustfmt": {"b": 2}})).unwrap();
        assert_eq!(settings.section("rust", GLOBAL_SCOPE), json!({"a": 1}));
    }

    #[test]
    fn test_scope_must_be_object() {
        assert!(ServerSettings::parse(&json!({"<x>": 3})).is_err());
        assert!(ServerSettings::parse(&json!([1])).is_err());
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new();
        assert!(store.server_settings(dir.path(), "rust").is_none());

        let path = store.settings_path(dir.path(), "rust").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"rust": {"x": true}}"#).unwrap();
        let settings = store.server_settings(dir.path(), "rust").unwrap();
        assert_eq!(settings.to_value(), json!({"rust": {"x": true}}));

        std::fs::write(&path, "").unwrap();
        assert!(store.server_settings(dir.path(), "rust").unwrap().is_empty());
    }
}
