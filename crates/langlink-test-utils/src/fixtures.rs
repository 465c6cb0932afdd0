//! Test fixtures for creating reproducible client environments.
//!
//! Provides temporary project roots, open documents, and a [`Harness`] wiring a context
//! to recording collaborators and a fake server.

use crate::fake_server::{FakeConnections, FakeServer};
use crate::mocks::{MemoryConfigStore, MemoryDocument, RecordingSink, StaticHost};
use langlink_lsp::host::path_to_uri;
use langlink_lsp::{
    LspConfig, LspContext, LspRegistry, OpenDocument, RequestKind, ServerDefinition,
    ServerWrapper, DEFAULT_CRASH_THRESHOLD,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A temporary project root, removed when dropped.
///
/// # Example
///
/// ```rust
/// use langlink_test_utils::TestProject;
///
/// let project = TestProject::new();
/// let (document, _buffer) = project.document("src/a.foo", "hello");
///
/// assert!(project.path().join("src/a.foo").exists());
/// assert_eq!(document.root, project.path());
/// ```
pub struct TestProject {
    temp_dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a file relative to the root, creating parent directories.
    pub fn write(&self, relative: impl AsRef<Path>, contents: &str) -> PathBuf {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create directory");
        }
        fs::write(&path, contents).expect("Failed to write file");
        path
    }

    /// Write a file and open it as a document of this project.
    pub fn document(
        &self,
        relative: impl AsRef<Path>,
        text: &str,
    ) -> (OpenDocument, Arc<MemoryDocument>) {
        let path = self.write(relative, text);
        let buffer = MemoryDocument::new(text);
        let document = OpenDocument {
            uri: path_to_uri(&path).expect("Temp paths are absolute"),
            path,
            root: self.path().to_path_buf(),
            buffer: buffer.clone(),
        };
        (document, buffer)
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// A context wired to recording collaborators and fake servers.
pub struct Harness {
    pub project: TestProject,
    pub sink: Arc<RecordingSink>,
    pub host: Arc<StaticHost>,
    pub config: Arc<MemoryConfigStore>,
    pub connections: Arc<FakeConnections>,
    pub context: Arc<LspContext>,
}

impl Harness {
    /// Serve `server` for every definition, with the default crash threshold.
    pub fn new(server: FakeServer) -> Self {
        Self::with_connections(FakeConnections::new(server), DEFAULT_CRASH_THRESHOLD)
    }

    pub fn with_connections(connections: Arc<FakeConnections>, crash_threshold: u32) -> Self {
        Self::build(connections, crash_threshold, HashMap::new())
    }

    /// Like [`new`](Self::new) with timeout overrides in milliseconds.
    pub fn with_timeouts(server: FakeServer, timeouts: HashMap<RequestKind, u64>) -> Self {
        Self::build(
            FakeConnections::new(server),
            DEFAULT_CRASH_THRESHOLD,
            timeouts,
        )
    }

    fn build(
        connections: Arc<FakeConnections>,
        crash_threshold: u32,
        timeouts: HashMap<RequestKind, u64>,
    ) -> Self {
        let sink = RecordingSink::new();
        let host = StaticHost::new();
        let config = MemoryConfigStore::new();
        let context = LspContext::builder(sink.clone(), host.clone())
            .connections(connections.clone())
            .config(config.clone())
            .crash_threshold(crash_threshold)
            .timeouts(timeouts)
            .build();
        Self {
            project: TestProject::new(),
            sink,
            host,
            config,
            connections,
            context,
        }
    }

    /// Executable definition for `extension` that never touches the file system.
    pub fn definition(extension: &str) -> ServerDefinition {
        ServerDefinition::executable(extension, "fake-language-server", Vec::<String>::new())
    }

    /// A wrapper rooted at the project.
    pub fn wrapper(&self, definition: ServerDefinition) -> Arc<ServerWrapper> {
        ServerWrapper::new(
            definition,
            self.project.path().to_path_buf(),
            Arc::clone(&self.context),
        )
    }

    /// A registry knowing `definitions`.
    pub fn registry(&self, definitions: &[ServerDefinition]) -> LspRegistry {
        let mut config = LspConfig::default();
        for definition in definitions {
            config.add_definition(definition);
        }
        LspRegistry::from_config(Arc::clone(&self.context), &config)
    }

    /// Open a document in the project and in the editor host.
    pub fn document(&self, relative: &str, text: &str) -> (OpenDocument, Arc<MemoryDocument>) {
        let (document, buffer) = self.project.document(relative, text);
        self.host.open(document.clone());
        (document, buffer)
    }
}
