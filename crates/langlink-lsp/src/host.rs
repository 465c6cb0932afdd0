//! Interfaces the runtime needs from the embedding editor.

use crate::error::{LspError, LspResult};
use crate::session::snippet::Snippet;
use crate::session::CompletionEntry;
use lsp_types::{DiagnosticSeverity, MessageType, Uri};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Text of one open document.
///
/// Offsets are byte offsets into the current text.
pub trait DocumentBuffer: Send + Sync {
    fn text(&self) -> String;

    /// Replace `start..end` with `text`.
    fn replace(&self, start: usize, end: usize, text: &str);

    /// Persist the document.
    fn save(&self) {}
}

/// A diagnostic ready to draw, in buffer offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMarker {
    pub start: usize,
    pub end: usize,
    pub severity: Option<DiagnosticSeverity>,
    pub message: String,
    pub source: Option<String>,
    pub code: Option<String>,
}

/// Rendered hover documentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoverText {
    /// Offset the hover was requested at.
    pub offset: usize,
    pub text: String,
    /// Whether `text` is markdown (otherwise wrapped plain text).
    pub markdown: bool,
}

/// Receives everything the runtime wants displayed.
pub trait NotificationSink: Send + Sync {
    /// Replace every diagnostic marker of a document.
    fn diagnostics(&self, uri: &Uri, markers: &[DiagnosticMarker]);

    fn hover(&self, uri: &Uri, hover: &HoverText);

    /// Replace the highlighted ranges of a document.
    fn highlights(&self, _uri: &Uri, _ranges: &[(usize, usize)]) {}

    fn signature(&self, _uri: &Uri, _label: &str) {}

    /// Offer completion entries at the caret.
    fn completions(&self, _uri: &Uri, _entries: &[CompletionEntry]) {}

    /// Expand a snippet template at `offset`.
    fn snippet(&self, _uri: &Uri, _offset: usize, _snippet: &Snippet) {}

    fn message(&self, _kind: MessageType, _message: &str) {}

    /// A one-shot error dialog.
    fn error(&self, title: &str, message: &str);
}

/// A document currently open in the editor.
#[derive(Clone)]
pub struct OpenDocument {
    pub uri: Uri,
    pub path: PathBuf,
    /// Project root the document belongs to.
    pub root: PathBuf,
    pub buffer: Arc<dyn DocumentBuffer>,
}

impl OpenDocument {
    /// Build from a file path; the root is the nearest project marker directory.
    pub fn from_path(path: &Path, buffer: Arc<dyn DocumentBuffer>) -> LspResult<Self> {
        let path = langlink_util::path::normalize(path);
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let root = langlink_util::path::find_project_root(&parent).unwrap_or(parent);
        Ok(Self {
            uri: path_to_uri(&path)?,
            path,
            root,
            buffer,
        })
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// File extension, empty when there is none.
    pub fn extension(&self) -> String {
        extension_of(&self.path)
    }
}

impl std::fmt::Debug for OpenDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenDocument")
            .field("uri", &self.uri.as_str())
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Lists the documents open in the editor.
pub trait EditorHost: Send + Sync {
    fn open_documents(&self) -> Vec<OpenDocument>;
}

/// File extension of a path.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Convert a file path to a URI.
pub fn path_to_uri(path: &Path) -> LspResult<Uri> {
    let abs_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| LspError::InvalidUri(e.to_string()))?
            .join(path)
    };

    let url = url::Url::from_file_path(&abs_path)
        .map_err(|_| LspError::InvalidUri(abs_path.display().to_string()))?;
    url.as_str()
        .parse()
        .map_err(|e| LspError::InvalidUri(format!("{}: {:?}", abs_path.display(), e)))
}

/// Convert a `file:` URI to a path.
pub fn uri_to_path(uri: &Uri) -> Option<PathBuf> {
    url::Url::parse(uri.as_str()).ok()?.to_file_path().ok()
}
