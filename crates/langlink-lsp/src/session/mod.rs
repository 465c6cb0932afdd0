//! Per-document sessions.
//!
//! A [`DocumentSession`] binds one open document to its [`ServerWrapper`]. It owns the
//! protocol version counter, turns editor changes into `didChange` notifications for the
//! negotiated sync kind, and exposes every language feature at document granularity.
//! Capability checks live in the [`RequestManager`]; the session only converts offsets,
//! bounds calls by their timeout and applies the results.

pub mod completion;
pub mod render;
pub mod snippet;

pub use completion::{CompletionEntry, CompletionShape};

use crate::context::LspContext;
use crate::host::{DiagnosticMarker, DocumentBuffer, HoverText, OpenDocument};
use crate::request_manager::RequestManager;
use crate::text::{self, TextChange};
use crate::timeout::RequestKind;
use crate::workspace_edit;
use crate::wrapper::ServerWrapper;
use lsp_types::{
    CodeAction, CodeActionContext, CodeActionOrCommand, CodeActionParams, CodeLens, CodeLensParams,
    Command, CompletionParams, Diagnostic, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, DidSaveTextDocumentParams, DocumentFormattingParams,
    DocumentHighlightParams, DocumentLink, DocumentLinkParams, DocumentOnTypeFormattingParams,
    DocumentRangeFormattingParams, DocumentSymbolParams, DocumentSymbolResponse,
    ExecuteCommandParams, FormattingOptions, GotoDefinitionParams, HoverParams, Location,
    NumberOrString, PartialResultParams, Position, Range, ReferenceContext, ReferenceParams,
    RenameParams, SignatureHelpParams, TextDocumentContentChangeEvent, TextDocumentIdentifier,
    TextDocumentItem, TextDocumentPositionParams, TextDocumentSaveReason, TextDocumentSyncKind,
    TextEdit, Uri, VersionedTextDocumentIdentifier, WillSaveTextDocumentParams, WorkDoneProgressParams,
    WorkspaceEdit,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Changes waiting for the next `didChange`, shaped by the sync kind.
#[derive(Debug, Default)]
enum PendingChanges {
    #[default]
    Empty,
    /// The whole current text goes out, whatever the edits were.
    Full,
    Incremental(Vec<TextDocumentContentChangeEvent>),
}

impl PendingChanges {
    /// Buffer one change, given the document text right after it.
    fn record(&mut self, kind: TextDocumentSyncKind, change: &TextChange, text_after: &str) {
        match kind {
            TextDocumentSyncKind::FULL => *self = PendingChanges::Full,
            TextDocumentSyncKind::INCREMENTAL => {
                let event = change.to_incremental_event(text_after);
                match self {
                    PendingChanges::Incremental(events) => events.push(event),
                    _ => *self = PendingChanges::Incremental(vec![event]),
                }
            }
            _ => {}
        }
    }

    fn take(&mut self, text: impl FnOnce() -> String) -> Vec<TextDocumentContentChangeEvent> {
        match std::mem::take(self) {
            PendingChanges::Empty => Vec::new(),
            #[allow(deprecated)]
            PendingChanges::Full => vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: text(),
            }],
            PendingChanges::Incremental(events) => events,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    version: i32,
    opened: bool,
    closed: bool,
    pending: PendingChanges,
}

/// One document connected to one server.
pub struct DocumentSession {
    uri: Uri,
    path: PathBuf,
    language_id: String,
    buffer: Arc<dyn DocumentBuffer>,
    wrapper: Weak<ServerWrapper>,
    context: Arc<LspContext>,
    /// Serializes version bumps with the notifications they stamp.
    state: Mutex<SessionState>,
    need_save: AtomicBool,
    diagnostics: StdMutex<Vec<Diagnostic>>,
}

impl DocumentSession {
    pub fn new(
        document: &OpenDocument,
        language_id: impl Into<String>,
        wrapper: Weak<ServerWrapper>,
        context: Arc<LspContext>,
    ) -> Arc<Self> {
        Arc::new(Self {
            uri: document.uri.clone(),
            path: document.path.clone(),
            language_id: language_id.into(),
            buffer: Arc::clone(&document.buffer),
            wrapper,
            context,
            state: Mutex::new(SessionState::default()),
            need_save: AtomicBool::new(false),
            diagnostics: StdMutex::new(Vec::new()),
        })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffer(&self) -> &Arc<dyn DocumentBuffer> {
        &self.buffer
    }

    pub fn wrapper(&self) -> Option<Arc<ServerWrapper>> {
        self.wrapper.upgrade()
    }

    /// Current protocol version.
    pub async fn version(&self) -> i32 {
        self.state.lock().await.version
    }

    pub async fn is_open(&self) -> bool {
        let state = self.state.lock().await;
        state.opened && !state.closed
    }

    pub fn need_save(&self) -> bool {
        self.need_save.load(Ordering::SeqCst)
    }

    fn manager(&self) -> Option<Arc<RequestManager>> {
        self.wrapper.upgrade()?.request_manager()
    }

    fn identifier(&self) -> TextDocumentIdentifier {
        TextDocumentIdentifier {
            uri: self.uri.clone(),
        }
    }

    fn position_params(&self, offset: usize) -> TextDocumentPositionParams {
        TextDocumentPositionParams {
            text_document: self.identifier(),
            position: text::offset_to_position(&self.buffer.text(), offset),
        }
    }

    // Synchronization

    /// Send `didOpen` once.
    pub async fn document_opened(&self) {
        let mut state = self.state.lock().await;
        if state.opened || state.closed {
            return;
        }
        state.opened = true;
        if let Some(manager) = self.manager() {
            manager
                .did_open(DidOpenTextDocumentParams {
                    text_document: TextDocumentItem {
                        uri: self.uri.clone(),
                        language_id: self.language_id.clone(),
                        version: state.version,
                        text: self.buffer.text(),
                    },
                })
                .await;
        }
    }

    /// Send `didClose` once; the session is unusable afterwards.
    pub async fn document_closed(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        if !state.opened {
            return;
        }
        if let Some(manager) = self.manager() {
            manager
                .did_close(DidCloseTextDocumentParams {
                    text_document: self.identifier(),
                })
                .await;
        }
    }

    /// Report one editor change, already applied to the buffer.
    pub async fn document_changed(&self, change: TextChange) {
        let mut state = self.state.lock().await;
        let Some(manager) = self.sync_manager(&state) else {
            return;
        };
        state
            .pending
            .record(manager.sync_kind(), &change, &self.buffer.text());
        self.flush(&mut state, &manager).await;
    }

    /// Manager to report changes to, while the document is open on the server.
    fn sync_manager(&self, state: &SessionState) -> Option<Arc<RequestManager>> {
        if !state.opened || state.closed {
            return None;
        }
        self.manager()
    }

    /// Send the buffered changes as one `didChange` under the next version.
    async fn flush(&self, state: &mut SessionState, manager: &RequestManager) {
        let content_changes = state.pending.take(|| self.buffer.text());
        if content_changes.is_empty() {
            return;
        }
        state.version += 1;
        manager
            .did_change(DidChangeTextDocumentParams {
                text_document: VersionedTextDocumentIdentifier {
                    uri: self.uri.clone(),
                    version: state.version,
                },
                content_changes,
            })
            .await;
    }

    /// Send `didSave`.
    pub async fn document_saved(&self) {
        self.need_save.store(false, Ordering::SeqCst);
        if !self.is_open().await {
            return;
        }
        let Some(manager) = self.manager() else {
            return;
        };
        let text = manager.save_includes_text().then(|| self.buffer.text());
        manager
            .did_save(DidSaveTextDocumentParams {
                text_document: self.identifier(),
                text,
            })
            .await;
    }

    /// The document is about to be saved.
    ///
    /// With `willSaveWaitUntil` the server's edits are applied and the document is saved
    /// right away; the save this triggers comes back here with `need_save` set and only
    /// sends `willSave`.
    pub async fn will_save(&self, reason: TextDocumentSaveReason) {
        let Some(manager) = self.manager() else {
            return;
        };
        let params = WillSaveTextDocumentParams {
            text_document: self.identifier(),
            reason,
        };

        if manager.is_will_save_wait_until() && !self.need_save() {
            let edits = self
                .context
                .timeouts
                .run(RequestKind::WillSave, manager.will_save_wait_until(params))
                .await;
            if let Some(edits) = edits {
                self.apply_edits(edits, None).await;
            }
            self.need_save.store(true, Ordering::SeqCst);
            self.buffer.save();
        } else {
            manager.will_save(params).await;
        }
    }

    /// Apply edits to the buffer and report them to the server as one change.
    ///
    /// Refused (returns `false`) when `version` is older than the session's version.
    pub async fn apply_edits(&self, mut edits: Vec<TextEdit>, version: Option<i32>) -> bool {
        let mut state = self.state.lock().await;
        if let Some(version) = version {
            if version < state.version {
                debug!(uri = %self.uri.as_str(), version, current = state.version, "Refusing stale edit");
                return false;
            }
        }

        let manager = self.sync_manager(&state);
        let text = self.buffer.text();
        edits.sort_by_key(|e| std::cmp::Reverse(text::range_to_offsets(&text, e.range).0));
        for edit in edits {
            let text = self.buffer.text();
            let (start, end) = text::range_to_offsets(&text, edit.range);
            let old_text = text.get(start..end).unwrap_or_default().to_string();
            self.buffer.replace(start, end, &edit.new_text);
            if let Some(manager) = &manager {
                let change = TextChange::new(start, old_text, edit.new_text);
                state
                    .pending
                    .record(manager.sync_kind(), &change, &self.buffer.text());
            }
        }
        if let Some(manager) = &manager {
            self.flush(&mut state, manager).await;
        }
        true
    }

    // Language features

    /// Completion entries at `offset`.
    pub async fn completion(&self, offset: usize) -> Vec<CompletionEntry> {
        let Some(manager) = self.manager() else {
            return Vec::new();
        };
        let params = CompletionParams {
            text_document_position: self.position_params(offset),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: None,
        };
        self.context
            .timeouts
            .run(RequestKind::Completion, manager.completion(params))
            .await
            .map(completion::entries)
            .unwrap_or_default()
    }

    /// Fill in lazily computed fields of an entry.
    pub async fn resolve_completion(&self, entry: CompletionEntry) -> CompletionEntry {
        let Some(manager) = self.manager() else {
            return entry;
        };
        self.context
            .timeouts
            .run(
                RequestKind::Completion,
                manager.resolve_completion_item(entry.item.clone()),
            )
            .await
            .map(CompletionEntry::from_item)
            .unwrap_or(entry)
    }

    /// Apply a chosen entry with the caret at `caret`, then run its command.
    ///
    /// Entries without a main edit replace the identifier prefix before the caret.
    /// Snippets are inserted as their expanded text and handed to the sink for
    /// tab-stop navigation.
    pub async fn apply_completion(&self, entry: &CompletionEntry, caret: usize) -> bool {
        let text = self.buffer.text();
        let range = match &entry.edit {
            Some(edit) => edit.range,
            None => {
                let caret = text::clamp_offset(&text, caret);
                let (token_start, _) = text::expand_to_token(&text[..caret], caret);
                text::offsets_to_range(&text, token_start, caret)
            }
        };
        let new_text = match (&entry.snippet, &entry.edit) {
            (Some(snippet), _) => snippet.text.clone(),
            (None, Some(edit)) => edit.new_text.clone(),
            (None, None) => entry.insert_text.clone(),
        };
        let start = text::position_to_offset(&text, range.start);

        let mut edits = entry.additional_edits.clone();
        edits.push(TextEdit { range, new_text });
        // Edits before the insertion point shift it.
        let shift: isize = entry
            .additional_edits
            .iter()
            .filter(|e| text::position_to_offset(&text, e.range.start) < start)
            .map(|e| {
                let (s, e_end) = text::range_to_offsets(&text, e.range);
                e.new_text.len() as isize - (e_end - s) as isize
            })
            .sum();

        let applied = self.apply_edits(edits, None).await;
        if let Some(snippet) = &entry.snippet {
            let offset = (start as isize + shift).max(0) as usize;
            self.context.sink.snippet(&self.uri, offset, snippet);
        }
        if let Some(command) = &entry.command {
            self.execute_commands(vec![command.clone()]).await;
        }
        applied
    }

    /// Hover documentation at `offset`, also pushed to the sink.
    pub async fn hover(&self, offset: usize) -> Option<HoverText> {
        let manager = self.manager()?;
        let params = HoverParams {
            text_document_position_params: self.position_params(offset),
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let hover = self
            .context
            .timeouts
            .run(RequestKind::Hover, manager.hover(params))
            .await?;
        let (text, markdown) = render::hover_text(&hover);
        if text.is_empty() {
            return None;
        }
        let hover = HoverText {
            offset,
            text,
            markdown,
        };
        self.context.sink.hover(&self.uri, &hover);
        Some(hover)
    }

    /// Active signature label at `offset`, also pushed to the sink.
    pub async fn signature_help(&self, offset: usize) -> Option<String> {
        let manager = self.manager()?;
        let params = SignatureHelpParams {
            context: None,
            text_document_position_params: self.position_params(offset),
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let help = self
            .context
            .timeouts
            .run(RequestKind::Signature, manager.signature_help(params))
            .await?;
        let label = render::signature_label(&help)?;
        self.context.sink.signature(&self.uri, &label);
        Some(label)
    }

    /// Every reference to the symbol at `offset`, declaration included.
    pub async fn references(&self, offset: usize) -> Vec<Location> {
        let Some(manager) = self.manager() else {
            return Vec::new();
        };
        let params = ReferenceParams {
            text_document_position: self.position_params(offset),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: ReferenceContext {
                include_declaration: true,
            },
        };
        self.context
            .timeouts
            .run(RequestKind::References, manager.references(params))
            .await
            .unwrap_or_default()
    }

    /// References inside this document, as byte ranges.
    pub async fn document_references(&self, offset: usize) -> Vec<(usize, usize)> {
        let locations = self.references(offset).await;
        let text = self.buffer.text();
        locations
            .into_iter()
            .filter(|l| l.uri == self.uri)
            .map(|l| text::range_to_offsets(&text, l.range))
            .collect()
    }

    pub async fn definition(&self, offset: usize) -> Vec<Location> {
        let Some(manager) = self.manager() else {
            return Vec::new();
        };
        let params = GotoDefinitionParams {
            text_document_position_params: self.position_params(offset),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        self.context
            .timeouts
            .run(RequestKind::Definition, manager.definition(params))
            .await
            .unwrap_or_default()
    }

    /// Whether the symbol at `offset` can be renamed.
    ///
    /// A failed or timed-out check counts as renameable.
    pub async fn can_rename(&self, offset: usize) -> bool {
        let Some(manager) = self.manager() else {
            return false;
        };
        if !manager.supports_rename() {
            return false;
        }
        let prepared = self
            .context
            .timeouts
            .limit(
                RequestKind::PrepareRename,
                manager.prepare_rename(self.position_params(offset)),
            )
            .await;
        match prepared {
            Ok(Some(Ok(None))) => false,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "prepareRename failed, allowing rename");
                true
            }
            _ => true,
        }
    }

    /// Rename the symbol at `offset` across open documents.
    pub async fn rename(&self, offset: usize, new_name: &str) -> bool {
        let Some(manager) = self.manager() else {
            return false;
        };
        let params = RenameParams {
            text_document_position: self.position_params(offset),
            new_name: new_name.to_string(),
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let edit = self
            .context
            .timeouts
            .run(RequestKind::References, manager.rename(params))
            .await;
        match edit {
            Some(edit) => workspace_edit::apply(&self.context.documents, &edit).await,
            None => false,
        }
    }

    /// Format the whole document.
    pub async fn reformat(&self, options: FormattingOptions) -> bool {
        let Some(manager) = self.manager() else {
            return false;
        };
        let params = DocumentFormattingParams {
            text_document: self.identifier(),
            options,
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let edits = self
            .context
            .timeouts
            .run(RequestKind::Formatting, manager.formatting(params))
            .await;
        match edits {
            Some(edits) => self.apply_edits(edits, None).await,
            None => false,
        }
    }

    /// Format `start..end`.
    pub async fn reformat_selection(
        &self,
        start: usize,
        end: usize,
        options: FormattingOptions,
    ) -> bool {
        let Some(manager) = self.manager() else {
            return false;
        };
        let params = DocumentRangeFormattingParams {
            text_document: self.identifier(),
            range: text::offsets_to_range(&self.buffer.text(), start, end),
            options,
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let edits = self
            .context
            .timeouts
            .run(RequestKind::Formatting, manager.range_formatting(params))
            .await;
        match edits {
            Some(edits) => self.apply_edits(edits, None).await,
            None => false,
        }
    }

    async fn on_type_formatting(&self, offset: usize, ch: char) -> bool {
        let Some(manager) = self.manager() else {
            return false;
        };
        let params = DocumentOnTypeFormattingParams {
            text_document_position: self.position_params(offset),
            ch: ch.to_string(),
            options: FormattingOptions {
                tab_size: 4,
                insert_spaces: true,
                ..Default::default()
            },
        };
        let edits = self
            .context
            .timeouts
            .run(RequestKind::Formatting, manager.on_type_formatting(params))
            .await;
        match edits {
            Some(edits) => self.apply_edits(edits, None).await,
            None => false,
        }
    }

    /// React to a typed character; `offset` is the caret after it.
    pub async fn character_typed(&self, offset: usize, ch: char) {
        let Some(manager) = self.manager() else {
            return;
        };
        let typed = ch.to_string();

        let completion_trigger = manager
            .completion_triggers()
            .iter()
            .any(|t| *t == typed && t != ".");
        if completion_trigger {
            let entries = self.completion(offset).await;
            if !entries.is_empty() {
                self.context.sink.completions(&self.uri, &entries);
            }
        }
        if manager.signature_triggers().contains(&typed) {
            self.signature_help(offset).await;
        }
        if manager.on_type_triggers().contains(&typed) {
            self.on_type_formatting(offset, ch).await;
        }
    }

    /// Ranges highlighted for the symbol at `offset`.
    pub async fn document_highlight(&self, offset: usize) -> Vec<(usize, usize)> {
        let Some(manager) = self.manager() else {
            return Vec::new();
        };
        let params = DocumentHighlightParams {
            text_document_position_params: self.position_params(offset),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let highlights = self
            .context
            .timeouts
            .run(RequestKind::DocHighlight, manager.document_highlight(params))
            .await
            .unwrap_or_default();
        let text = self.buffer.text();
        highlights
            .into_iter()
            .map(|h| text::range_to_offsets(&text, h.range))
            .collect()
    }

    /// Caret moved: push the highlights of the symbol under it.
    pub async fn selection_changed(&self, offset: usize) {
        let ranges = self.document_highlight(offset).await;
        self.context.sink.highlights(&self.uri, &ranges);
    }

    pub async fn document_symbols(&self) -> Option<DocumentSymbolResponse> {
        let manager = self.manager()?;
        let params = DocumentSymbolParams {
            text_document: self.identifier(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        self.context
            .timeouts
            .run(RequestKind::Symbols, manager.document_symbol(params))
            .await
    }

    /// Code actions for `start..end`, with the diagnostics overlapping it as context.
    pub async fn code_actions(&self, start: usize, end: usize) -> Vec<CodeActionOrCommand> {
        let Some(manager) = self.manager() else {
            return Vec::new();
        };
        let range = text::offsets_to_range(&self.buffer.text(), start, end);
        let diagnostics = self
            .diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|d| overlaps(d.range, range))
            .cloned()
            .collect();
        let params = CodeActionParams {
            text_document: self.identifier(),
            range,
            context: CodeActionContext {
                diagnostics,
                only: None,
                trigger_kind: None,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        self.context
            .timeouts
            .run(RequestKind::CodeAction, manager.code_action(params))
            .await
            .unwrap_or_default()
    }

    /// Apply a code action: its edit first, then its command.
    pub async fn apply_code_action(&self, action: CodeActionOrCommand) -> bool {
        match action {
            CodeActionOrCommand::Command(command) => {
                self.execute_commands(vec![command]).await;
                true
            }
            CodeActionOrCommand::CodeAction(CodeAction { edit, command, .. }) => {
                let applied = match edit {
                    Some(edit) => workspace_edit::apply(&self.context.documents, &edit).await,
                    None => true,
                };
                if let Some(command) = command {
                    self.execute_commands(vec![command]).await;
                }
                applied
            }
        }
    }

    /// Execute commands on the server; a returned workspace edit is applied.
    pub async fn execute_commands(&self, commands: Vec<Command>) {
        let Some(manager) = self.manager() else {
            return;
        };
        for command in commands {
            let params = ExecuteCommandParams {
                command: command.command.clone(),
                arguments: command.arguments.clone().unwrap_or_default(),
                work_done_progress_params: WorkDoneProgressParams::default(),
            };
            let result = self
                .context
                .timeouts
                .run(RequestKind::ExecuteCommand, manager.execute_command(params))
                .await;
            if let Some(edit) = result.and_then(as_workspace_edit) {
                workspace_edit::apply(&self.context.documents, &edit).await;
            }
        }
    }

    /// Code lenses, resolved when the server supports it.
    pub async fn code_lens(&self) -> Vec<CodeLens> {
        let Some(manager) = self.manager() else {
            return Vec::new();
        };
        let params = CodeLensParams {
            text_document: self.identifier(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let lenses = self
            .context
            .timeouts
            .run(RequestKind::CodeLens, manager.code_lens(params))
            .await
            .unwrap_or_default();

        let mut resolved = Vec::with_capacity(lenses.len());
        for lens in lenses {
            if lens.command.is_some() {
                resolved.push(lens);
                continue;
            }
            let full = self
                .context
                .timeouts
                .run(RequestKind::CodeLens, manager.resolve_code_lens(lens.clone()))
                .await;
            resolved.push(full.unwrap_or(lens));
        }
        resolved
    }

    /// Document links, with targets resolved when missing.
    pub async fn document_links(&self) -> Vec<DocumentLink> {
        let Some(manager) = self.manager() else {
            return Vec::new();
        };
        let params = DocumentLinkParams {
            text_document: self.identifier(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let links = self
            .context
            .timeouts
            .run(RequestKind::CodeLens, manager.document_link(params))
            .await
            .unwrap_or_default();

        let mut resolved = Vec::with_capacity(links.len());
        for link in links {
            if link.target.is_some() {
                resolved.push(link);
                continue;
            }
            let full = self
                .context
                .timeouts
                .run(RequestKind::CodeLens, manager.resolve_document_link(link.clone()))
                .await;
            resolved.push(full.unwrap_or(link));
        }
        resolved
    }

    // Diagnostics

    /// Replace every diagnostic of the document.
    ///
    /// Empty ranges grow to the identifier around them.
    pub fn diagnostics(&self, diagnostics: Vec<Diagnostic>) {
        let text = self.buffer.text();
        let markers: Vec<DiagnosticMarker> = diagnostics
            .iter()
            .map(|d| {
                let (mut start, mut end) = text::range_to_offsets(&text, d.range);
                if start == end {
                    (start, end) = text::expand_to_token(&text, start);
                }
                DiagnosticMarker {
                    start,
                    end,
                    severity: d.severity,
                    message: d.message.clone(),
                    source: d.source.clone(),
                    code: d.code.as_ref().map(|c| match c {
                        NumberOrString::Number(n) => n.to_string(),
                        NumberOrString::String(s) => s.clone(),
                    }),
                }
            })
            .collect();

        *self
            .diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = diagnostics;
        self.context.sink.diagnostics(&self.uri, &markers);
    }

    /// Diagnostics last published for the document.
    pub fn current_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSession")
            .field("uri", &self.uri.as_str())
            .field("language_id", &self.language_id)
            .finish_non_exhaustive()
    }
}

fn overlaps(a: Range, b: Range) -> bool {
    fn le(x: Position, y: Position) -> bool {
        (x.line, x.character) <= (y.line, y.character)
    }
    le(a.start, b.end) && le(b.start, a.end)
}

fn as_workspace_edit(value: Value) -> Option<WorkspaceEdit> {
    let object = value.as_object()?;
    if !object.contains_key("changes") && !object.contains_key("documentChanges") {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(edit) => Some(edit),
        Err(e) => {
            warn!(error = %e, "Command returned an unreadable workspace edit");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn range(l1: u32, c1: u32, l2: u32, c2: u32) -> Range {
        Range::new(Position::new(l1, c1), Position::new(l2, c2))
    }

    #[test]
    fn test_overlaps() {
        assert!(overlaps(range(0, 0, 0, 5), range(0, 3, 0, 9)));
        assert!(overlaps(range(0, 0, 0, 5), range(0, 5, 0, 9)));
        assert!(!overlaps(range(0, 0, 0, 5), range(1, 0, 1, 1)));
        assert!(overlaps(range(2, 0, 2, 0), range(0, 0, 5, 0)));
    }

    #[test]
    fn test_as_workspace_edit() {
        assert!(as_workspace_edit(json!({"changes": {}})).is_some());
        assert!(as_workspace_edit(json!({"ok": true})).is_none());
        assert!(as_workspace_edit(json!(42)).is_none());
    }
}
