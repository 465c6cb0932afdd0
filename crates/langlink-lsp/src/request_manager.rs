//! Capability-gated facade over a started server.
//!
//! Every method first checks that the owning wrapper is started and that the server
//! advertised (statically or by dynamic registration) the feature, and otherwise returns
//! `None` without touching the transport. Transport failures are logged and reported to
//! the wrapper as a crash.

use crate::error::{LspError, LspResult};
use crate::registration::DynamicMethod;
use crate::transport::ServerTransport;
use crate::wrapper::ServerStatus;
use lsp_types::notification::{
    DidChangeConfiguration, DidChangeTextDocument, DidChangeWatchedFiles, DidCloseTextDocument,
    DidOpenTextDocument, DidSaveTextDocument, Notification, WillSaveTextDocument,
};
use lsp_types::request::{
    CodeActionRequest, CodeLensRequest, CodeLensResolve, Completion, DocumentHighlightRequest,
    DocumentLinkRequest, DocumentLinkResolve, DocumentSymbolRequest, ExecuteCommand, Formatting,
    HoverRequest, OnTypeFormatting, PrepareRenameRequest, RangeFormatting, References, Rename,
    Request, ResolveCompletionItem, SignatureHelpRequest, WillSaveWaitUntil, WorkspaceSymbolRequest,
};
use lsp_types::{
    CodeActionParams, CodeActionProviderCapability, CodeActionResponse, CodeLens, CodeLensParams,
    CompletionItem, CompletionParams, CompletionResponse, DidChangeConfigurationParams,
    DidChangeTextDocumentParams, DidChangeWatchedFilesParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, DidSaveTextDocumentParams, DocumentFormattingParams,
    DocumentHighlight, DocumentHighlightParams, DocumentLink, DocumentLinkParams,
    DocumentOnTypeFormattingParams, DocumentRangeFormattingParams, DocumentSymbolParams,
    DocumentSymbolResponse, ExecuteCommandParams, GotoDefinitionParams, Hover, HoverParams,
    HoverProviderCapability, Location, OneOf, PrepareRenameResponse, ReferenceParams,
    RenameParams, ServerCapabilities, SignatureHelp, SignatureHelpParams,
    TextDocumentPositionParams, TextDocumentSyncCapability, TextDocumentSyncKind,
    TextDocumentSyncOptions, TextDocumentSyncSaveOptions, TextEdit, WillSaveTextDocumentParams,
    WorkspaceEdit, WorkspaceSymbolParams, WorkspaceSymbolResponse,
};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// What the request manager needs from the wrapper that owns it.
pub trait ServerMonitor: Send + Sync {
    fn status(&self) -> ServerStatus;

    /// The connection failed underneath a call.
    fn report_crash(&self, error: LspError);

    /// Whether the server registered `method` dynamically.
    fn is_registered(&self, _method: &DynamicMethod) -> bool {
        false
    }
}

fn enabled<T>(capability: &Option<OneOf<bool, T>>) -> bool {
    matches!(capability, Some(OneOf::Left(true)) | Some(OneOf::Right(_)))
}

/// Capability-gated RPC facade.
pub struct RequestManager {
    transport: Arc<dyn ServerTransport>,
    capabilities: ServerCapabilities,
    monitor: Weak<dyn ServerMonitor>,
}

impl RequestManager {
    pub fn new(
        transport: Arc<dyn ServerTransport>,
        capabilities: ServerCapabilities,
        monitor: Weak<dyn ServerMonitor>,
    ) -> Self {
        Self {
            transport,
            capabilities,
            monitor,
        }
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    fn is_started(&self) -> bool {
        self.monitor
            .upgrade()
            .is_some_and(|m| m.status() == ServerStatus::Started)
    }

    fn registered(&self, method: DynamicMethod) -> bool {
        self.monitor
            .upgrade()
            .is_some_and(|m| m.is_registered(&method))
    }

    fn report(&self, method: &str, error: LspError) {
        if error.is_benign() {
            debug!(method, error = %error, "Request dropped by server");
            return;
        }
        warn!(method, error = %error, "Request failed");
        if let Some(monitor) = self.monitor.upgrade() {
            monitor.report_crash(error);
        }
    }

    async fn call_raw(&self, method: &str, params: Value) -> LspResult<Value> {
        self.transport.request(method, params).await
    }

    /// Send a request; `None` on failure.
    async fn call<R>(&self, params: R::Params) -> Option<R::Result>
    where
        R: Request,
    {
        let params = match serde_json::to_value(params) {
            Ok(params) => params,
            Err(e) => {
                warn!(method = R::METHOD, error = %e, "Failed to encode params");
                return None;
            }
        };
        match self.call_raw(R::METHOD, params).await {
            Ok(value) => match serde_json::from_value(value) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(method = R::METHOD, error = %e, "Unexpected response shape");
                    None
                }
            },
            Err(e) => {
                self.report(R::METHOD, e);
                None
            }
        }
    }

    async fn send<N>(&self, params: N::Params)
    where
        N: Notification,
    {
        let params = match serde_json::to_value(params) {
            Ok(params) => params,
            Err(e) => {
                warn!(method = N::METHOD, error = %e, "Failed to encode params");
                return;
            }
        };
        if let Err(e) = self.transport.notify(N::METHOD, params).await {
            self.report(N::METHOD, e);
        }
    }

    // Text document synchronization

    fn sync_options(&self) -> Option<&TextDocumentSyncOptions> {
        match &self.capabilities.text_document_sync {
            Some(TextDocumentSyncCapability::Options(options)) => Some(options),
            _ => None,
        }
    }

    /// Negotiated change sync kind; `NONE` when the server gave none.
    pub fn sync_kind(&self) -> TextDocumentSyncKind {
        match &self.capabilities.text_document_sync {
            Some(TextDocumentSyncCapability::Kind(kind)) => *kind,
            Some(TextDocumentSyncCapability::Options(options)) => {
                options.change.unwrap_or(TextDocumentSyncKind::NONE)
            }
            None => TextDocumentSyncKind::NONE,
        }
    }

    fn open_close(&self) -> bool {
        self.sync_options()
            .and_then(|o| o.open_close)
            .unwrap_or(true)
    }

    fn save_enabled(&self) -> bool {
        match self.sync_options().and_then(|o| o.save.as_ref()) {
            Some(TextDocumentSyncSaveOptions::Supported(supported)) => *supported,
            Some(TextDocumentSyncSaveOptions::SaveOptions(_)) => true,
            None => self.sync_options().is_none(),
        }
    }

    /// Whether `didSave` should carry the full text.
    pub fn save_includes_text(&self) -> bool {
        matches!(
            self.sync_options().and_then(|o| o.save.as_ref()),
            Some(TextDocumentSyncSaveOptions::SaveOptions(options))
                if options.include_text == Some(true)
        )
    }

    pub fn is_will_save(&self) -> bool {
        self.sync_options()
            .and_then(|o| o.will_save)
            .unwrap_or(false)
    }

    pub fn is_will_save_wait_until(&self) -> bool {
        self.sync_options()
            .and_then(|o| o.will_save_wait_until)
            .unwrap_or(false)
    }

    pub async fn did_open(&self, params: DidOpenTextDocumentParams) {
        if self.is_started() && self.open_close() {
            self.send::<DidOpenTextDocument>(params).await;
        }
    }

    pub async fn did_close(&self, params: DidCloseTextDocumentParams) {
        if self.is_started() && self.open_close() {
            self.send::<DidCloseTextDocument>(params).await;
        }
    }

    pub async fn did_change(&self, params: DidChangeTextDocumentParams) {
        if self.is_started() && self.sync_kind() != TextDocumentSyncKind::NONE {
            self.send::<DidChangeTextDocument>(params).await;
        }
    }

    pub async fn will_save(&self, params: WillSaveTextDocumentParams) {
        if self.is_started() && self.is_will_save() {
            self.send::<WillSaveTextDocument>(params).await;
        }
    }

    pub async fn will_save_wait_until(
        &self,
        params: WillSaveTextDocumentParams,
    ) -> Option<Vec<TextEdit>> {
        if !self.is_started() || !self.is_will_save_wait_until() {
            return None;
        }
        self.call::<WillSaveWaitUntil>(params).await.flatten()
    }

    pub async fn did_save(&self, params: DidSaveTextDocumentParams) {
        if self.is_started() && self.save_enabled() {
            self.send::<DidSaveTextDocument>(params).await;
        }
    }

    // Workspace

    pub async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        if self.is_started() {
            self.send::<DidChangeConfiguration>(params).await;
        }
    }

    pub async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        if self.is_started() {
            self.send::<DidChangeWatchedFiles>(params).await;
        }
    }

    pub fn supports_workspace_symbol(&self) -> bool {
        enabled(&self.capabilities.workspace_symbol_provider)
            || self.registered(DynamicMethod::WorkspaceSymbol)
    }

    pub async fn workspace_symbol(
        &self,
        params: WorkspaceSymbolParams,
    ) -> Option<WorkspaceSymbolResponse> {
        if !self.is_started() || !self.supports_workspace_symbol() {
            return None;
        }
        self.call::<WorkspaceSymbolRequest>(params).await.flatten()
    }

    /// Whether the server executes `command`.
    pub fn supports_command(&self, command: &str) -> bool {
        match &self.capabilities.execute_command_provider {
            Some(options) => options.commands.iter().any(|c| c == command),
            None => self.registered(DynamicMethod::ExecuteCommand),
        }
    }

    pub async fn execute_command(&self, params: ExecuteCommandParams) -> Option<Value> {
        if !self.is_started() || !self.supports_command(&params.command) {
            return None;
        }
        self.call::<ExecuteCommand>(params).await.flatten()
    }

    // Language features

    pub fn supports_hover(&self) -> bool {
        let static_support = match &self.capabilities.hover_provider {
            Some(HoverProviderCapability::Simple(supported)) => *supported,
            Some(HoverProviderCapability::Options(_)) => true,
            None => false,
        };
        static_support || self.registered(DynamicMethod::Hover)
    }

    pub async fn hover(&self, params: HoverParams) -> Option<Hover> {
        if !self.is_started() || !self.supports_hover() {
            return None;
        }
        self.call::<HoverRequest>(params).await.flatten()
    }

    pub fn supports_completion(&self) -> bool {
        self.capabilities.completion_provider.is_some() || self.registered(DynamicMethod::Completion)
    }

    /// Characters that trigger completion.
    pub fn completion_triggers(&self) -> Vec<String> {
        self.capabilities
            .completion_provider
            .as_ref()
            .and_then(|c| c.trigger_characters.clone())
            .unwrap_or_default()
    }

    pub async fn completion(&self, params: CompletionParams) -> Option<CompletionResponse> {
        if !self.is_started() || !self.supports_completion() {
            return None;
        }
        self.call::<Completion>(params).await.flatten()
    }

    pub async fn resolve_completion_item(&self, item: CompletionItem) -> Option<CompletionItem> {
        let resolvable = self
            .capabilities
            .completion_provider
            .as_ref()
            .and_then(|c| c.resolve_provider)
            .unwrap_or(false);
        if !self.is_started() || !resolvable {
            return None;
        }
        self.call::<ResolveCompletionItem>(item).await
    }

    /// Characters that trigger signature help.
    pub fn signature_triggers(&self) -> Vec<String> {
        self.capabilities
            .signature_help_provider
            .as_ref()
            .and_then(|s| s.trigger_characters.clone())
            .unwrap_or_default()
    }

    pub async fn signature_help(&self, params: SignatureHelpParams) -> Option<SignatureHelp> {
        let supported = self.capabilities.signature_help_provider.is_some()
            || self.registered(DynamicMethod::SignatureHelp);
        if !self.is_started() || !supported {
            return None;
        }
        self.call::<SignatureHelpRequest>(params).await.flatten()
    }

    pub async fn references(&self, params: ReferenceParams) -> Option<Vec<Location>> {
        let supported = enabled(&self.capabilities.references_provider)
            || self.registered(DynamicMethod::References);
        if !self.is_started() || !supported {
            return None;
        }
        self.call::<References>(params).await.flatten()
    }

    pub async fn document_highlight(
        &self,
        params: DocumentHighlightParams,
    ) -> Option<Vec<DocumentHighlight>> {
        let supported = enabled(&self.capabilities.document_highlight_provider)
            || self.registered(DynamicMethod::DocumentHighlight);
        if !self.is_started() || !supported {
            return None;
        }
        self.call::<DocumentHighlightRequest>(params).await.flatten()
    }

    pub async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Option<DocumentSymbolResponse> {
        let supported = enabled(&self.capabilities.document_symbol_provider)
            || self.registered(DynamicMethod::DocumentSymbol);
        if !self.is_started() || !supported {
            return None;
        }
        self.call::<DocumentSymbolRequest>(params).await.flatten()
    }

    pub async fn formatting(&self, params: DocumentFormattingParams) -> Option<Vec<TextEdit>> {
        let supported = enabled(&self.capabilities.document_formatting_provider)
            || self.registered(DynamicMethod::Formatting);
        if !self.is_started() || !supported {
            return None;
        }
        self.call::<Formatting>(params).await.flatten()
    }

    pub async fn range_formatting(
        &self,
        params: DocumentRangeFormattingParams,
    ) -> Option<Vec<TextEdit>> {
        let supported = enabled(&self.capabilities.document_range_formatting_provider)
            || self.registered(DynamicMethod::RangeFormatting);
        if !self.is_started() || !supported {
            return None;
        }
        self.call::<RangeFormatting>(params).await.flatten()
    }

    /// Characters that trigger on-type formatting.
    pub fn on_type_triggers(&self) -> Vec<String> {
        self.capabilities
            .document_on_type_formatting_provider
            .as_ref()
            .map(|o| {
                let mut triggers = vec![o.first_trigger_character.clone()];
                triggers.extend(o.more_trigger_character.clone().unwrap_or_default());
                triggers
            })
            .unwrap_or_default()
    }

    pub async fn on_type_formatting(
        &self,
        params: DocumentOnTypeFormattingParams,
    ) -> Option<Vec<TextEdit>> {
        let supported = self.capabilities.document_on_type_formatting_provider.is_some()
            || self.registered(DynamicMethod::OnTypeFormatting);
        if !self.is_started() || !supported {
            return None;
        }
        self.call::<OnTypeFormatting>(params).await.flatten()
    }

    /// Definition locations; location links collapse to their target selection.
    pub async fn definition(&self, params: GotoDefinitionParams) -> Option<Vec<Location>> {
        let supported = enabled(&self.capabilities.definition_provider)
            || self.registered(DynamicMethod::Definition);
        if !self.is_started() || !supported {
            return None;
        }
        let method = "textDocument/definition";
        let params = serde_json::to_value(params).ok()?;
        match self.call_raw(method, params).await {
            Ok(value) => Some(parse_goto_definition_response(value)),
            Err(e) => {
                self.report(method, e);
                None
            }
        }
    }

    pub fn supports_code_action(&self) -> bool {
        let static_support = match &self.capabilities.code_action_provider {
            Some(CodeActionProviderCapability::Simple(supported)) => *supported,
            Some(CodeActionProviderCapability::Options(_)) => true,
            None => false,
        };
        static_support || self.registered(DynamicMethod::CodeAction)
    }

    pub async fn code_action(&self, params: CodeActionParams) -> Option<CodeActionResponse> {
        if !self.is_started() || !self.supports_code_action() {
            return None;
        }
        self.call::<CodeActionRequest>(params).await.flatten()
    }

    pub async fn code_lens(&self, params: CodeLensParams) -> Option<Vec<CodeLens>> {
        let supported = self.capabilities.code_lens_provider.is_some()
            || self.registered(DynamicMethod::CodeLens);
        if !self.is_started() || !supported {
            return None;
        }
        self.call::<CodeLensRequest>(params).await.flatten()
    }

    pub async fn resolve_code_lens(&self, lens: CodeLens) -> Option<CodeLens> {
        let resolvable = self
            .capabilities
            .code_lens_provider
            .as_ref()
            .and_then(|c| c.resolve_provider)
            .unwrap_or(false);
        if !self.is_started() || !resolvable {
            return None;
        }
        self.call::<CodeLensResolve>(lens).await
    }

    pub async fn document_link(&self, params: DocumentLinkParams) -> Option<Vec<DocumentLink>> {
        let supported = self.capabilities.document_link_provider.is_some()
            || self.registered(DynamicMethod::DocumentLink);
        if !self.is_started() || !supported {
            return None;
        }
        self.call::<DocumentLinkRequest>(params).await.flatten()
    }

    pub async fn resolve_document_link(&self, link: DocumentLink) -> Option<DocumentLink> {
        let resolvable = self
            .capabilities
            .document_link_provider
            .as_ref()
            .and_then(|c| c.resolve_provider)
            .unwrap_or(false);
        if !self.is_started() || !resolvable {
            return None;
        }
        self.call::<DocumentLinkResolve>(link).await
    }

    pub fn supports_rename(&self) -> bool {
        enabled(&self.capabilities.rename_provider) || self.registered(DynamicMethod::Rename)
    }

    pub fn supports_prepare_rename(&self) -> bool {
        matches!(
            &self.capabilities.rename_provider,
            Some(OneOf::Right(options)) if options.prepare_provider == Some(true)
        )
    }

    pub async fn rename(&self, params: RenameParams) -> Option<WorkspaceEdit> {
        if !self.is_started() || !self.supports_rename() {
            return None;
        }
        self.call::<Rename>(params).await.flatten()
    }

    /// Ask whether a rename is possible here.
    ///
    /// `None` when prepareRename is unsupported. Error answers from the server are handed
    /// back rather than reported as a crash.
    pub async fn prepare_rename(
        &self,
        params: TextDocumentPositionParams,
    ) -> Option<LspResult<Option<PrepareRenameResponse>>> {
        if !self.is_started() || !self.supports_prepare_rename() {
            return None;
        }
        let method = PrepareRenameRequest::METHOD;
        let params = match serde_json::to_value(params) {
            Ok(params) => params,
            Err(e) => return Some(Err(e.into())),
        };
        match self.call_raw(method, params).await {
            Ok(value) => Some(serde_json::from_value(value).map_err(LspError::from)),
            Err(e @ LspError::Rpc { .. }) => Some(Err(e)),
            Err(e) => {
                let message = e.to_string();
                self.report(method, e);
                Some(Err(LspError::request(message)))
            }
        }
    }
}

/// Parse goto definition response.
fn parse_goto_definition_response(value: Value) -> Vec<Location> {
    if value.is_null() {
        return Vec::new();
    }

    // Try as single Location
    if let Ok(loc) = serde_json::from_value::<Location>(value.clone()) {
        return vec![loc];
    }

    // Try as Location[]
    if let Ok(locs) = serde_json::from_value::<Vec<Location>>(value.clone()) {
        return locs;
    }

    // Try as LocationLink[] and extract target locations
    if let Ok(links) = serde_json::from_value::<Vec<lsp_types::LocationLink>>(value) {
        return links
            .into_iter()
            .map(|link| Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            })
            .collect();
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_definition_shapes() {
        let single = json!({
            "uri": "file:///a.rs",
            "range": {"start": {"line": 1, "character": 2}, "end": {"line": 1, "character": 5}}
        });
        assert_eq!(parse_goto_definition_response(single.clone()).len(), 1);
        assert_eq!(parse_goto_definition_response(json!([single, single])).len(), 2);

        let links = json!([{
            "targetUri": "file:///b.rs",
            "targetRange": {"start": {"line": 0, "character": 0}, "end": {"line": 9, "character": 0}},
            "targetSelectionRange": {"start": {"line": 3, "character": 4}, "end": {"line": 3, "character": 8}}
        }]);
        let locs = parse_goto_definition_response(links);
        assert_eq!(locs[0].uri.as_str(), "file:///b.rs");
        assert_eq!(locs[0].range.start.line, 3);

        assert!(parse_goto_definition_response(Value::Null).is_empty());
        assert!(parse_goto_definition_response(json!("junk")).is_empty());
    }

    #[test]
    fn test_enabled_helper() {
        assert!(!enabled::<()>(&None));
        assert!(!enabled::<()>(&Some(OneOf::Left(false))));
        assert!(enabled::<()>(&Some(OneOf::Left(true))));
        assert!(enabled(&Some(OneOf::<bool, u8>::Right(0))));
    }
}
