//! Server-initiated traffic: requests and notifications the server sends the client.

use crate::error::LspError;
use crate::transport::{JsonRpcError, ServerMessageHandler, INVALID_PARAMS};
use crate::workspace_edit;
use crate::wrapper::ServerWrapper;
use async_trait::async_trait;
use lsp_types::{
    ApplyWorkspaceEditParams, ApplyWorkspaceEditResponse, ConfigurationParams, LogMessageParams,
    MessageType, PublishDiagnosticsParams, RegistrationParams, ShowMessageParams,
    ShowMessageRequestParams, UnregistrationParams,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

/// Answers the server on behalf of one connection of a wrapper.
pub struct ClientHandler {
    wrapper: Weak<ServerWrapper>,
    generation: u64,
}

impl ClientHandler {
    pub fn new(wrapper: Weak<ServerWrapper>, generation: u64) -> Self {
        Self {
            wrapper,
            generation,
        }
    }

    fn wrapper(&self) -> Option<Arc<ServerWrapper>> {
        self.wrapper.upgrade()
    }
}

fn params<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, JsonRpcError> {
    serde_json::from_value(value).map_err(|e| {
        warn!(method, error = %e, "Invalid params from server");
        JsonRpcError::new(INVALID_PARAMS, e.to_string())
    })
}

fn log_message(server: &str, kind: MessageType, message: &str) {
    match kind {
        MessageType::ERROR => error!(server, "{message}"),
        MessageType::WARNING => warn!(server, "{message}"),
        MessageType::INFO => info!(server, "{message}"),
        _ => debug!(server, "{message}"),
    }
}

#[async_trait]
impl ServerMessageHandler for ClientHandler {
    async fn on_request(&self, method: &str, value: Value) -> Result<Value, JsonRpcError> {
        let Some(wrapper) = self.wrapper() else {
            return Ok(Value::Null);
        };
        let server = wrapper.definition().id.as_str();

        match method {
            "workspace/configuration" => {
                let request: ConfigurationParams = params(method, value)?;
                let settings = wrapper.settings();
                let answers: Vec<Value> = request
                    .items
                    .iter()
                    .map(|item| {
                        let scope = settings
                            .scope_for_uri(item.scope_uri.as_ref().map_or("", |u| u.as_str()));
                        settings.section(item.section.as_deref().unwrap_or(""), scope)
                    })
                    .collect();
                Ok(Value::Array(answers))
            }
            "workspace/applyEdit" => {
                let request: ApplyWorkspaceEditParams = params(method, value)?;
                if let Some(label) = &request.label {
                    debug!(server, label = %label, "Applying server edit");
                }
                let applied =
                    workspace_edit::apply(&wrapper.context().documents, &request.edit).await;
                let response = ApplyWorkspaceEditResponse {
                    applied,
                    failure_reason: (!applied)
                        .then(|| "Edit targets a document that is not open or has changed".to_string()),
                    failed_change: None,
                };
                serde_json::to_value(response).map_err(|e| JsonRpcError::new(INVALID_PARAMS, e.to_string()))
            }
            "client/registerCapability" => {
                let request: RegistrationParams = params(method, value)?;
                wrapper.with_registrations(|table| {
                    for registration in &request.registrations {
                        debug!(server, method = %registration.method, id = %registration.id, "Registering capability");
                        table.register(registration);
                    }
                });
                Ok(Value::Null)
            }
            "client/unregisterCapability" => {
                let request: UnregistrationParams = params(method, value)?;
                wrapper.with_registrations(|table| {
                    for unregistration in &request.unregisterations {
                        debug!(server, method = %unregistration.method, id = %unregistration.id, "Unregistering capability");
                        table.unregister(unregistration);
                    }
                });
                Ok(Value::Null)
            }
            "window/showMessageRequest" => {
                let request: ShowMessageRequestParams = params(method, value)?;
                log_message(server, request.typ, &request.message);
                wrapper.context().sink.message(request.typ, &request.message);
                Ok(Value::Null)
            }
            "window/workDoneProgress/create" => Ok(Value::Null),
            _ => {
                debug!(server, method, "Unhandled server request");
                Err(JsonRpcError::method_not_found(method))
            }
        }
    }

    async fn on_notification(&self, method: &str, value: Value) {
        let Some(wrapper) = self.wrapper() else {
            return;
        };
        let server = wrapper.definition().id.as_str();

        match method {
            "textDocument/publishDiagnostics" => {
                let Ok(notification) = params::<PublishDiagnosticsParams>(method, value) else {
                    return;
                };
                match wrapper.session(&notification.uri) {
                    Some(session) => session.diagnostics(notification.diagnostics),
                    None => trace!(server, uri = %notification.uri.as_str(), "Diagnostics for a document that is not open"),
                }
            }
            "window/showMessage" => {
                let Ok(notification) = params::<ShowMessageParams>(method, value) else {
                    return;
                };
                log_message(server, notification.typ, &notification.message);
                wrapper
                    .context()
                    .sink
                    .message(notification.typ, &notification.message);
            }
            "window/logMessage" => {
                let Ok(notification) = params::<LogMessageParams>(method, value) else {
                    return;
                };
                log_message(server, notification.typ, &notification.message);
            }
            "$/progress" => trace!(server, params = %value, "Progress"),
            "telemetry/event" => trace!(server, params = %value, "Telemetry"),
            _ => debug!(server, method, "Unhandled server notification"),
        }
    }

    fn on_disconnect(&self, reason: LspError) {
        let Some(wrapper) = self.wrapper() else {
            return;
        };
        let generation = self.generation;
        tokio::spawn(async move { wrapper.crashed_at(generation, reason).await });
    }
}
