//! Editor-side Language Server Protocol client runtime.
//!
//! This crate runs language servers on behalf of an editor:
//! - Server lifecycle (start, initialize, stop, crash recovery with a restart threshold)
//! - Capability-gated requests (unsupported features never reach the server)
//! - Per-document sessions with version tracking and none/full/incremental sync
//! - Dynamic registration and watched-file filtering
//! - Per-request-kind timeouts with success/failure tallies
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐     ┌─────────────┐     ┌───────────────┐     ┌────────────────┐     ┌─────────────┐
//! │  editor  │────▶│ LspRegistry │────▶│ ServerWrapper │────▶│ RequestManager │────▶│ Lang Server │
//! │  (host)  │     │             │     │ (per root)    │     │ (capabilities) │     │  (process)  │
//! └──────────┘     └─────────────┘     └───────────────┘     └────────────────┘     └─────────────┘
//!      ▲                  │                    │                                           │
//!      │                  ▼                    ▼                                           │
//!      │           DocumentSession ◀──── ClientHandler ◀───────────────────────────────────┘
//!      └──────────────── NotificationSink (diagnostics, hover, highlights)
//! ```
//!
//! The editor is reached only through the collaborator traits in [`host`]
//! ([`DocumentBuffer`], [`NotificationSink`], [`EditorHost`]) and [`ConfigStore`].
//!
//! # Example
//!
//! ```no_run
//! use langlink_lsp::{LspConfig, LspContext, LspRegistry, OpenDocument};
//! # use langlink_lsp::{DocumentBuffer, EditorHost, NotificationSink};
//! # use std::sync::Arc;
//! # async fn example(
//! #     sink: Arc<dyn NotificationSink>,
//! #     host: Arc<dyn EditorHost>,
//! #     buffer: Arc<dyn DocumentBuffer>,
//! # ) -> langlink_lsp::LspResult<()> {
//! let config = LspConfig::with_presets();
//! let context = LspContext::builder(sink, host)
//!     .crash_threshold(config.crash_threshold)
//!     .timeouts(config.timeouts.clone())
//!     .build();
//! let registry = LspRegistry::from_config(context, &config);
//!
//! let document = OpenDocument::from_path("src/main.rs".as_ref(), buffer)?;
//! let uri = document.uri.clone();
//! registry.document_opened(document).await;
//!
//! if let Some(session) = registry.session_for(&uri) {
//!     session.hover(0).await;
//! }
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod definition;
pub mod error;
pub mod host;
pub mod registration;
pub mod registry;
pub mod request_manager;
pub mod session;
pub mod text;
pub mod timeout;
pub mod transport;
pub mod workspace_edit;
pub mod wrapper;

pub use config::{presets, ConfigStore, FileConfigStore, ForcedAssociation, LspConfig, ServerSettings};
pub use connection::{
    ArtifactResolver, ConnectionFactory, ConnectionProvider, LaunchCommand, ProcessConnections,
    ServerStreams,
};
pub use context::{DocumentIndex, LspContext, DEFAULT_CRASH_THRESHOLD};
pub use definition::{Launch, ServerDefinition};
pub use error::{LspError, LspResult};
pub use host::{
    DiagnosticMarker, DocumentBuffer, EditorHost, HoverText, NotificationSink, OpenDocument,
};
pub use registration::{DynamicMethod, FileWatcher, RegistrationTable};
pub use registry::{LspRegistry, SymbolMatch};
pub use request_manager::{RequestManager, ServerMonitor};
pub use session::snippet::{Snippet, TabStop};
pub use session::{CompletionEntry, CompletionShape, DocumentSession};
pub use text::TextChange;
pub use timeout::{RequestKind, Tally, TimeoutRegistry};
pub use transport::{ServerMessageHandler, ServerTransport, StdioTransport};
pub use wrapper::{ServerStatus, ServerWrapper};

/// Re-exported protocol types.
pub use lsp_types;
