//! Testing utilities for langlink.
//!
//! This crate provides:
//! - **Fake server**: A scripted language server speaking the wire protocol over in-memory pipes
//! - **Mocks**: Recording doubles for the editor collaborators and the transport
//! - **Fixtures**: Temporary projects and ready-to-use contexts
//!
//! # Example
//!
//! ```rust,ignore
//! use langlink_test_utils::{fixtures::Harness, FakeServer};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn hover_reaches_server() {
//!     let server = FakeServer::new(json!({ "hoverProvider": true }))
//!         .respond("textDocument/hover", json!({ "contents": "docs" }));
//!     let harness = Harness::new(server.clone());
//!     let registry = harness.registry(&[Harness::definition("foo")]);
//!     let (document, _buffer) = harness.document("a.foo", "text");
//!
//!     registry.document_opened(document).await;
//!     // ...
//! }
//! ```

pub mod fake_server;
pub mod fixtures;
pub mod mocks;

pub use fake_server::{wait_for_status, wait_until, FakeConnections, FakeServer};
pub use fixtures::{Harness, TestProject};
pub use mocks::{
    MemoryConfigStore, MemoryDocument, MockTransport, RecordingSink, StaticHost, StaticMonitor,
};
