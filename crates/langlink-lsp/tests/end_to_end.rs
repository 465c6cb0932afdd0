//! End-to-end tests.
//!
//! A document goes through the registry from open to close, with every layer real except
//! the server process.

use langlink_lsp::lsp_types::FileChangeType;
use langlink_lsp::{DocumentBuffer, ServerStatus, TextChange};
use langlink_test_utils::{wait_for_status, wait_until, FakeServer, Harness};
use serde_json::json;

/// Open, hover, edit, save and close a document.
#[tokio::test]
async fn test_document_round_trip() {
    let server = FakeServer::new(json!({
        "hoverProvider": true,
        "textDocumentSync": { "openClose": true, "change": 2, "save": true }
    }))
    .respond(
        "textDocument/hover",
        json!({ "contents": { "kind": "plaintext", "value": "fn main()" } }),
    );
    let harness = Harness::new(server.clone());
    let registry = harness.registry(&[Harness::definition("foo")]);
    let (document, buffer) = harness.document("a.foo", "fn main() {}\n");
    let uri = document.uri.clone();

    registry.document_opened(document).await;
    let wrapper = registry.wrapper_for(&uri).expect("document routed");
    assert!(wait_for_status(&wrapper, ServerStatus::Started).await);
    assert!(wait_until(|| server.calls("textDocument/didOpen") == 1).await);
    assert_eq!(wrapper.connected_uris(), vec![uri.as_str().to_string()]);

    let session = registry.session_for(&uri).expect("session open");
    let hover = session.hover(3).await.expect("hover answered");
    assert!(hover.text.contains("fn main()"));
    assert!(!hover.markdown);
    assert_eq!(server.calls("textDocument/hover"), 1);
    assert_eq!(harness.sink.hovers().len(), 1);

    buffer.replace(11, 11, " ");
    session.document_changed(TextChange::new(11, "", " ")).await;
    assert!(wait_until(|| server.calls("textDocument/didChange") == 1).await);
    assert_eq!(session.version().await, 1);

    // The editor reports its own save as a file change
    registry.file_changed(&uri, FileChangeType::CHANGED).await;
    assert!(wait_until(|| server.calls("textDocument/didSave") == 1).await);

    registry.document_closed(&uri).await;
    assert_eq!(server.calls("textDocument/didClose"), 1);
    assert_eq!(wrapper.status(), ServerStatus::Stopped);
    assert!(registry.session_for(&uri).is_none());

    registry.shutdown().await;
    assert!(registry.wrappers().is_empty());
    assert_eq!(server.calls("shutdown"), 1);
}

/// Documents reopened after a shutdown start a fresh server.
#[tokio::test]
async fn test_reopen_after_shutdown() {
    let server = FakeServer::new(json!({ "textDocumentSync": 1 }));
    let harness = Harness::new(server.clone());
    let registry = harness.registry(&[Harness::definition("foo")]);
    let (document, _buffer) = harness.document("a.foo", "");
    let uri = document.uri.clone();

    registry.document_opened(document.clone()).await;
    assert!(wait_until(|| server.calls("textDocument/didOpen") == 1).await);
    registry.shutdown().await;
    assert!(registry.wrapper_for(&uri).is_none());

    registry.document_opened(document).await;
    assert!(wait_until(|| server.calls("textDocument/didOpen") == 2).await);
    assert_eq!(server.starts(), 2);
    assert_eq!(registry.wrappers().len(), 1);
}
