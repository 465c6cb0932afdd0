//! Registry integration tests.
//!
//! Routing documents to servers by extension, forced associations, definition updates,
//! file events and workspace symbol search.

use langlink_lsp::lsp_types::{FileChangeType, SymbolKind};
use langlink_lsp::{ServerDefinition, ServerStatus};
use langlink_test_utils::{wait_for_status, wait_until, FakeConnections, FakeServer, Harness};
use serde_json::json;

fn foo() -> ServerDefinition {
    Harness::definition("foo").with_id("foo-ls")
}

fn bar() -> ServerDefinition {
    Harness::definition("bar").with_id("bar-ls")
}

/// Two fake servers, one per definition.
fn two_servers() -> (Harness, FakeServer, FakeServer) {
    let foo_server = FakeServer::new(json!({ "textDocumentSync": 1 }));
    let bar_server = FakeServer::new(json!({ "textDocumentSync": 1 }));
    let connections = FakeConnections::empty();
    connections.add("foo-ls", foo_server.clone());
    connections.add("bar-ls", bar_server.clone());
    let harness = Harness::with_connections(connections, 4);
    (harness, foo_server, bar_server)
}

/// Documents go to the server of their extension; unknown extensions go nowhere.
#[tokio::test]
async fn test_routes_by_extension() {
    let (harness, foo_server, bar_server) = two_servers();
    let registry = harness.registry(&[foo(), bar()]);
    let (a, _) = harness.document("a.foo", "");
    let (b, _) = harness.document("b.bar", "");
    let (c, _) = harness.document("c.txt", "");
    let (a_uri, b_uri, c_uri) = (a.uri.clone(), b.uri.clone(), c.uri.clone());

    registry.document_opened(a).await;
    registry.document_opened(b).await;
    registry.document_opened(c).await;
    assert!(wait_until(|| foo_server.calls("textDocument/didOpen") == 1).await);
    assert!(wait_until(|| bar_server.calls("textDocument/didOpen") == 1).await);

    assert_eq!(registry.wrapper_for(&a_uri).unwrap().definition().id, "foo-ls");
    assert_eq!(registry.wrapper_for(&b_uri).unwrap().definition().id, "bar-ls");
    assert!(registry.wrapper_for(&c_uri).is_none());
    assert!(registry.session_for(&a_uri).is_some());
    assert_eq!(registry.wrappers().len(), 2);
    assert!(registry.is_extension_supported("foo"));
    assert!(!registry.is_extension_supported("txt"));
    assert_eq!(registry.roots(), vec![harness.project.path().to_path_buf()]);
}

/// Documents of one root share one wrapper and one process.
#[tokio::test]
async fn test_one_wrapper_per_root() {
    let (harness, foo_server, _) = two_servers();
    let registry = harness.registry(&[foo()]);
    let (a, _) = harness.document("a.foo", "");
    let (b, _) = harness.document("src/b.foo", "");

    registry.document_opened(a.clone()).await;
    registry.document_opened(b).await;
    // Opening twice is a no-op
    registry.document_opened(a).await;
    assert!(wait_until(|| foo_server.calls("textDocument/didOpen") == 2).await);

    assert_eq!(registry.wrappers().len(), 1);
    assert_eq!(foo_server.starts(), 1);
    assert_eq!(registry.wrappers()[0].connected_uris().len(), 2);
}

/// A wrapper whose last document closed is forgotten; a failed one is kept.
#[tokio::test]
async fn test_idle_wrappers_are_dropped() {
    let foo_server = FakeServer::new(json!({ "textDocumentSync": 1 }));
    let connections = FakeConnections::empty();
    connections.add("foo-ls", foo_server.clone());
    let harness = Harness::with_connections(connections, 4);
    let registry = harness.registry(&[foo(), bar()]);
    let (a, _) = harness.document("a.foo", "");
    let (b, _) = harness.document("b.bar", "");
    let (a_uri, b_uri) = (a.uri.clone(), b.uri.clone());

    for round in 1..=3 {
        registry.document_opened(a.clone()).await;
        assert!(wait_until(|| foo_server.calls("textDocument/didOpen") == round).await);
        assert_eq!(registry.wrappers().len(), 1);
        registry.document_closed(&a_uri).await;
        assert!(registry.wrappers().is_empty());
    }
    assert_eq!(foo_server.starts(), 3);

    // No server behind bar-ls: the launch fails
    registry.document_opened(b).await;
    let failed = registry.wrappers();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status(), ServerStatus::Failed);
    registry.document_closed(&b_uri).await;
    assert_eq!(registry.wrappers().len(), 1);
}

/// Forcing a definition moves the document; resetting disconnects it.
#[tokio::test]
async fn test_forced_association() {
    let (harness, foo_server, bar_server) = two_servers();
    let registry = harness.registry(&[foo(), bar()]);
    let (document, _) = harness.document("notes.bar", "");
    let uri = document.uri.clone();

    registry.document_opened(document.clone()).await;
    assert!(wait_until(|| bar_server.calls("textDocument/didOpen") == 1).await);

    registry.force_association(document.clone(), foo()).await;
    assert!(wait_until(|| foo_server.calls("textDocument/didOpen") == 1).await);
    assert_eq!(registry.wrapper_for(&uri).unwrap().definition().id, "foo-ls");
    assert_eq!(bar_server.calls("textDocument/didClose"), 1);
    assert_eq!(registry.wrappers().len(), 1);

    let forced = registry.forced_associations();
    assert_eq!(forced.len(), 1);
    assert_eq!(forced[0].uri, uri.as_str());
    assert_eq!(forced[0].definition, foo().to_array());
    assert_eq!(registry.definition_for(&document).unwrap().id, "foo-ls");

    registry.reset_associations().await;
    assert!(registry.forced_associations().is_empty());
    assert!(registry.wrapper_for(&uri).is_none());
    assert_eq!(registry.definition_for(&document).unwrap().id, "bar-ls");
}

/// Changing the definitions stops the affected servers and reopens affected documents.
#[tokio::test]
async fn test_set_definitions_diff() {
    let (harness, foo_server, bar_server) = two_servers();
    let registry = harness.registry(&[foo()]);
    let (a, _) = harness.document("a.foo", "");
    let (b, _) = harness.document("b.bar", "");
    let (a_uri, b_uri) = (a.uri.clone(), b.uri.clone());

    registry.document_opened(a).await;
    registry.document_opened(b).await;
    assert!(wait_until(|| foo_server.calls("textDocument/didOpen") == 1).await);
    assert!(registry.wrapper_for(&b_uri).is_none());
    let old_wrapper = registry.wrapper_for(&a_uri).unwrap();

    let modified = ServerDefinition::executable("foo", "fake-language-server", vec!["--v2"])
        .with_id("foo-ls");
    registry.set_definitions(vec![modified.clone(), bar()]).await;

    assert_eq!(old_wrapper.status(), ServerStatus::Stopped);
    assert!(wait_until(|| foo_server.calls("textDocument/didOpen") == 2).await);
    assert!(wait_until(|| bar_server.calls("textDocument/didOpen") == 1).await);
    let new_wrapper = registry.wrapper_for(&a_uri).unwrap();
    assert_eq!(new_wrapper.definition(), &modified);
    assert_eq!(registry.wrapper_for(&b_uri).unwrap().definition().id, "bar-ls");
    assert_eq!(registry.wrappers().len(), 2);

    registry.set_definitions(Vec::new()).await;
    assert!(registry.wrappers().is_empty());
    assert!(registry.wrapper_for(&a_uri).is_none());
    assert_eq!(new_wrapper.status(), ServerStatus::Stopped);
}

/// Forced associations to a definition that disappears are dropped.
#[tokio::test]
async fn test_set_definitions_drops_stale_forced() {
    let (harness, foo_server, _) = two_servers();
    let registry = harness.registry(&[foo(), bar()]);
    let (document, _) = harness.document("x.txt", "");
    let uri = document.uri.clone();

    registry.force_association(document, foo()).await;
    assert!(wait_until(|| foo_server.calls("textDocument/didOpen") == 1).await);

    registry.set_definitions(vec![bar()]).await;
    assert!(registry.forced_associations().is_empty());
    assert!(registry.wrapper_for(&uri).is_none());
}

/// A change to an open file is a save for its own server and a watched-file event for
/// the others.
#[tokio::test]
async fn test_file_changed() {
    let (harness, foo_server, bar_server) = two_servers();
    let registry = harness.registry(&[foo(), bar()]);
    let (a, _) = harness.document("a.foo", "");
    let (b, _) = harness.document("b.bar", "");
    let a_uri = a.uri.clone();

    registry.document_opened(a).await;
    registry.document_opened(b).await;
    assert!(wait_until(|| bar_server.calls("textDocument/didOpen") == 1).await);
    assert!(wait_until(|| foo_server.calls("textDocument/didOpen") == 1).await);

    registry.file_changed(&a_uri, FileChangeType::CHANGED).await;
    assert!(wait_until(|| foo_server.calls("textDocument/didSave") == 1).await);
    assert!(wait_until(|| bar_server.calls("workspace/didChangeWatchedFiles") == 1).await);

    let event = &bar_server.params("workspace/didChangeWatchedFiles")[0]["changes"][0];
    assert_eq!(event["uri"], a_uri.as_str());
    assert_eq!(event["type"], 2);

    registry.shutdown().await;
    assert_eq!(foo_server.calls("workspace/didChangeWatchedFiles"), 0);
    assert!(registry.wrappers().is_empty());
}

/// Symbol search spans the started servers of a root and filters by kind.
#[tokio::test]
async fn test_workspace_symbols() {
    let server = FakeServer::new(json!({ "workspaceSymbolProvider": true }));
    let harness = Harness::new(server.clone());
    let registry = harness.registry(&[foo()]);
    let (document, _) = harness.document("a.foo", "");
    let uri = document.uri.clone();
    server.set_response(
        "workspace/symbol",
        json!([
            {
                "name": "main",
                "kind": 12,
                "location": {
                    "uri": uri.as_str(),
                    "range": { "start": { "line": 2, "character": 0 }, "end": { "line": 4, "character": 1 } }
                }
            },
            {
                "name": "Config",
                "kind": 23,
                "containerName": "settings",
                "location": {
                    "uri": uri.as_str(),
                    "range": { "start": { "line": 8, "character": 0 }, "end": { "line": 9, "character": 0 } }
                }
            }
        ]),
    );

    registry.document_opened(document).await;
    let wrapper = registry.wrapper_for(&uri).unwrap();
    assert!(wait_for_status(&wrapper, ServerStatus::Started).await);

    let root = harness.project.path();
    let all = registry.workspace_symbols(root, "m", &[]).await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].name, "main");
    assert_eq!(all[0].server, "foo-ls");
    assert_eq!(all[1].container_name.as_deref(), Some("settings"));

    let functions = registry
        .workspace_symbols(root, "m", &[SymbolKind::FUNCTION])
        .await;
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0].range.unwrap().start.line, 2);

    let elsewhere = registry
        .workspace_symbols(std::path::Path::new("/elsewhere"), "m", &[])
        .await;
    assert!(elsewhere.is_empty());
    assert_eq!(server.calls("workspace/symbol"), 2);
}
