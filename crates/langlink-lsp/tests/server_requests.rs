//! Server-to-client traffic integration tests.
//!
//! Configuration queries, workspace edits, capability registration and messages sent by
//! a running server.

use langlink_lsp::config::GLOBAL_SCOPE;
use langlink_lsp::host::path_to_uri;
use langlink_lsp::lsp_types::{FileChangeType, MessageType};
use langlink_lsp::{DocumentBuffer, ServerStatus, ServerWrapper, TextChange};
use langlink_test_utils::{wait_for_status, wait_until, FakeServer, Harness};
use serde_json::json;
use std::sync::Arc;

async fn started(harness: &Harness, server: &FakeServer) -> Arc<ServerWrapper> {
    let wrapper = harness.wrapper(Harness::definition("foo"));
    let (document, _buffer) = harness.document("a.foo", "");
    wrapper.connect(document).await;
    assert!(wait_for_status(&wrapper, ServerStatus::Started).await);
    assert!(wait_until(|| server.calls("textDocument/didOpen") == 1).await);
    wrapper
}

/// Configuration items are answered per section from the workspace settings.
#[tokio::test]
async fn test_workspace_configuration() {
    let server = FakeServer::new(json!({}));
    let harness = Harness::new(server.clone());
    harness
        .config
        .set_settings("foo", json!({ "foo.a": 1, "foo.b": { "c": 2 }, "food": true }));
    let _wrapper = started(&harness, &server).await;

    let answer = server
        .request(
            "workspace/configuration",
            json!({ "items": [{ "section": "foo" }, { "section": "foo.b" }, { "section": "missing" }] }),
        )
        .await
        .unwrap();

    assert_eq!(
        answer,
        json!([{ "a": 1, "b": { "c": 2 } }, { "c": 2 }, null])
    );
}

/// Workspace edits apply to open documents; an edit to a closed document applies nothing.
#[tokio::test]
async fn test_apply_edit() {
    let server = FakeServer::new(json!({ "textDocumentSync": 1 }));
    let harness = Harness::new(server.clone());
    let wrapper = harness.wrapper(Harness::definition("foo"));
    let (document, buffer) = harness.document("a.foo", "hello world");
    let uri = document.uri.clone();
    wrapper.connect(document).await;
    assert!(wait_until(|| server.calls("textDocument/didOpen") == 1).await);

    let edit = |uri: &str| {
        json!({
            "edit": {
                "changes": {
                    uri: [{
                        "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 5 } },
                        "newText": "HELLO"
                    }]
                }
            }
        })
    };

    let applied = server
        .request("workspace/applyEdit", edit(uri.as_str()))
        .await
        .unwrap();
    assert_eq!(applied["applied"], true);
    assert_eq!(buffer.text(), "HELLO world");
    assert!(wait_until(|| server.calls("textDocument/didChange") == 1).await);

    let closed = harness.project.path().join("closed.foo");
    let closed_uri = path_to_uri(&closed).unwrap();
    let refused = server
        .request("workspace/applyEdit", edit(closed_uri.as_str()))
        .await
        .unwrap();
    assert_eq!(refused["applied"], false);
    assert!(refused["failureReason"].is_string());
    assert_eq!(buffer.text(), "HELLO world");
}

/// A versioned edit spanning two documents applies nothing when one of them has moved on.
#[tokio::test]
async fn test_apply_edit_stale_version_is_atomic() {
    let server = FakeServer::new(json!({ "textDocumentSync": 1 }));
    let harness = Harness::new(server.clone());
    let wrapper = harness.wrapper(Harness::definition("foo"));
    let (a, a_buffer) = harness.document("a.foo", "alpha");
    let (b, b_buffer) = harness.document("b.foo", "beta");
    let (a_uri, b_uri) = (a.uri.clone(), b.uri.clone());
    wrapper.connect(a).await;
    wrapper.connect(b).await;
    assert!(wait_until(|| server.calls("textDocument/didOpen") == 2).await);

    b_buffer.replace(4, 4, "!");
    let b_session = wrapper.session(&b_uri).expect("b connected");
    b_session.document_changed(TextChange::new(4, "", "!")).await;
    assert_eq!(b_session.version().await, 1);

    let edit = |b_version: i32| {
        json!({
            "edit": {
                "documentChanges": [
                    {
                        "textDocument": { "uri": a_uri.as_str(), "version": 0 },
                        "edits": [{
                            "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 1 } },
                            "newText": "A"
                        }]
                    },
                    {
                        "textDocument": { "uri": b_uri.as_str(), "version": b_version },
                        "edits": [{
                            "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 1 } },
                            "newText": "B"
                        }]
                    }
                ]
            }
        })
    };

    let refused = server.request("workspace/applyEdit", edit(0)).await.unwrap();
    assert_eq!(refused["applied"], false);
    assert_eq!(a_buffer.text(), "alpha");
    assert_eq!(b_buffer.text(), "beta!");

    let applied = server.request("workspace/applyEdit", edit(1)).await.unwrap();
    assert_eq!(applied["applied"], true);
    assert_eq!(a_buffer.text(), "Alpha");
    assert_eq!(b_buffer.text(), "Beta!");
}

/// A watched-files registration filters file events by pattern and kind.
#[tokio::test]
async fn test_watched_files_registration() {
    let server = FakeServer::new(json!({}));
    let harness = Harness::new(server.clone());
    let wrapper = started(&harness, &server).await;
    let conf = path_to_uri(&harness.project.path().join("x.conf")).unwrap();
    let other = path_to_uri(&harness.project.path().join("y.txt")).unwrap();

    // Everything goes through before any registration
    wrapper.did_change_watched_files(&other, FileChangeType::CREATED).await;
    assert!(wait_until(|| server.calls("workspace/didChangeWatchedFiles") == 1).await);

    let registered = server
        .request(
            "client/registerCapability",
            json!({
                "registrations": [{
                    "id": "watch-1",
                    "method": "workspace/didChangeWatchedFiles",
                    "registerOptions": { "watchers": [{ "globPattern": "*.conf", "kind": 6 }] }
                }]
            }),
        )
        .await;
    assert_eq!(registered, Some(json!(null)));

    wrapper.did_change_watched_files(&conf, FileChangeType::CREATED).await;
    wrapper.did_change_watched_files(&other, FileChangeType::CHANGED).await;
    wrapper.did_change_watched_files(&conf, FileChangeType::CHANGED).await;
    assert!(wait_until(|| server.calls("workspace/didChangeWatchedFiles") == 2).await);
    let forwarded = &server.params("workspace/didChangeWatchedFiles")[1]["changes"][0];
    assert_eq!(forwarded["uri"], conf.as_str());
    assert_eq!(forwarded["type"], 2);

    server
        .request(
            "client/unregisterCapability",
            json!({ "unregisterations": [{ "id": "watch-1", "method": "workspace/didChangeWatchedFiles" }] }),
        )
        .await;
    wrapper.did_change_watched_files(&other, FileChangeType::CHANGED).await;
    assert!(wait_until(|| server.calls("workspace/didChangeWatchedFiles") == 3).await);

    wrapper.stop().await;
    assert_eq!(server.calls("workspace/didChangeWatchedFiles"), 3);
}

/// Touching the settings file reloads the settings and pushes them again.
#[tokio::test]
async fn test_settings_file_reload() {
    let server = FakeServer::new(json!({}));
    let harness = Harness::new(server.clone());
    let settings_file = harness.project.write(".lsp/foo.json", "{}");
    harness.config.set_settings_path("foo", settings_file.clone());
    harness.config.set_settings("foo", json!({ "foo.level": 1 }));
    let wrapper = started(&harness, &server).await;
    assert!(wait_until(|| server.calls("workspace/didChangeConfiguration") == 1).await);

    harness.config.set_settings("foo", json!({ "foo.level": 2 }));
    let uri = path_to_uri(&settings_file).unwrap();
    wrapper.did_change_watched_files(&uri, FileChangeType::CHANGED).await;

    assert!(wait_until(|| server.calls("workspace/didChangeConfiguration") == 2).await);
    let pushed = &server.params("workspace/didChangeConfiguration")[1];
    assert_eq!(pushed["settings"]["foo"]["level"], 2);
    assert_eq!(wrapper.settings().section("foo.level", GLOBAL_SCOPE), json!(2));
}

/// Messages from the server reach the sink.
#[tokio::test]
async fn test_show_message() {
    let server = FakeServer::new(json!({}));
    let harness = Harness::new(server.clone());
    let _wrapper = started(&harness, &server).await;

    assert!(server.notify(
        "window/showMessage",
        json!({ "type": 2, "message": "indexing is slow" })
    ));
    assert!(wait_until(|| !harness.sink.messages().is_empty()).await);
    assert_eq!(
        harness.sink.messages(),
        vec![(MessageType::WARNING, "indexing is slow".to_string())]
    );

    let answer = server
        .request(
            "window/showMessageRequest",
            json!({ "type": 1, "message": "restart needed" }),
        )
        .await;
    assert_eq!(answer, Some(json!(null)));
    assert_eq!(harness.sink.messages().len(), 2);
}
