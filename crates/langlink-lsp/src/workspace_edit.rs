//! Applying server workspace edits to open documents.

use crate::context::DocumentIndex;
use crate::session::DocumentSession;
use lsp_types::{
    DocumentChangeOperation, DocumentChanges, OneOf, TextDocumentEdit, TextEdit, WorkspaceEdit,
};
use std::sync::Arc;
use tracing::{debug, warn};

struct Target {
    session: Arc<DocumentSession>,
    version: Option<i32>,
    edits: Vec<TextEdit>,
}

/// Apply `edit` to the open documents in `documents`.
///
/// All or nothing: if any target document is not open or already past the edit's
/// version, or the edit carries a resource operation (create, rename, delete), nothing is
/// applied and `false` is returned.
pub async fn apply(documents: &DocumentIndex, edit: &WorkspaceEdit) -> bool {
    let Some(targets) = collect(documents, edit) else {
        return false;
    };
    for target in &targets {
        let Some(version) = target.version else {
            continue;
        };
        let current = target.session.version().await;
        if version < current {
            warn!(
                uri = %target.session.uri().as_str(),
                version,
                current,
                "Workspace edit targets an older document version"
            );
            return false;
        }
    }

    let mut applied = true;
    for target in targets {
        debug!(
            uri = %target.session.uri().as_str(),
            edits = target.edits.len(),
            "Applying workspace edit"
        );
        applied &= target.session.apply_edits(target.edits, target.version).await;
    }
    applied
}

fn collect(documents: &DocumentIndex, edit: &WorkspaceEdit) -> Option<Vec<Target>> {
    let mut targets = Vec::new();

    if let Some(changes) = &edit.document_changes {
        let document_edits: Vec<&TextDocumentEdit> = match changes {
            DocumentChanges::Edits(edits) => edits.iter().collect(),
            DocumentChanges::Operations(operations) => {
                let mut edits = Vec::with_capacity(operations.len());
                for operation in operations {
                    match operation {
                        DocumentChangeOperation::Edit(edit) => edits.push(edit),
                        DocumentChangeOperation::Op(op) => {
                            warn!(operation = ?op, "Resource operations are not supported");
                            return None;
                        }
                    }
                }
                edits
            }
        };
        for document_edit in document_edits {
            let uri = &document_edit.text_document.uri;
            let Some(session) = documents.session(uri) else {
                warn!(uri = %uri.as_str(), "Workspace edit targets a document that is not open");
                return None;
            };
            targets.push(Target {
                session,
                version: document_edit.text_document.version,
                edits: document_edit
                    .edits
                    .iter()
                    .map(|e| match e {
                        OneOf::Left(edit) => edit.clone(),
                        OneOf::Right(annotated) => annotated.text_edit.clone(),
                    })
                    .collect(),
            });
        }
    } else if let Some(changes) = &edit.changes {
        for (uri, edits) in changes {
            let Some(session) = documents.session(uri) else {
                warn!(uri = %uri.as_str(), "Workspace edit targets a document that is not open");
                return None;
            };
            targets.push(Target {
                session,
                version: None,
                edits: edits.clone(),
            });
        }
    }

    Some(targets)
}
