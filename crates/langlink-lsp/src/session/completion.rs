//! Completion items converted into insertable entries.

use super::snippet::Snippet;
use lsp_types::{
    Command, CompletionItem, CompletionItemKind, CompletionResponse, CompletionTextEdit,
    InsertTextFormat, TextEdit,
};

/// How an entry inserts its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionShape {
    /// A main edit only.
    TextEdit,
    /// A main edit plus additional edits elsewhere in the document.
    TextEditWithAdditional,
    /// Insert text (or the label) at the caret plus additional edits.
    InsertWithAdditional,
    /// Insert text (or the label) at the caret.
    Bare,
}

/// One completion choice, ready to apply.
#[derive(Debug, Clone)]
pub struct CompletionEntry {
    pub label: String,
    pub detail: Option<String>,
    pub kind: Option<CompletionItemKind>,
    pub sort_text: Option<String>,
    pub filter_text: Option<String>,
    pub shape: CompletionShape,
    /// Main edit, for the text-edit shapes.
    pub edit: Option<TextEdit>,
    /// Text inserted at the caret, for the other shapes.
    pub insert_text: String,
    /// Parsed template when the item is a snippet.
    pub snippet: Option<Snippet>,
    pub additional_edits: Vec<TextEdit>,
    /// Run after the entry is applied.
    pub command: Option<Command>,
    /// The server item, kept for `completionItem/resolve`.
    pub item: CompletionItem,
}

impl CompletionEntry {
    pub fn from_item(item: CompletionItem) -> Self {
        let edit = item.text_edit.as_ref().map(|e| match e {
            CompletionTextEdit::Edit(edit) => edit.clone(),
            CompletionTextEdit::InsertAndReplace(edit) => TextEdit {
                range: edit.insert,
                new_text: edit.new_text.clone(),
            },
        });
        let additional_edits = item.additional_text_edits.clone().unwrap_or_default();
        let insert_text = item
            .insert_text
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| item.label.clone());

        let shape = match (&edit, additional_edits.is_empty()) {
            (Some(_), true) => CompletionShape::TextEdit,
            (Some(_), false) => CompletionShape::TextEditWithAdditional,
            (None, false) => CompletionShape::InsertWithAdditional,
            (None, true) => CompletionShape::Bare,
        };

        let snippet = (item.insert_text_format == Some(InsertTextFormat::SNIPPET)).then(|| {
            let template = edit.as_ref().map_or(insert_text.as_str(), |e| e.new_text.as_str());
            Snippet::parse(template)
        });

        Self {
            label: item.label.clone(),
            detail: item.detail.clone(),
            kind: item.kind,
            sort_text: item.sort_text.clone(),
            filter_text: item.filter_text.clone(),
            shape,
            edit,
            insert_text,
            snippet,
            additional_edits,
            command: item.command.clone(),
            item,
        }
    }

    /// Text the entry shows and filters by.
    pub fn lookup_string(&self) -> &str {
        self.filter_text.as_deref().unwrap_or(&self.label)
    }
}

/// Flatten a completion response into entries.
pub fn entries(response: CompletionResponse) -> Vec<CompletionEntry> {
    let items = match response {
        CompletionResponse::Array(items) => items,
        CompletionResponse::List(list) => list.items,
    };
    items.into_iter().map(CompletionEntry::from_item).collect()
}
