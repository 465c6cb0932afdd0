//! Hover and signature rendering.

use lsp_types::{Documentation, Hover, HoverContents, MarkedString, MarkupKind, SignatureHelp};

/// Approximate width of a wrapped plain-text block.
const BLOCK_WIDTH: usize = 100;

/// Rendered text and whether it is markdown.
pub fn hover_text(hover: &Hover) -> (String, bool) {
    match &hover.contents {
        HoverContents::Scalar(marked) => render_marked(marked),
        HoverContents::Array(items) => {
            let rendered: Vec<(String, bool)> = items
                .iter()
                .map(render_marked)
                .filter(|(s, _)| !s.is_empty())
                .collect();
            let markdown = rendered.iter().any(|(_, md)| *md);
            let text = rendered
                .into_iter()
                .map(|(s, _)| s)
                .collect::<Vec<_>>()
                .join("\n\n");
            (text, markdown)
        }
        HoverContents::Markup(markup) => match markup.kind {
            MarkupKind::Markdown => (markup.value.clone(), true),
            MarkupKind::PlainText => (wrap_plain(&markup.value), false),
        },
    }
}

fn render_marked(marked: &MarkedString) -> (String, bool) {
    match marked {
        MarkedString::String(s) => (wrap_plain(s), false),
        MarkedString::LanguageString(ls) if ls.language.is_empty() => (ls.value.clone(), true),
        MarkedString::LanguageString(ls) => {
            (format!("```{}\n{}\n```", ls.language, ls.value), true)
        }
    }
}

/// Wrap plain text into blocks of roughly [`BLOCK_WIDTH`] characters.
///
/// Each line is split into sentences; sentences accumulate into a block until it grows
/// past the width. Blocks are joined by newlines.
pub fn wrap_plain(text: &str) -> String {
    let mut blocks = Vec::new();
    for line in text.split('\n') {
        let mut block = String::new();
        let mut count = 0;
        for sentence in sentences(line) {
            block.push_str(sentence);
            count += sentence.chars().count();
            if count > BLOCK_WIDTH {
                blocks.push(std::mem::take(&mut block).trim().to_string());
                count = 0;
            }
        }
        if !block.is_empty() || line.is_empty() {
            blocks.push(block.trim().to_string());
        }
    }
    blocks.join("\n")
}

/// Split after every `. `, keeping the period and space with the sentence.
fn sentences(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = line;
    while let Some(i) = rest.find(". ") {
        parts.push(&rest[..i + 2]);
        rest = &rest[i + 2..];
    }
    if !rest.is_empty() {
        parts.push(rest);
    }
    parts
}

/// Label of the active signature, with its documentation when plain.
pub fn signature_label(help: &SignatureHelp) -> Option<String> {
    let index = help.active_signature.unwrap_or(0) as usize;
    let signature = help
        .signatures
        .get(index)
        .or_else(|| help.signatures.first())?;
    let mut label = signature.label.clone();
    match &signature.documentation {
        Some(Documentation::String(doc)) if !doc.is_empty() => {
            label.push('\n');
            label.push_str(doc);
        }
        Some(Documentation::MarkupContent(doc)) if !doc.value.is_empty() => {
            label.push('\n');
            label.push_str(&doc.value);
        }
        _ => {}
    }
    Some(label)
}
