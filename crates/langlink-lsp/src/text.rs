//! Conversions between editor byte offsets and protocol positions.
//!
//! Protocol columns count UTF-16 code units, so every conversion re-measures the text of
//! the line prefix instead of trusting byte or char counts.

use lsp_types::{Position, Range, TextDocumentContentChangeEvent};

/// Number of UTF-16 code units in `text`.
pub fn utf16_len(text: &str) -> u32 {
    text.encode_utf16().count() as u32
}

/// Clamp `offset` to the text and move it back to a char boundary.
pub fn clamp_offset(text: &str, offset: usize) -> usize {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

/// Protocol position of a byte offset.
pub fn offset_to_position(text: &str, offset: usize) -> Position {
    let offset = clamp_offset(text, offset);
    let before = &text[..offset];
    let line = before.matches('\n').count() as u32;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    Position {
        line,
        character: utf16_len(&before[line_start..]),
    }
}

/// Byte offset of a protocol position.
///
/// Lines past the end clamp to the last line and columns past the end of a line clamp to
/// the line end.
pub fn position_to_offset(text: &str, position: Position) -> usize {
    let mut line_start = 0;
    let mut remaining = position.line;
    while remaining > 0 {
        match text[line_start..].find('\n') {
            Some(i) => line_start += i + 1,
            None => break,
        }
        remaining -= 1;
    }

    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |i| line_start + i);

    let mut units = 0u32;
    for (i, ch) in text[line_start..line_end].char_indices() {
        if units >= position.character {
            return line_start + i;
        }
        units += ch.len_utf16() as u32;
    }
    line_end
}

/// Byte offsets covered by a protocol range, ordered.
pub fn range_to_offsets(text: &str, range: Range) -> (usize, usize) {
    let start = position_to_offset(text, range.start);
    let end = position_to_offset(text, range.end);
    (start.min(end), start.max(end))
}

/// Protocol range of a pair of byte offsets.
pub fn offsets_to_range(text: &str, start: usize, end: usize) -> Range {
    Range {
        start: offset_to_position(text, start),
        end: offset_to_position(text, end),
    }
}

fn is_token_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Expand an offset to the maximal run of alphanumeric/underscore characters around it.
pub fn expand_to_token(text: &str, offset: usize) -> (usize, usize) {
    let offset = clamp_offset(text, offset);
    let start = text[..offset]
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_token_char(*c))
        .last()
        .map_or(offset, |(i, _)| i);
    let end = text[offset..]
        .char_indices()
        .find(|(_, c)| !is_token_char(*c))
        .map_or(text.len(), |(i, _)| offset + i);
    (start, end)
}

/// Range of the text replaced by an edit, computed from the text after the edit.
///
/// `offset` is where the edit starts and `old_text` is what it removed. The start is
/// measured in the new text (everything before `offset` is unchanged). The end line
/// advances by the number of removed newlines. The end column is:
/// - `0` when the removed text ends with a newline,
/// - `start column + removed length` when nothing spanning a newline was removed,
/// - the length of the removed text's last line otherwise.
pub fn replaced_range(new_text: &str, offset: usize, old_text: &str) -> Range {
    let start = offset_to_position(new_text, offset);
    if old_text.is_empty() {
        return Range { start, end: start };
    }

    let newlines = old_text.matches('\n').count() as u32;
    let last_line = old_text.rsplit('\n').next().unwrap_or_default();
    let character = if old_text.ends_with('\n') {
        0
    } else if newlines == 0 {
        start.character + utf16_len(old_text)
    } else {
        utf16_len(last_line)
    };

    Range {
        start,
        end: Position {
            line: start.line + newlines,
            character,
        },
    }
}

/// One editor-side change: `old_text` at `offset` was replaced by `new_text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
    pub offset: usize,
    pub old_text: String,
    pub new_text: String,
}

impl TextChange {
    pub fn new(offset: usize, old_text: impl Into<String>, new_text: impl Into<String>) -> Self {
        Self {
            offset,
            old_text: old_text.into(),
            new_text: new_text.into(),
        }
    }

    /// Incremental content change event, given the document text after the change.
    pub fn to_incremental_event(&self, document_after: &str) -> TextDocumentContentChangeEvent {
        #[allow(deprecated)]
        let event = TextDocumentContentChangeEvent {
            range: Some(replaced_range(document_after, self.offset, &self.old_text)),
            range_length: Some(utf16_len(&self.old_text)),
            text: self.new_text.clone(),
        };
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    #[test]
    fn test_offset_to_position() {
        let text = "abc\ndef\n";
        assert_eq!(offset_to_position(text, 0), pos(0, 0));
        assert_eq!(offset_to_position(text, 2), pos(0, 2));
        assert_eq!(offset_to_position(text, 4), pos(1, 0));
        assert_eq!(offset_to_position(text, 8), pos(2, 0));
        assert_eq!(offset_to_position(text, 100), pos(2, 0));
    }

    #[test]
    fn test_utf16_columns() {
        // 'é' is one UTF-16 unit but two bytes; '𝄞' is two units and four bytes.
        let text = "é𝄞x";
        assert_eq!(offset_to_position(text, 2), pos(0, 1));
        assert_eq!(offset_to_position(text, 6), pos(0, 3));
        assert_eq!(position_to_offset(text, pos(0, 3)), 6);
        assert_eq!(position_to_offset(text, pos(0, 1)), 2);
    }

    #[test]
    fn test_position_to_offset_clamps() {
        let text = "ab\ncd";
        assert_eq!(position_to_offset(text, pos(1, 1)), 4);
        assert_eq!(position_to_offset(text, pos(0, 10)), 2);
        assert_eq!(position_to_offset(text, pos(9, 0)), 3);
        assert_eq!(position_to_offset(text, pos(9, 9)), 5);
    }

    #[test]
    fn test_expand_to_token() {
        let text = "let foo_bar = baz;";
        assert_eq!(expand_to_token(text, 6), (4, 11));
        assert_eq!(expand_to_token(text, 4), (4, 11));
        assert_eq!(expand_to_token(text, 11), (4, 11));
        assert_eq!(expand_to_token(text, 12), (12, 12));
        assert_eq!(expand_to_token(text, 17), (14, 17));
    }

    #[test]
    fn test_replaced_range_multi_line_removal() {
        // "abc\ndef" -> "aXef": "bc\nd" removed at offset 1.
        let range = replaced_range("aXef", 1, "bc\nd");
        assert_eq!(range.start, pos(0, 1));
        assert_eq!(range.end, pos(1, 1));
    }

    #[test]
    fn test_replaced_range_single_line_removal() {
        // "hello world" -> "hello there"
        let range = replaced_range("hello there", 6, "world");
        assert_eq!(range, Range::new(pos(0, 6), pos(0, 11)));
    }

    #[test]
    fn test_replaced_range_trailing_newline() {
        // "one\ntwo\nthree" -> "one\nthree"
        let range = replaced_range("one\nthree", 4, "two\n");
        assert_eq!(range, Range::new(pos(1, 0), pos(2, 0)));
    }

    #[test]
    fn test_replaced_range_pure_insertion() {
        let range = replaced_range("abXc", 2, "");
        assert_eq!(range, Range::new(pos(0, 2), pos(0, 2)));
    }

    #[test]
    fn test_incremental_event() {
        let change = TextChange::new(1, "bc\nd", "X");
        let event = change.to_incremental_event("aXef");
        assert_eq!(event.text, "X");
        assert_eq!(event.range, Some(Range::new(pos(0, 1), pos(1, 1))));
        #[allow(deprecated)]
        let length = event.range_length;
        assert_eq!(length, Some(4));
    }
}
