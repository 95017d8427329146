//! Incremental text sync: LSP content changes to byte-offset edits.

use tower_lsp::lsp_types::TextDocumentContentChangeEvent;

use crate::document::LineIndex;

/// A change expressed the way `Engine::apply_edit` takes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange<'a> {
    pub offset: usize,
    pub length: usize,
    pub text: &'a str,
}

/// Resolve a content change against the text it applies to.
///
/// A change without a range replaces the whole text. Returns `None` if the
/// range does not exist in `line_index`.
pub fn to_text_change<'a>(
    line_index: &LineIndex,
    change: &'a TextDocumentContentChangeEvent,
) -> Option<TextChange<'a>> {
    let span = match change.range {
        Some(range) => line_index.span(range)?,
        None => 0..line_index.text().len(),
    };
    Some(TextChange {
        offset: span.start,
        length: span.len(),
        text: &change.text,
    })
}
