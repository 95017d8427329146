//! Byte offset <-> LSP position conversion.
//!
//! LSP columns count UTF-16 code units; the engine works in byte offsets.

use std::ops::Range;

use tower_lsp::lsp_types::{self, Position};

/// Line start table for one revision of a document's text.
#[derive(Debug, Clone)]
pub struct LineIndex {
    text: String,
    /// Byte offset of the first character of every line.
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { text, line_starts }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    fn line_span(&self, line: usize) -> Range<usize> {
        let start = self.line_starts[line];
        let end = self
            .line_starts
            .get(line + 1)
            .map(|next| next - 1)
            .unwrap_or(self.text.len());
        start..end
    }

    /// Position of a byte offset. Offsets past the end clamp to the end.
    pub fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());
        let line = self.line_starts.partition_point(|start| *start <= offset) - 1;
        let start = self.line_starts[line];
        let character: usize = self.text[start..]
            .char_indices()
            .take_while(|(i, _)| start + i < offset)
            .map(|(_, c)| c.len_utf16())
            .sum();
        Position::new(line as u32, character as u32)
    }

    /// Byte offset of a position, or `None` if the line does not exist.
    ///
    /// A column past the end of its line resolves to the end of that line.
    pub fn offset(&self, position: Position) -> Option<usize> {
        let line = position.line as usize;
        if line >= self.line_starts.len() {
            return None;
        }
        let span = self.line_span(line);
        let mut units = 0u32;
        for (i, c) in self.text[span.clone()].char_indices() {
            if units >= position.character {
                return Some(span.start + i);
            }
            units += c.len_utf16() as u32;
        }
        Some(span.end)
    }

    /// Byte span of an LSP range.
    pub fn span(&self, range: lsp_types::Range) -> Option<Range<usize>> {
        let start = self.offset(range.start)?;
        let end = self.offset(range.end)?;
        (start <= end).then_some(start..end)
    }

    /// LSP range of a byte span.
    pub fn range(&self, span: Range<usize>) -> lsp_types::Range {
        lsp_types::Range::new(self.position(span.start), self.position(span.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_on_multiple_lines() {
        let idx = LineIndex::new("let foo = 0\nlet value = foo\n");
        assert_eq!(idx.position(0), Position::new(0, 0));
        assert_eq!(idx.position(4), Position::new(0, 4));
        assert_eq!(idx.position(11), Position::new(0, 11));
        assert_eq!(idx.position(12), Position::new(1, 0));
        assert_eq!(idx.position(24), Position::new(1, 12));
        assert_eq!(idx.position(28), Position::new(2, 0));
    }

    #[test]
    fn offsets_on_multiple_lines() {
        let idx = LineIndex::new("let foo = 0\nlet value = foo\n");
        assert_eq!(idx.offset(Position::new(0, 4)), Some(4));
        assert_eq!(idx.offset(Position::new(1, 12)), Some(24));
        // past end of line clamps to the newline
        assert_eq!(idx.offset(Position::new(0, 40)), Some(11));
        assert_eq!(idx.offset(Position::new(2, 0)), Some(28));
        assert_eq!(idx.offset(Position::new(3, 0)), None);
    }

    #[test]
    fn utf16_columns() {
        // the emoji is 4 bytes and 2 UTF-16 units
        let idx = LineIndex::new("a😀b");
        assert_eq!(idx.position(5), Position::new(0, 3));
        assert_eq!(idx.offset(Position::new(0, 3)), Some(5));
        assert_eq!(idx.offset(Position::new(0, 1)), Some(1));
    }

    #[test]
    fn span_and_range_round_trip() {
        let idx = LineIndex::new("let foo = 0\nlet value = foo\n");
        let range = idx.range(24..27);
        assert_eq!(range.start, Position::new(1, 12));
        assert_eq!(range.end, Position::new(1, 15));
        assert_eq!(idx.span(range), Some(24..27));
    }
}
