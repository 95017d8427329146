//! Edit log and coordinate mapping between document revisions.
//!
//! Every change to a document is recorded as an [`Edit`] with a strictly
//! increasing sequence number. A snapshot built at sequence `base` speaks in
//! the coordinates of the text as it was after edit `base`; [`OffsetMapper`]
//! translates offsets and ranges between that text and any later (or earlier)
//! revision, reporting [`Mapped::Invalidated`] when a position has no
//! counterpart on the other side.

use std::ops::Range;
use std::sync::Arc;

/// A half-open byte range `[offset, offset + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextRange {
    pub offset: usize,
    pub length: usize,
}

impl TextRange {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// True if `offset` lies in `[start, end)`.
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.offset && offset < self.end()
    }

    pub fn as_range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}

impl From<Range<usize>> for TextRange {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end.saturating_sub(range.start))
    }
}

/// Result of translating a position across edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapped<T> {
    /// The position survives and lands here.
    Valid(T),
    /// The position was rewritten by an edit and has no counterpart.
    Invalidated,
}

impl<T> Mapped<T> {
    pub fn is_invalidated(&self) -> bool {
        matches!(self, Mapped::Invalidated)
    }
}

/// One recorded replacement: `deleted_len` bytes at `offset` were replaced by `inserted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub sequence: u64,
    pub offset: usize,
    pub deleted_len: usize,
    pub inserted: Arc<str>,
}

impl Edit {
    pub fn inserted_len(&self) -> usize {
        self.inserted.len()
    }

    /// Map a pre-edit offset to post-edit coordinates.
    fn forward(&self, pos: usize) -> Mapped<usize> {
        if pos < self.offset {
            Mapped::Valid(pos)
        } else if pos < self.offset + self.deleted_len {
            Mapped::Invalidated
        } else {
            Mapped::Valid(pos - self.deleted_len + self.inserted_len())
        }
    }

    /// Map a post-edit offset back to pre-edit coordinates.
    fn backward(&self, pos: usize) -> Mapped<usize> {
        if pos < self.offset {
            Mapped::Valid(pos)
        } else if pos < self.offset + self.inserted_len() {
            Mapped::Invalidated
        } else {
            Mapped::Valid(pos - self.inserted_len() + self.deleted_len)
        }
    }

    /// Does this edit rewrite any part of `range`, given in pre-edit coordinates?
    ///
    /// A pure insertion touches the range only when it lands strictly inside it.
    fn touches_before(&self, range: TextRange) -> bool {
        spans_overlap(self.offset, self.deleted_len, range)
    }

    /// Does this edit rewrite any part of `range`, given in post-edit coordinates?
    fn touches_after(&self, range: TextRange) -> bool {
        spans_overlap(self.offset, self.inserted_len(), range)
    }
}

fn spans_overlap(offset: usize, length: usize, range: TextRange) -> bool {
    if length == 0 {
        offset > range.offset && offset < range.end()
    } else {
        offset < range.end() && offset + length > range.offset
    }
}

/// Append-only log of a document's edits.
///
/// `edits[i].sequence == i`; edit 0 is the initial text.
#[derive(Debug, Clone, Default)]
pub struct EditLog {
    edits: Vec<Edit>,
}

impl EditLog {
    /// Start a log whose edit 0 inserts the whole initial text.
    pub fn with_initial_text(text: &str) -> Self {
        Self {
            edits: vec![Edit {
                sequence: 0,
                offset: 0,
                deleted_len: 0,
                inserted: Arc::from(text),
            }],
        }
    }

    /// Sequence number of the most recent edit.
    pub fn current_sequence(&self) -> u64 {
        self.edits.len().saturating_sub(1) as u64
    }

    /// Record a replacement and return its sequence number.
    pub fn record(&mut self, offset: usize, deleted_len: usize, inserted: &str) -> u64 {
        let sequence = self.edits.len() as u64;
        self.edits.push(Edit {
            sequence,
            offset,
            deleted_len,
            inserted: Arc::from(inserted),
        });
        sequence
    }

    /// Edits with sequence in `(after, through]`.
    pub fn between(&self, after: u64, through: u64) -> &[Edit] {
        let len = self.edits.len();
        let start = (after as usize).saturating_add(1).min(len);
        let end = (through as usize).saturating_add(1).min(len);
        if start >= end {
            &[]
        } else {
            &self.edits[start..end]
        }
    }

    pub fn get(&self, sequence: u64) -> Option<&Edit> {
        self.edits.get(sequence as usize)
    }

    /// Build a mapper from the text at `from` to the text at `to`.
    pub fn mapper(&self, from: u64, to: u64) -> OffsetMapper {
        let (lo, hi) = if from <= to { (from, to) } else { (to, from) };
        OffsetMapper {
            from,
            to,
            edits: self.between(lo, hi).to_vec(),
        }
    }
}

/// Translates offsets from the text at sequence `from` into the text at
/// sequence `to`, in either direction.
///
/// Holds its own copy of the relevant edits so it can be used without
/// holding any lock on the document.
#[derive(Debug, Clone)]
pub struct OffsetMapper {
    from: u64,
    to: u64,
    edits: Vec<Edit>,
}

impl OffsetMapper {
    fn is_forward(&self) -> bool {
        self.from <= self.to
    }

    /// Map a single offset.
    ///
    /// Forward, an offset inside a deleted span is invalidated; backward, an
    /// offset inside inserted text is invalidated.
    pub fn map_offset(&self, offset: usize) -> Mapped<usize> {
        let mut pos = offset;
        if self.is_forward() {
            for edit in &self.edits {
                match edit.forward(pos) {
                    Mapped::Valid(next) => pos = next,
                    Mapped::Invalidated => return Mapped::Invalidated,
                }
            }
        } else {
            for edit in self.edits.iter().rev() {
                match edit.backward(pos) {
                    Mapped::Valid(next) => pos = next,
                    Mapped::Invalidated => return Mapped::Invalidated,
                }
            }
        }
        Mapped::Valid(pos)
    }

    /// True if any edit between the two revisions textually overlaps `range`
    /// (given in `from` coordinates).
    pub fn range_invalidated(&self, range: TextRange) -> bool {
        self.map_range(range).is_invalidated()
    }

    /// Map a range whose text is untouched by every intervening edit.
    ///
    /// The length never changes; only the start moves.
    pub fn map_range(&self, range: TextRange) -> Mapped<TextRange> {
        let mut current = range;
        let forward = self.is_forward();
        let step = |edit: &Edit, current: TextRange| -> Mapped<TextRange> {
            let (touched, start) = if forward {
                (edit.touches_before(current), edit.forward(current.offset))
            } else {
                (edit.touches_after(current), edit.backward(current.offset))
            };
            match (touched, start) {
                (false, Mapped::Valid(offset)) => Mapped::Valid(TextRange::new(offset, current.length)),
                _ => Mapped::Invalidated,
            }
        };

        if forward {
            for edit in &self.edits {
                match step(edit, current) {
                    Mapped::Valid(next) => current = next,
                    Mapped::Invalidated => return Mapped::Invalidated,
                }
            }
        } else {
            for edit in self.edits.iter().rev() {
                match step(edit, current) {
                    Mapped::Valid(next) => current = next,
                    Mapped::Invalidated => return Mapped::Invalidated,
                }
            }
        }
        Mapped::Valid(current)
    }

    /// The mapper for the opposite direction.
    pub fn inverse(&self) -> OffsetMapper {
        OffsetMapper {
            from: self.to,
            to: self.from,
            edits: self.edits.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(initial: &str, edits: &[(usize, usize, &str)]) -> EditLog {
        let mut log = EditLog::with_initial_text(initial);
        for (offset, len, text) in edits {
            log.record(*offset, *len, text);
        }
        log
    }

    #[test]
    fn offsets_before_an_edit_are_unchanged() {
        let log = log("let foo = 0\n", &[(10, 1, "[0:0]")]);
        let mapper = log.mapper(0, 1);
        assert_eq!(mapper.map_offset(4), Mapped::Valid(4));
        assert_eq!(mapper.map_offset(9), Mapped::Valid(9));
    }

    #[test]
    fn offsets_after_an_edit_shift_by_delta() {
        let log = log("let foo = 0\nlet x = foo\n", &[(10, 1, "[0:0]")]);
        let mapper = log.mapper(0, 1);
        // 'x' at 16 moves by 4
        assert_eq!(mapper.map_offset(16), Mapped::Valid(20));
        // end of the replaced span also shifts
        assert_eq!(mapper.map_offset(11), Mapped::Valid(15));
    }

    #[test]
    fn offsets_inside_a_deleted_span_are_invalidated() {
        let log = log("let foo = 0\n", &[(4, 3, "bar")]);
        let mapper = log.mapper(0, 1);
        assert!(mapper.map_offset(4).is_invalidated());
        assert!(mapper.map_offset(6).is_invalidated());
        assert_eq!(mapper.map_offset(7), Mapped::Valid(7));
    }

    #[test]
    fn insertion_at_offset_shifts_it() {
        let log = log("let foo = 0\n", &[(4, 0, " ")]);
        let mapper = log.mapper(0, 1);
        assert_eq!(mapper.map_offset(4), Mapped::Valid(5));
        assert_eq!(mapper.map_offset(3), Mapped::Valid(3));
    }

    #[test]
    fn backward_mapping_invalidates_inserted_text() {
        let log = log("let foo = 0\n", &[(4, 0, "  ")]);
        let mapper = log.mapper(1, 0);
        assert!(mapper.map_offset(4).is_invalidated());
        assert!(mapper.map_offset(5).is_invalidated());
        assert_eq!(mapper.map_offset(6), Mapped::Valid(4));
        assert_eq!(mapper.map_offset(2), Mapped::Valid(2));
    }

    #[test]
    fn backward_mapping_over_replacement() {
        // "foo" -> "fog" at offset 4..7: 'g' is new text
        let log = log("let foo = 0\n", &[(6, 1, "g")]);
        let mapper = log.mapper(1, 0);
        assert_eq!(mapper.map_offset(4), Mapped::Valid(4));
        assert!(mapper.map_offset(6).is_invalidated());
        assert_eq!(mapper.map_offset(7), Mapped::Valid(7));
    }

    #[test]
    fn forward_then_backward_is_identity_away_from_edits() {
        let log = log(
            "let value = foo\nlet foo = 0\n",
            &[(26, 1, "[0:0,0:0]"), (20, 0, " "), (0, 0, "\n")],
        );
        let forward = log.mapper(0, 3);
        let backward = forward.inverse();
        for offset in [0usize, 3, 4, 10, 12, 15, 16, 19, 20, 21, 25, 27, 28] {
            if let Mapped::Valid(mapped) = forward.map_offset(offset) {
                assert_eq!(backward.map_offset(mapped), Mapped::Valid(offset), "offset {offset}");
            }
        }
    }

    #[test]
    fn multiple_edits_compose_in_order() {
        let log = log("abcdef", &[(1, 1, "XX"), (0, 0, "__")]);
        // after edit 1: aXXcdef ; after edit 2: __aXXcdef
        let mapper = log.mapper(0, 2);
        assert_eq!(mapper.map_offset(0), Mapped::Valid(2));
        assert!(mapper.map_offset(1).is_invalidated());
        assert_eq!(mapper.map_offset(2), Mapped::Valid(5));
        let partial = log.mapper(1, 2);
        assert_eq!(partial.map_offset(1), Mapped::Valid(3));
    }

    #[test]
    fn range_touched_by_replacement_is_invalidated() {
        let log = log("let foo = 0\n", &[(4, 3, "foo")]);
        let mapper = log.mapper(0, 1);
        assert!(mapper.range_invalidated(TextRange::new(4, 3)));
        assert!(mapper.range_invalidated(TextRange::new(2, 3)));
        assert!(mapper.range_invalidated(TextRange::new(6, 4)));
        assert!(!mapper.range_invalidated(TextRange::new(0, 4)));
        assert!(!mapper.range_invalidated(TextRange::new(7, 3)));
    }

    #[test]
    fn insertion_at_range_edges_does_not_invalidate() {
        let log = log("let foo = 0\n", &[(4, 0, " "), (8, 0, "!")]);
        // edit 2 is in post-edit-1 coordinates: right after "foo" (5..8)
        let mapper = log.mapper(0, 2);
        assert_eq!(mapper.map_range(TextRange::new(4, 3)), Mapped::Valid(TextRange::new(5, 3)));
    }

    #[test]
    fn insertion_strictly_inside_range_invalidates() {
        let log = log("let foo = 0\n", &[(5, 0, "x")]);
        let mapper = log.mapper(0, 1);
        assert!(mapper.range_invalidated(TextRange::new(4, 3)));
    }

    #[test]
    fn backward_range_mapping_checks_inserted_text() {
        let log = log("let foo = 0\n", &[(10, 1, "[0:0]")]);
        let back = log.mapper(1, 0);
        assert_eq!(back.map_range(TextRange::new(4, 3)), Mapped::Valid(TextRange::new(4, 3)));
        assert!(back.range_invalidated(TextRange::new(10, 5)));
        // pure deletion strictly inside a post-edit range
        let log = log_with_delete();
        let back = log.mapper(1, 0);
        assert!(back.range_invalidated(TextRange::new(0, 4)));
    }

    fn log_with_delete() -> EditLog {
        log("abcdef", &[(2, 2, "")])
    }

    #[test]
    fn between_selects_half_open_window() {
        let log = log("a", &[(0, 0, "b"), (0, 0, "c"), (0, 0, "d")]);
        let seqs: Vec<_> = log.between(1, 3).iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert!(log.between(3, 3).is_empty());
        assert!(log.between(5, 9).is_empty());
        assert_eq!(log.current_sequence(), 3);
    }
}
