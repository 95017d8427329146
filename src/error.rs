//! Error types for edits, queries and analyzer builds.

use thiserror::Error;

/// Errors returned when applying an edit to an open document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    /// The document was never opened, or has been closed.
    #[error("document '{0}' is not open")]
    UnknownDocument(String),

    /// `offset + length` runs past the end of the current text.
    #[error("edit {offset}+{length} is out of range for text of length {len}")]
    OutOfRange {
        /// Start of the replaced span.
        offset: usize,
        /// Length of the replaced span.
        length: usize,
        /// Length of the document text at the time of the edit.
        len: usize,
    },

    /// An edit boundary falls inside a multi-byte character.
    #[error("edit boundary {0} is not on a character boundary")]
    NotCharBoundary(usize),
}

/// Record of a failed Analyzer invocation.
///
/// The previously published snapshot (if any) stays in place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("analysis of '{document}' at sequence {sequence} failed: {message}")]
pub struct BuildFailure {
    /// Document the build was for.
    pub document: String,
    /// Edit sequence the failed build captured.
    pub sequence: u64,
    /// Message reported by the analyzer.
    pub message: String,
}

/// Error returned by an [`Analyzer`](crate::Analyzer) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AnalyzerError {
    /// Human-readable reason.
    pub message: String,
}

impl AnalyzerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome of a query that could not produce an occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The document was never opened.
    #[error("document '{0}' is not open")]
    UnknownDocument(String),

    /// The document was closed while the query was waiting.
    #[error("document '{0}' was closed")]
    Closed(String),

    /// No symbol resolves at the requested offset.
    #[error("no symbol at the requested offset")]
    NotFound,

    /// The deadline passed while waiting for a fresh snapshot.
    #[error("timed out waiting for analysis")]
    Timeout,

    /// The caller stopped waiting before the query resolved.
    #[error("query was cancelled")]
    Cancelled,

    /// The analysis this query depended on failed, either with no snapshot
    /// to fall back on or again on retry.
    #[error(transparent)]
    BuildFailure(#[from] BuildFailure),
}
