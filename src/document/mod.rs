//! Document text, edit tracking and coordinate utilities.
//!
//! This module provides:
//! - `EditLog` and `OffsetMapper` for translating offsets between revisions
//! - `DocumentBuffer` for the live text of every open document
//! - `LineIndex` for byte offset <-> LSP position conversion

mod buffer;
mod edit;
mod text;

pub use buffer::{BuildInput, Document, DocumentBuffer, DocumentState};
pub use edit::{Edit, EditLog, Mapped, OffsetMapper, TextRange};
pub use text::LineIndex;
