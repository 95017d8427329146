//! LSP protocol feature implementations.
//!
//! This module provides:
//! - Diagnostics conversion from snapshot diagnostics
//! - Hover rendering of a resolved occurrence
//! - Incremental content-change conversion

mod diagnostics;
mod hover;
mod sync;

pub use diagnostics::to_diagnostics;
pub use hover::hover_for_occurrence;
pub use sync::{to_text_change, TextChange};
