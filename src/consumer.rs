//! Editor-side observer of document processing.
//!
//! The engine asks a consumer a single question, whether it needs semantic
//! information, and otherwise just hands it [`EditorEvent`]s.

use crate::analyzer::AnalysisDiagnostic;
use crate::error::BuildFailure;

/// Something the editor may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    /// Text changed without a semantic rebuild being requested.
    TextChanged { document: String, sequence: u64 },
    /// A snapshot covering `sequence` was published.
    SemanticInfoReady { document: String, sequence: u64 },
    /// A diagnostic from the published snapshot, in its coordinates.
    Diagnostic {
        document: String,
        diagnostic: AnalysisDiagnostic,
    },
    /// A build failed.
    RequestError(BuildFailure),
}

pub trait EditorConsumer: Send + Sync + 'static {
    /// Whether edits should eagerly trigger a full analysis.
    fn needs_semantic_info(&self) -> bool;

    fn handle(&self, event: EditorEvent) {
        let _ = event;
    }
}

/// Consumer that ignores every event.
#[derive(Debug, Clone, Copy)]
pub struct NullConsumer {
    pub needs_semantic_info: bool,
}

impl Default for NullConsumer {
    fn default() -> Self {
        Self {
            needs_semantic_info: true,
        }
    }
}

impl EditorConsumer for NullConsumer {
    fn needs_semantic_info(&self) -> bool {
        self.needs_semantic_info
    }
}

/// Consumer that logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingConsumer {
    pub needs_semantic_info: bool,
}

impl EditorConsumer for TracingConsumer {
    fn needs_semantic_info(&self) -> bool {
        self.needs_semantic_info
    }

    fn handle(&self, event: EditorEvent) {
        match event {
            EditorEvent::TextChanged { document, sequence } => {
                tracing::trace!(%document, sequence, "text changed");
            }
            EditorEvent::SemanticInfoReady { document, sequence } => {
                tracing::debug!(%document, sequence, "semantic info ready");
            }
            EditorEvent::Diagnostic {
                document,
                diagnostic,
            } => {
                tracing::debug!(
                    %document,
                    offset = diagnostic.range.offset,
                    message = %diagnostic.message,
                    "diagnostic"
                );
            }
            EditorEvent::RequestError(failure) => {
                tracing::warn!(%failure, "analysis request failed");
            }
        }
    }
}
