//! The Analyzer collaborator: turns document text into a symbol table.
//!
//! The engine never assumes an analyzer is fast. Builds run on tokio's
//! blocking pool, one at a time per document.

mod let_lang;

pub use let_lang::{LetAnalyzer, SIMULATE_FAILURE_ARG};

use crate::document::TextRange;
use crate::error::AnalyzerError;
use crate::snapshot::Occurrence;

/// Input to a single build.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub document: String,
    pub text: String,
    /// Opaque arguments, passed through untouched.
    pub arguments: Vec<String>,
}

/// A problem found while analyzing, in the coordinates of the analyzed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisDiagnostic {
    pub range: TextRange,
    pub message: String,
}

/// Output of a successful build.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Every resolvable token. Order does not matter; snapshots sort them.
    pub occurrences: Vec<Occurrence>,
    pub diagnostics: Vec<AnalysisDiagnostic>,
}

/// Produces an [`Analysis`] from a document's full text.
pub trait Analyzer: Send + Sync + 'static {
    fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis, AnalyzerError>;
}

impl<F> Analyzer for F
where
    F: Fn(&AnalysisRequest) -> Result<Analysis, AnalyzerError> + Send + Sync + 'static,
{
    fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis, AnalyzerError> {
        self(request)
    }
}
