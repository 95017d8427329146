//! Conversion of analyzer diagnostics to LSP diagnostics.

use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString};

use crate::analyzer::AnalysisDiagnostic;
use crate::document::LineIndex;

fn code_for(message: &str) -> &'static str {
    if message.starts_with("cannot find") {
        "undeclared-reference"
    } else if message.starts_with("invalid redeclaration") {
        "redeclaration"
    } else {
        "syntax-error"
    }
}

/// Convert diagnostics from a snapshot, using a line index over that
/// snapshot's text.
pub fn to_diagnostics(diagnostics: &[AnalysisDiagnostic], line_index: &LineIndex) -> Vec<Diagnostic> {
    diagnostics
        .iter()
        .map(|diag| Diagnostic {
            range: line_index.range(diag.range.as_range()),
            severity: Some(DiagnosticSeverity::ERROR),
            code: Some(NumberOrString::String(code_for(&diag.message).to_string())),
            code_description: None,
            source: Some("letsp".to_string()),
            message: diag.message.clone(),
            related_information: None,
            tags: None,
            data: None,
        })
        .collect()
}
