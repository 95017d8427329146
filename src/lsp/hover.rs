//! Hover rendering for resolved occurrences.

use tower_lsp::lsp_types::{Hover, HoverContents, MarkupContent, MarkupKind};

use crate::document::LineIndex;
use crate::snapshot::Occurrence;

/// Format the declaration line of a hover, 1-based like editors show it.
fn format_declaration(line_index: &LineIndex, occurrence: &Occurrence) -> String {
    match occurrence.declaration {
        Some(decl) => {
            let pos = line_index.position(decl.offset);
            if decl == occurrence.token {
                "*Declaration*".to_string()
            } else {
                format!("Declared at line {}, column {}", pos.line + 1, pos.character + 1)
            }
        }
        None => "No declaration".to_string(),
    }
}

fn format_occurrence(line_index: &LineIndex, occurrence: &Occurrence) -> String {
    format!(
        "(let) `{}`: `{}`\n\n{}",
        occurrence.name,
        occurrence.type_name,
        format_declaration(line_index, occurrence)
    )
}

/// Hover for an occurrence whose ranges are in `line_index`'s coordinates.
pub fn hover_for_occurrence(line_index: &LineIndex, occurrence: &Occurrence) -> Hover {
    Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value: format_occurrence(line_index, occurrence),
        }),
        range: Some(line_index.range(occurrence.token.as_range())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalysisRequest, Analyzer, LetAnalyzer};
    use tower_lsp::lsp_types::{Position, Range};

    fn occurrence_at(source: &str, offset: usize) -> Occurrence {
        let analysis = LetAnalyzer
            .analyze(&AnalysisRequest {
                document: "/test.let".to_string(),
                text: source.to_string(),
                arguments: vec![],
            })
            .unwrap();
        analysis
            .occurrences
            .into_iter()
            .find(|occ| occ.token.contains(offset))
            .unwrap()
    }

    fn markdown(hover: &Hover) -> &str {
        match &hover.contents {
            HoverContents::Markup(m) => &m.value,
            _ => panic!("Expected markup content"),
        }
    }

    #[test]
    fn hover_for_reference() {
        let source = "let foo = 0\nlet value = foo\n";
        let line_index = LineIndex::new(source);
        let hover = hover_for_occurrence(&line_index, &occurrence_at(source, 24));
        assert_eq!(
            markdown(&hover),
            "(let) `foo`: `Int`\n\nDeclared at line 1, column 5"
        );
        assert_eq!(
            hover.range,
            Some(Range::new(Position::new(1, 12), Position::new(1, 15)))
        );
    }

    #[test]
    fn hover_for_declaration() {
        let source = "let names = [\"a\", \"b\"]\n";
        let line_index = LineIndex::new(source);
        let hover = hover_for_occurrence(&line_index, &occurrence_at(source, 5));
        assert_eq!(markdown(&hover), "(let) `names`: `[String]`\n\n*Declaration*");
    }

    #[test]
    fn hover_for_cyclic_declaration() {
        let source = "let a = b\nlet b = a\n";
        let line_index = LineIndex::new(source);
        let hover = hover_for_occurrence(&line_index, &occurrence_at(source, 8));
        assert_eq!(
            markdown(&hover),
            "(let) `b`: `<<error type>>`\n\nDeclared at line 2, column 5"
        );
    }
}
