//! Reference analyzer for a tiny declaration language.
//!
//! Each line holds at most one declaration:
//!
//! ```text
//! let NAME = EXPR [;]
//! ```
//!
//! Declarations are global, so a reference may name a declaration that
//! appears later in the file. Expressions are integer, boolean and string
//! literals, identifier references, array literals `[a, b]` and dictionary
//! literals `[k: v]`. Lines that are not declarations are ignored.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::document::TextRange;
use crate::error::AnalyzerError;
use crate::snapshot::Occurrence;

use super::{Analysis, AnalysisDiagnostic, AnalysisRequest, Analyzer};

/// Argument that makes [`LetAnalyzer`] fail the build.
pub const SIMULATE_FAILURE_ARG: &str = "-simulate-failure";

const ERROR_TYPE: &str = "<<error type>>";

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*let\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?P<init>.*?)\s*;?\s*$")
        .expect("declaration pattern is valid")
});

/// Analyzer for the `let` language.
#[derive(Debug, Default, Clone, Copy)]
pub struct LetAnalyzer;

impl Analyzer for LetAnalyzer {
    fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis, AnalyzerError> {
        if request.arguments.iter().any(|a| a == SIMULATE_FAILURE_ARG) {
            return Err(AnalyzerError::new(format!(
                "analysis of '{}' was asked to fail",
                request.document
            )));
        }

        let program = Program::parse(&request.text);
        Ok(program.resolve(&request.document))
    }
}

#[derive(Debug)]
enum Expr {
    Int,
    Bool,
    Str,
    Ref { name: String, range: TextRange },
    Array(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Error,
}

#[derive(Debug)]
struct Declaration {
    name: String,
    range: TextRange,
    init: Expr,
}

#[derive(Debug, Default)]
struct Program {
    declarations: Vec<Declaration>,
    diagnostics: Vec<AnalysisDiagnostic>,
}

impl Program {
    fn parse(text: &str) -> Self {
        let mut program = Program::default();
        let mut line_start = 0;

        for line in text.split_inclusive('\n') {
            let content = line.strip_suffix('\n').unwrap_or(line);
            if let Some(caps) = DECLARATION.captures(content) {
                if let (Some(name), Some(init)) = (caps.name("name"), caps.name("init")) {
                    let base = line_start + init.start();
                    let mut parser = ExprParser::new(init.as_str(), base);
                    let expr = parser.parse_all();
                    if let Some(diag) = parser.error {
                        program.diagnostics.push(diag);
                    }
                    program.declarations.push(Declaration {
                        name: name.as_str().to_string(),
                        range: TextRange::new(line_start + name.start(), name.len()),
                        init: expr,
                    });
                }
            }
            line_start += line.len();
        }

        program
    }

    fn resolve(mut self, file_name: &str) -> Analysis {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, decl) in self.declarations.iter().enumerate() {
            if index.contains_key(decl.name.as_str()) {
                self.diagnostics.push(AnalysisDiagnostic {
                    range: decl.range,
                    message: format!("invalid redeclaration of '{}'", decl.name),
                });
            } else {
                index.insert(decl.name.as_str(), i);
            }
        }

        let mut types = TypeCache::new(self.declarations.len());
        let mut occurrences = Vec::new();
        let mut diagnostics = Vec::new();

        for decl in &self.declarations {
            let type_name = index
                .get(decl.name.as_str())
                .map(|&i| types.type_of(i, &self.declarations, &index))
                .unwrap_or_else(|| ERROR_TYPE.to_string());
            occurrences.push(Occurrence {
                name: decl.name.clone(),
                type_name,
                file_name: file_name.to_string(),
                token: decl.range,
                declaration: Some(decl.range),
            });

            let mut refs = Vec::new();
            collect_refs(&decl.init, &mut refs);
            for (name, range) in refs {
                match index.get(name) {
                    Some(&target) => occurrences.push(Occurrence {
                        name: name.to_string(),
                        type_name: types.type_of(target, &self.declarations, &index),
                        file_name: file_name.to_string(),
                        token: range,
                        declaration: Some(self.declarations[target].range),
                    }),
                    None => diagnostics.push(AnalysisDiagnostic {
                        range,
                        message: format!("cannot find '{}' in scope", name),
                    }),
                }
            }
        }

        self.diagnostics.extend(diagnostics);
        Analysis {
            occurrences,
            diagnostics: self.diagnostics,
        }
    }
}

fn collect_refs<'a>(expr: &'a Expr, out: &mut Vec<(&'a str, TextRange)>) {
    match expr {
        Expr::Ref { name, range } => out.push((name.as_str(), *range)),
        Expr::Array(items) => items.iter().for_each(|item| collect_refs(item, out)),
        Expr::Dict(entries) => entries.iter().for_each(|(k, v)| {
            collect_refs(k, out);
            collect_refs(v, out);
        }),
        Expr::Int | Expr::Bool | Expr::Str | Expr::Error => {}
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Unvisited,
    InProgress,
    Done(String),
}

/// Memoized declaration types; a reference cycle types as an error.
struct TypeCache {
    slots: Vec<Slot>,
}

impl TypeCache {
    fn new(len: usize) -> Self {
        Self {
            slots: vec![Slot::Unvisited; len],
        }
    }

    fn type_of(&mut self, decl: usize, decls: &[Declaration], index: &HashMap<&str, usize>) -> String {
        match &self.slots[decl] {
            Slot::Done(ty) => return ty.clone(),
            Slot::InProgress => return ERROR_TYPE.to_string(),
            Slot::Unvisited => {}
        }
        self.slots[decl] = Slot::InProgress;
        let ty = self.expr_type(&decls[decl].init, decls, index);
        self.slots[decl] = Slot::Done(ty.clone());
        ty
    }

    fn expr_type(&mut self, expr: &Expr, decls: &[Declaration], index: &HashMap<&str, usize>) -> String {
        match expr {
            Expr::Int => "Int".to_string(),
            Expr::Bool => "Bool".to_string(),
            Expr::Str => "String".to_string(),
            Expr::Error => ERROR_TYPE.to_string(),
            Expr::Ref { name, .. } => match index.get(name.as_str()) {
                Some(&target) => self.type_of(target, decls, index),
                None => ERROR_TYPE.to_string(),
            },
            Expr::Array(items) => {
                let element = self.unify(items.iter(), decls, index);
                format!("[{}]", element)
            }
            Expr::Dict(entries) => {
                let key = self.unify(entries.iter().map(|(k, _)| k), decls, index);
                let value = self.unify(entries.iter().map(|(_, v)| v), decls, index);
                format!("[{} : {}]", key, value)
            }
        }
    }

    /// Common type of a literal's elements; mixed elements widen to `Any`.
    fn unify<'a>(
        &mut self,
        exprs: impl Iterator<Item = &'a Expr>,
        decls: &[Declaration],
        index: &HashMap<&str, usize>,
    ) -> String {
        let mut common: Option<String> = None;
        for expr in exprs {
            let ty = self.expr_type(expr, decls, index);
            match &common {
                None => common = Some(ty),
                Some(existing) if *existing == ty => {}
                Some(_) => return "Any".to_string(),
            }
        }
        common.unwrap_or_else(|| ERROR_TYPE.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tok<'a> {
    Ident(&'a str),
    Int,
    Str,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Unknown,
}

/// Recursive-descent parser over one initializer expression.
struct ExprParser<'a> {
    tokens: Vec<(Tok<'a>, TextRange)>,
    pos: usize,
    end: usize,
    error: Option<AnalysisDiagnostic>,
}

impl<'a> ExprParser<'a> {
    fn new(source: &'a str, base: usize) -> Self {
        Self {
            tokens: lex(source, base),
            pos: 0,
            end: base + source.len(),
            error: None,
        }
    }

    fn peek(&self) -> Option<Tok<'a>> {
        self.tokens.get(self.pos).map(|(tok, _)| *tok)
    }

    fn bump(&mut self) -> Option<(Tok<'a>, TextRange)> {
        let tok = self.tokens.get(self.pos).copied();
        self.pos += 1;
        tok
    }

    fn fail(&mut self, range: TextRange, message: &str) -> Expr {
        if self.error.is_none() {
            self.error = Some(AnalysisDiagnostic {
                range,
                message: message.to_string(),
            });
        }
        Expr::Error
    }

    fn here(&self) -> TextRange {
        self.tokens
            .get(self.pos)
            .map(|(_, range)| *range)
            .unwrap_or(TextRange::new(self.end, 0))
    }

    fn parse_all(&mut self) -> Expr {
        let expr = self.parse_expr();
        if self.pos < self.tokens.len() && self.error.is_none() {
            let range = self.here();
            return self.fail(range, "unexpected trailing tokens");
        }
        expr
    }

    fn parse_expr(&mut self) -> Expr {
        let range = self.here();
        match self.bump() {
            Some((Tok::Int, _)) => Expr::Int,
            Some((Tok::Str, _)) => Expr::Str,
            Some((Tok::Ident("true" | "false"), _)) => Expr::Bool,
            Some((Tok::Ident(name), range)) => Expr::Ref {
                name: name.to_string(),
                range,
            },
            Some((Tok::LBracket, _)) => self.parse_collection(),
            Some(_) => self.fail(range, "expected an expression"),
            None => self.fail(range, "expected an expression"),
        }
    }

    fn parse_collection(&mut self) -> Expr {
        if self.peek() == Some(Tok::RBracket) {
            self.bump();
            return Expr::Array(Vec::new());
        }

        let first = self.parse_expr();
        if self.peek() == Some(Tok::Colon) {
            self.bump();
            let value = self.parse_expr();
            let mut entries = vec![(first, value)];
            while self.peek() == Some(Tok::Comma) {
                self.bump();
                let key = self.parse_expr();
                if self.peek() != Some(Tok::Colon) {
                    let range = self.here();
                    return self.fail(range, "expected ':' in dictionary literal");
                }
                self.bump();
                let value = self.parse_expr();
                entries.push((key, value));
            }
            return self.close(Expr::Dict(entries));
        }

        let mut items = vec![first];
        while self.peek() == Some(Tok::Comma) {
            self.bump();
            items.push(self.parse_expr());
        }
        self.close(Expr::Array(items))
    }

    fn close(&mut self, expr: Expr) -> Expr {
        if self.peek() == Some(Tok::RBracket) {
            self.bump();
            expr
        } else {
            let range = self.here();
            self.fail(range, "expected ']'")
        }
    }
}

fn lex(source: &str, base: usize) -> Vec<(Tok<'_>, TextRange)> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let c = bytes[i];
        let tok = match c {
            b' ' | b'\t' | b'\r' => {
                i += 1;
                continue;
            }
            b'[' => {
                i += 1;
                Tok::LBracket
            }
            b']' => {
                i += 1;
                Tok::RBracket
            }
            b':' => {
                i += 1;
                Tok::Colon
            }
            b',' => {
                i += 1;
                Tok::Comma
            }
            b'0'..=b'9' => {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                Tok::Int
            }
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    i += 1;
                }
                if i < bytes.len() {
                    i += 1;
                    Tok::Str
                } else {
                    Tok::Unknown
                }
            }
            c if c == b'_' || c.is_ascii_alphabetic() => {
                while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
                    i += 1;
                }
                Tok::Ident(&source[start..i])
            }
            _ => {
                // skip the whole (possibly multi-byte) character
                i += source[i..].chars().next().map_or(1, char::len_utf8);
                Tok::Unknown
            }
        };
        tokens.push((tok, TextRange::new(base + start, i - start)));
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(text: &str) -> Analysis {
        LetAnalyzer
            .analyze(&AnalysisRequest {
                document: "/test.let".to_string(),
                text: text.to_string(),
                arguments: vec![],
            })
            .unwrap()
    }

    fn at<'a>(analysis: &'a Analysis, offset: usize) -> &'a Occurrence {
        analysis
            .occurrences
            .iter()
            .find(|o| o.token.contains(offset))
            .unwrap()
    }

    #[test]
    fn reference_resolves_to_declaration() {
        let text = "let foo = 0\nlet value = foo\n";
        let analysis = analyze(text);
        let occ = at(&analysis, text.find("foo\n").unwrap());
        assert_eq!(occ.name, "foo");
        assert_eq!(occ.type_name, "Int");
        assert_eq!(occ.file_name, "/test.let");
        assert_eq!(occ.declaration, Some(TextRange::new(4, 3)));
    }

    #[test]
    fn forward_reference_is_allowed() {
        let text = "let value = foo\nlet foo = 0\n";
        let analysis = analyze(text);
        let occ = at(&analysis, 12);
        assert_eq!(occ.type_name, "Int");
        assert_eq!(occ.declaration, Some(TextRange::new(20, 3)));
        assert_eq!(at(&analysis, 4).type_name, "Int");
    }

    #[test]
    fn literal_types() {
        let text = "let a = [0:0,0:0]\nlet b = [1, 2]\nlet c = \"hi\"\nlet d = true;\nlet e = [a]\n";
        let analysis = analyze(text);
        let type_of = |name: &str| {
            analysis
                .occurrences
                .iter()
                .find(|o| o.name == name && o.declaration == Some(o.token))
                .map(|o| o.type_name.clone())
                .unwrap()
        };
        assert_eq!(type_of("a"), "[Int : Int]");
        assert_eq!(type_of("b"), "[Int]");
        assert_eq!(type_of("c"), "String");
        assert_eq!(type_of("d"), "Bool");
        assert_eq!(type_of("e"), "[[Int : Int]]");
    }

    #[test]
    fn cycles_and_unknown_names_are_errors() {
        let text = "let a = b\nlet b = a\nlet c = missing\n";
        let analysis = analyze(text);
        assert_eq!(at(&analysis, 4).type_name, ERROR_TYPE);
        assert!(analysis
            .occurrences
            .iter()
            .all(|o| o.name != "missing"));
        assert_eq!(analysis.diagnostics.len(), 1);
        assert_eq!(analysis.diagnostics[0].message, "cannot find 'missing' in scope");
    }

    #[test]
    fn malformed_initializer_reports_diagnostic() {
        let analysis = analyze("let a = [0:0, 1\n");
        assert_eq!(at(&analysis, 4).type_name, ERROR_TYPE);
        assert_eq!(analysis.diagnostics.len(), 1);
    }

    #[test]
    fn non_declaration_lines_are_skipped() {
        let analysis = analyze("// comment\n\nlet x = 1\n");
        assert_eq!(analysis.occurrences.len(), 1);
        assert_eq!(analysis.occurrences[0].token, TextRange::new(16, 1));
    }

    #[test]
    fn failure_argument_fails_the_build() {
        let result = LetAnalyzer.analyze(&AnalysisRequest {
            document: "/test.let".to_string(),
            text: "let x = 1\n".to_string(),
            arguments: vec![SIMULATE_FAILURE_ARG.to_string()],
        });
        assert!(result.is_err());
    }
}
