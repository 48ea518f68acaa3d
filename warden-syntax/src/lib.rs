//! Structural check for generated modules.
//!
//! A candidate is accepted when tree-sitter parses it without ERROR or
//! MISSING nodes. tree-sitter-python also accepts Python 2 statements,
//! stray indentation and soft `async`/`await` names, so Python modules get a
//! second pass that rejects those. Imports, names and types are not looked at.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};
use warden_types::{ArtifactKind, ArtifactValidator, Rejection};

const SNIPPET_CHARS: usize = 40;

/// Keywords the Python grammar still lets through as identifiers.
const PY3_RESERVED: [&str; 2] = ["async", "await"];

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceGrammar {
    #[default]
    Python,
    Rust,
}

impl SourceGrammar {
    fn language(&self) -> tree_sitter::Language {
        match self {
            SourceGrammar::Python => tree_sitter_python::LANGUAGE.into(),
            SourceGrammar::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SourceGrammar::Python => "py",
            SourceGrammar::Rust => "rs",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceGrammar::Python => "Python",
            SourceGrammar::Rust => "Rust",
        }
    }
}

impl fmt::Display for SourceGrammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for SourceGrammar {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(SourceGrammar::Python),
            "rust" | "rs" => Ok(SourceGrammar::Rust),
            other => Err(format!("unsupported grammar '{other}'")),
        }
    }
}

/// Source text that parsed cleanly in `grammar`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedCode {
    code: String,
    grammar: SourceGrammar,
}

impl ValidatedCode {
    pub fn as_str(&self) -> &str {
        &self.code
    }

    pub fn grammar(&self) -> SourceGrammar {
        self.grammar
    }

    pub fn into_inner(self) -> String {
        self.code
    }
}

impl AsRef<str> for ValidatedCode {
    fn as_ref(&self) -> &str {
        &self.code
    }
}

pub fn validate_code(grammar: SourceGrammar, candidate: &str) -> Result<ValidatedCode, Rejection> {
    if candidate.trim().is_empty() {
        return Err(Rejection::EmptyCode);
    }

    // Parser is not Sync; one per call keeps the validator shareable.
    let mut parser = Parser::new();
    parser
        .set_language(&grammar.language())
        .map_err(|e| Rejection::Syntax {
            line: 0,
            message: format!("grammar unavailable: {e}"),
        })?;
    let tree = parser.parse(candidate, None).ok_or_else(|| Rejection::Syntax {
        line: 0,
        message: "parser produced no tree".to_string(),
    })?;

    let root = tree.root_node();
    if root.has_error() {
        let (line, message) = match first_error(root) {
            Some(node) => (node.start_position().row + 1, describe(&node, candidate)),
            None => (root.start_position().row + 1, "invalid syntax".to_string()),
        };
        return Err(Rejection::Syntax { line, message });
    }

    if grammar == SourceGrammar::Python {
        if let Some((line, message)) = python3_violation(root, candidate) {
            return Err(Rejection::Syntax { line, message });
        }
    }

    Ok(ValidatedCode {
        code: candidate.to_string(),
        grammar,
    })
}

/// Leftmost ERROR or MISSING node, in document order.
fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let child_count = node.child_count();
    for i in 0..child_count {
        if let Some(child) = node.child(i) {
            if let Some(found) = first_error(child) {
                return Some(found);
            }
        }
    }
    None
}

/// First construct, in document order, that parses in tree-sitter-python but
/// not in Python 3.
fn python3_violation(node: Node, source: &str) -> Option<(usize, String)> {
    let line = node.start_position().row + 1;
    match node.kind() {
        "print_statement" => {
            return Some((line, "Missing parentheses in call to 'print'".to_string()))
        }
        "exec_statement" => {
            return Some((line, "Missing parentheses in call to 'exec'".to_string()))
        }
        "identifier" => {
            let text = node.utf8_text(source.as_bytes()).unwrap_or_default();
            if PY3_RESERVED.contains(&text) {
                return Some((line, format!("'{text}' is a reserved keyword")));
            }
        }
        "module" | "block" => {
            if let Some(found) = indentation_violation(node, source) {
                return Some(found);
            }
        }
        _ => {}
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if let Some(found) = python3_violation(child, source) {
                return Some(found);
            }
        }
    }
    None
}

/// Statements that open a line must share one column: 0 at module level,
/// the first statement's column inside a block. Statements after `;` or on
/// the header line (`if x: pass`) are skipped.
fn indentation_violation(node: Node, source: &str) -> Option<(usize, String)> {
    let mut expected = (node.kind() == "module").then_some(0);
    for i in 0..node.named_child_count() {
        let Some(child) = node.named_child(i) else {
            continue;
        };
        if matches!(child.kind(), "comment" | "line_continuation") {
            continue;
        }
        let pos = child.start_position();
        if !opens_line(source, child.start_byte(), pos.column) {
            continue;
        }
        match expected {
            None => expected = Some(pos.column),
            Some(col) if pos.column > col => {
                return Some((pos.row + 1, "unexpected indent".to_string()))
            }
            Some(col) if pos.column < col => {
                return Some((
                    pos.row + 1,
                    "unindent does not match any outer indentation level".to_string(),
                ))
            }
            Some(_) => {}
        }
    }
    None
}

fn opens_line(source: &str, start_byte: usize, column: usize) -> bool {
    start_byte
        .checked_sub(column)
        .and_then(|line_start| source.get(line_start..start_byte))
        .is_some_and(|prefix| prefix.chars().all(|c| c == ' ' || c == '\t'))
}

fn describe(node: &Node, source: &str) -> String {
    if node.is_missing() {
        return format!("missing '{}'", node.kind());
    }
    let text = node.utf8_text(source.as_bytes()).unwrap_or_default();
    let first_line = text.lines().next().unwrap_or_default().trim();
    if first_line.is_empty() {
        return "invalid syntax".to_string();
    }
    let mut snippet: String = first_line.chars().take(SNIPPET_CHARS).collect();
    if first_line.chars().count() > SNIPPET_CHARS {
        snippet.push_str("...");
    }
    format!("invalid syntax near '{snippet}'")
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SyntaxValidator {
    grammar: SourceGrammar,
}

impl SyntaxValidator {
    pub fn new(grammar: SourceGrammar) -> Self {
        Self { grammar }
    }

    pub fn grammar(&self) -> SourceGrammar {
        self.grammar
    }
}

impl ArtifactValidator for SyntaxValidator {
    type Artifact = ValidatedCode;

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Code
    }

    fn validate(&self, candidate: &str) -> Result<ValidatedCode, Rejection> {
        validate_code(self.grammar, candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_PYTHON: &str = r#""""Sample module."""

from datetime import datetime


def hello(name: str) -> str:
    """Greet a user."""
    return f"Hello, {name}"


if __name__ == "__main__":
    print(hello("world"))
"#;

    const NESTED_PYTHON: &str = r#"x = 1; y = 2
# top
class A:
    def m(self):
        if self:  # inline
            # body
            return 1
        return (2,
  3)
if x: pass
"#;

    const INVALID_PYTHON: &str = "def broken(\n    # Missing closing paren and colon\n";

    #[test]
    fn valid_python_is_returned_unchanged() {
        let code = validate_code(SourceGrammar::Python, VALID_PYTHON).unwrap();
        assert_eq!(code.as_str(), VALID_PYTHON);
        assert_eq!(code.grammar(), SourceGrammar::Python);
    }

    #[test]
    fn broken_python_reports_line() {
        match validate_code(SourceGrammar::Python, INVALID_PYTHON) {
            Err(Rejection::Syntax { line, message }) => {
                assert!(line >= 1);
                assert!(!message.is_empty());
            }
            other => panic!("expected syntax rejection, got {other:?}"),
        }
    }

    #[test]
    fn error_line_points_past_clean_prefix() {
        let src = "import os\n\ndef f(:\n    pass\n";
        match validate_code(SourceGrammar::Python, src) {
            Err(Rejection::Syntax { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected syntax rejection, got {other:?}"),
        }
    }

    #[test]
    fn empty_and_whitespace_code_rejected() {
        assert_eq!(validate_code(SourceGrammar::Python, ""), Err(Rejection::EmptyCode));
        assert_eq!(
            validate_code(SourceGrammar::Python, "   \n\n  "),
            Err(Rejection::EmptyCode)
        );
    }

    fn syntax_error(src: &str) -> (usize, String) {
        match validate_code(SourceGrammar::Python, src) {
            Err(Rejection::Syntax { line, message }) => (line, message),
            other => panic!("expected syntax rejection for {src:?}, got {other:?}"),
        }
    }

    #[test]
    fn python2_print_and_exec_rejected() {
        let (line, message) = syntax_error("print \"hello\"\n");
        assert_eq!(line, 1);
        assert!(message.contains("print"), "{message}");

        let (line, message) = syntax_error("import os\nexec \"x\"\n");
        assert_eq!(line, 2);
        assert!(message.contains("exec"), "{message}");

        assert!(validate_code(SourceGrammar::Python, "print(\"hello\")\nexec(\"x = 1\")\n").is_ok());
    }

    #[test]
    fn stray_module_indent_rejected() {
        assert_eq!(
            syntax_error("x = 1\n  y = 2\n"),
            (2, "unexpected indent".to_string())
        );
        syntax_error("  x = 1\n");
    }

    #[test]
    fn block_statements_share_one_column() {
        syntax_error("def f():\n    a = 1\n      b = 2\n");
    }

    #[test]
    fn async_and_await_are_not_names() {
        let (line, message) = syntax_error("async = 1\n");
        assert_eq!(line, 1);
        assert!(message.contains("async"), "{message}");
        assert!(matches!(
            validate_code(SourceGrammar::Python, "x = 1\nawait = 2\n"),
            Err(Rejection::Syntax { .. })
        ));
        assert!(validate_code(
            SourceGrammar::Python,
            "async def f():\n    await g()\n"
        )
        .is_ok());
    }

    #[test]
    fn comments_semicolons_and_nesting_keep_passing() {
        assert!(validate_code(SourceGrammar::Python, NESTED_PYTHON).is_ok());
    }

    #[test]
    fn rust_grammar() {
        assert!(validate_code(SourceGrammar::Rust, "fn main() { let x = 1; println!(\"{x}\"); }\n").is_ok());
        assert!(matches!(
            validate_code(SourceGrammar::Rust, "fn main( {\n"),
            Err(Rejection::Syntax { .. })
        ));
    }

    #[test]
    fn grammar_parses_from_cli_names() {
        assert_eq!("py".parse::<SourceGrammar>().unwrap(), SourceGrammar::Python);
        assert_eq!("Rust".parse::<SourceGrammar>().unwrap(), SourceGrammar::Rust);
        assert!("cobol".parse::<SourceGrammar>().is_err());
    }

    #[test]
    fn validator_reports_code_kind() {
        let v = SyntaxValidator::default();
        assert_eq!(v.kind(), ArtifactKind::Code);
        assert!(v.validate("x = 1\n").is_ok());
    }
}
