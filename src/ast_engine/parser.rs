//! Tree-sitter based AST parser.
//!
//! Thin wrapper that maps a detected [`Language`] onto its grammar and
//! reports syntax errors so callers can fall back to line-based chunking.

use tracing::debug;
use tree_sitter::{Node, Parser, Tree};

use crate::error::ParseError;
use crate::processing::Language;

/// A successfully parsed file.
#[derive(Debug)]
pub struct ParsedFile {
    pub language: Language,
    pub tree: Tree,
}

impl ParsedFile {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }
}

/// Tree-sitter based AST parser.
///
/// Stateless: `tree_sitter::Parser` is not `Sync`, so a fresh parser is
/// built for every call and `AstParser` can be shared across workers.
#[derive(Debug, Default, Clone, Copy)]
pub struct AstParser;

impl AstParser {
    pub fn new() -> Self {
        Self
    }

    /// Get the tree-sitter grammar for a language.
    pub fn grammar(language: Language) -> Option<tree_sitter::Language> {
        match language {
            Language::Python => Some(tree_sitter_python::language()),
            Language::JavaScript => Some(tree_sitter_javascript::language()),
            Language::TypeScript => Some(tree_sitter_typescript::language_typescript()),
            Language::TypeScriptReact => Some(tree_sitter_typescript::language_tsx()),
            Language::Go => Some(tree_sitter_go::language()),
            Language::Rust => Some(tree_sitter_rust::language()),
            Language::Java => Some(tree_sitter_java::language()),
            Language::C => Some(tree_sitter_c::language()),
            Language::Cpp => Some(tree_sitter_cpp::language()),
            Language::Ruby => Some(tree_sitter_ruby::language()),
            _ => None,
        }
    }

    /// Check if a language is supported.
    pub fn supports_language(&self, language: Language) -> bool {
        Self::grammar(language).is_some()
    }

    /// Parse source code; any syntax error in the tree is reported as
    /// [`ParseError::Syntax`].
    pub fn parse(&self, content: &str, language: Language) -> Result<ParsedFile, ParseError> {
        let grammar = Self::grammar(language).ok_or(ParseError::Unsupported(language))?;

        let mut parser = Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|_| ParseError::Grammar(language))?;

        let tree = parser
            .parse(content.as_bytes(), None)
            .ok_or(ParseError::NoTree)?;

        if tree.root_node().has_error() {
            let errors = syntax_error_lines(&tree);
            debug!(
                language = %language,
                errors = errors.len(),
                "Parse produced syntax errors"
            );
            return Err(ParseError::Syntax {
                count: errors.len().max(1),
                line: errors.first().copied().unwrap_or(1),
            });
        }

        Ok(ParsedFile { language, tree })
    }
}

/// 1-indexed lines of every error or missing node in the tree.
fn syntax_error_lines(tree: &Tree) -> Vec<usize> {
    fn visit(node: Node, lines: &mut Vec<usize>) {
        if node.is_error() || node.is_missing() {
            lines.push(node.start_position().row + 1);
        }
        if !node.has_error() {
            return;
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            visit(child, lines);
        }
    }

    let mut lines = Vec::new();
    visit(tree.root_node(), &mut lines);
    lines
}

/// Source text of a node.
pub fn node_text<'a>(node: &Node, content: &'a str) -> &'a str {
    &content[node.start_byte()..node.end_byte()]
}
