//! Semantic unit extraction.
//!
//! Walks the top level of a parsed file and turns each recognized construct
//! into a [`SemanticUnit`]. Text between units (comments, attributes,
//! top-level statements) is folded into the following unit, or into the
//! preceding one at end of file, so units cover the whole file except
//! whitespace.

use tracing::debug;
use tree_sitter::Node;

use super::languages::{is_hook_name, is_member_kind, is_route_method, role_of, NodeRole};
use super::parser::{node_text, AstParser};
use crate::error::ParseError;
use crate::processing::Language;
use crate::types::{SemanticUnit, SourceFile, UnitKind};

/// Name given to merged import blocks.
pub const IMPORT_BLOCK_NAME: &str = "imports";

const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Classified {
    Unit { kind: UnitKind, name: String },
    Import,
}

#[derive(Debug)]
struct Segment {
    class: Option<Classified>,
    start: usize,
    end: usize,
}

/// Extracts ordered, non-overlapping semantic units from source files.
#[derive(Debug, Default, Clone)]
pub struct UnitExtractor {
    parser: AstParser,
}

impl UnitExtractor {
    pub fn new() -> Self {
        Self {
            parser: AstParser::new(),
        }
    }

    /// Extract units from a file.
    ///
    /// Languages without a grammar yield an empty list. A file whose parse
    /// tree contains syntax errors yields an error so the caller can fall
    /// back to line windows.
    pub fn extract(&self, file: &SourceFile) -> Result<Vec<SemanticUnit>, ParseError> {
        if !self.parser.supports_language(file.language) || file.raw_content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let content = file.raw_content.as_str();
        let parsed = self.parser.parse(content, file.language)?;
        let root = parsed.root();

        let mut cursor = root.walk();
        let segments: Vec<Segment> = root
            .children(&mut cursor)
            .map(|node| Segment {
                class: classify(node, content, file.language),
                start: node.start_byte(),
                end: node.end_byte(),
            })
            .collect();

        let units = assemble(segments, content);
        debug!(
            path = %file.path,
            language = %file.language,
            units = units.len(),
            "Extracted semantic units"
        );
        Ok(units)
    }

    /// Split a class unit into one [`UnitKind::Method`] unit per member.
    ///
    /// The class header and any text between members attach to the following
    /// member; the closing text attaches to the last one, so the members
    /// cover exactly the class unit's span. Returns an empty list when the
    /// unit is not a class or has no recognized members.
    pub fn split_members(&self, file: &SourceFile, unit: &SemanticUnit) -> Vec<SemanticUnit> {
        if unit.kind != UnitKind::Class {
            return Vec::new();
        }
        let content = file.raw_content.as_str();
        let Ok(parsed) = self.parser.parse(content, file.language) else {
            return Vec::new();
        };
        let root = parsed.root();

        let mut cursor = root.walk();
        let Some(class_node) = root
            .children(&mut cursor)
            .filter(|n| n.start_byte() >= unit.start_offset && n.end_byte() <= unit.end_offset)
            .find(|n| {
                matches!(
                    classify(*n, content, file.language),
                    Some(Classified::Unit { kind: UnitKind::Class, ref name }) if *name == unit.name
                )
            })
            .and_then(definition_node)
        else {
            return Vec::new();
        };

        let body = class_node.child_by_field_name("body").unwrap_or(class_node);
        let mut body_cursor = body.walk();
        let members: Vec<Node> = body
            .named_children(&mut body_cursor)
            .filter(|n| is_member_kind(file.language, n.kind()))
            .collect();
        if members.is_empty() {
            return Vec::new();
        }

        let mut start = unit.start_offset;
        let last = members.len() - 1;
        members
            .iter()
            .enumerate()
            .map(|(i, member)| {
                let end = if i == last { unit.end_offset } else { member.end_byte() };
                let named = definition_node(*member).unwrap_or(*member);
                let method = SemanticUnit {
                    kind: UnitKind::Method,
                    name: format!("{}.{}", unit.name, unit_name(named, content)),
                    start_offset: start,
                    end_offset: end,
                    raw_text: content[start..end].to_string(),
                };
                let gap = &content[end..unit.end_offset];
                start = end + (gap.len() - gap.trim_start().len());
                method
            })
            .collect()
    }
}

/// The definition wrapped by decorator and export nodes.
fn definition_node(node: Node) -> Option<Node> {
    match node.kind() {
        "decorated_definition" => node.child_by_field_name("definition"),
        "export_statement" => node.child_by_field_name("declaration"),
        _ => Some(node),
    }
}

/// Fold segments into units: imports merge, non-unit text attaches forward.
fn assemble(segments: Vec<Segment>, content: &str) -> Vec<SemanticUnit> {
    let mut spans: Vec<(UnitKind, String, usize, usize)> = Vec::new();
    let mut pending_start: Option<usize> = None;
    let mut pending_end = 0;

    for segment in segments {
        let (kind, name) = match segment.class {
            None => {
                pending_start.get_or_insert(segment.start);
                pending_end = segment.end;
                continue;
            }
            Some(Classified::Import) => (UnitKind::ImportBlock, IMPORT_BLOCK_NAME.to_string()),
            Some(Classified::Unit { kind, name }) => (kind, name),
        };

        if let Some(last) = spans.last_mut() {
            if kind == UnitKind::ImportBlock && last.0 == UnitKind::ImportBlock {
                last.3 = segment.end;
                pending_start = None;
                continue;
            }
        }

        let start = pending_start.take().unwrap_or(segment.start);
        spans.push((kind, name, start, segment.end));
    }

    if pending_start.is_some() {
        if let Some(last) = spans.last_mut() {
            last.3 = pending_end;
        }
    }

    spans
        .into_iter()
        .map(|(kind, name, start, end)| SemanticUnit {
            kind,
            name,
            start_offset: start,
            end_offset: end,
            raw_text: content[start..end].to_string(),
        })
        .collect()
}

fn classify(node: Node, content: &str, language: Language) -> Option<Classified> {
    match role_of(language, node.kind())? {
        NodeRole::Unit(kind) => Some(Classified::Unit {
            kind,
            name: unit_name(node, content),
        }),
        NodeRole::Import => Some(Classified::Import),
        NodeRole::Inspect => inspect(node, content, language),
    }
}

/// Resolve nodes whose meaning depends on their children.
fn inspect(node: Node, content: &str, language: Language) -> Option<Classified> {
    match node.kind() {
        "decorated_definition" => {
            let definition = node.child_by_field_name("definition")?;
            let kind = if definition.kind() == "class_definition" {
                UnitKind::Class
            } else {
                UnitKind::Function
            };
            Some(Classified::Unit {
                kind,
                name: unit_name(definition, content),
            })
        }
        "function_declaration" => Some(function_like(unit_name(node, content))),
        "export_statement" => {
            if node.child_by_field_name("source").is_some() {
                return Some(Classified::Import);
            }
            if let Some(declaration) = node.child_by_field_name("declaration") {
                return classify(declaration, content, language);
            }
            let value = node.child_by_field_name("value")?;
            match value.kind() {
                "class" => Some(Classified::Unit {
                    kind: UnitKind::Class,
                    name: "default".to_string(),
                }),
                "arrow_function" | "function_expression" | "function" => {
                    Some(function_like("default".to_string()))
                }
                _ => None,
            }
        }
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = node.walk();
            let declarator = node
                .named_children(&mut cursor)
                .find(|child| child.kind() == "variable_declarator")?;
            let value = declarator.child_by_field_name("value")?;
            let name = declarator
                .child_by_field_name("name")
                .map(|n| first_line(node_text(&n, content)))
                .unwrap_or_else(|| ANONYMOUS.to_string());

            match value.kind() {
                "arrow_function" | "function_expression" | "function" | "generator_function" => {
                    Some(function_like(name))
                }
                "class" => Some(Classified::Unit {
                    kind: UnitKind::Class,
                    name,
                }),
                "call_expression" if is_require(value, content) => Some(Classified::Import),
                _ => None,
            }
        }
        "expression_statement" => {
            let expression = node.named_child(0)?;
            if expression.kind() != "call_expression" {
                return None;
            }
            classify_call(expression, content)
        }
        "call" => {
            if node.child_by_field_name("receiver").is_some() {
                return None;
            }
            let method = node.child_by_field_name("method")?;
            match node_text(&method, content) {
                "require" | "require_relative" | "load" => Some(Classified::Import),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Route registrations, top-level hook calls and `require` statements.
fn classify_call(call: Node, content: &str) -> Option<Classified> {
    let function = call.child_by_field_name("function")?;
    match function.kind() {
        "member_expression" => {
            let property = function.child_by_field_name("property")?;
            let method = node_text(&property, content);
            if !is_route_method(method) {
                return None;
            }
            let target = call
                .child_by_field_name("arguments")
                .and_then(|args| args.named_child(0))
                .filter(|arg| matches!(arg.kind(), "string" | "template_string"))
                .map(|arg| strip_quotes(node_text(&arg, content)))
                .unwrap_or_else(|| {
                    function
                        .child_by_field_name("object")
                        .map(|o| first_line(node_text(&o, content)))
                        .unwrap_or_else(|| ANONYMOUS.to_string())
                });
            Some(Classified::Unit {
                kind: UnitKind::Route,
                name: format!("{} {}", method.to_uppercase(), target),
            })
        }
        "identifier" => {
            let name = node_text(&function, content);
            if name == "require" {
                Some(Classified::Import)
            } else if is_hook_name(name) {
                Some(Classified::Unit {
                    kind: UnitKind::Hook,
                    name: name.to_string(),
                })
            } else {
                None
            }
        }
        _ => None,
    }
}

fn function_like(name: String) -> Classified {
    let kind = if is_hook_name(&name) {
        UnitKind::Hook
    } else {
        UnitKind::Function
    };
    Classified::Unit { kind, name }
}

fn is_require(call: Node, content: &str) -> bool {
    call.child_by_field_name("function")
        .map_or(false, |f| f.kind() == "identifier" && node_text(&f, content) == "require")
}

/// Best-effort name of a definition node.
fn unit_name(node: Node, content: &str) -> String {
    find_name(node, content, 0).unwrap_or_else(|| ANONYMOUS.to_string())
}

fn find_name(node: Node, content: &str, depth: usize) -> Option<String> {
    if depth > 3 {
        return None;
    }

    if node.kind() == "impl_item" {
        if let Some(ty) = node.child_by_field_name("type") {
            let ty = first_line(node_text(&ty, content));
            return Some(match node.child_by_field_name("trait") {
                Some(tr) => format!("{} for {}", first_line(node_text(&tr, content)), ty),
                None => ty,
            });
        }
    }

    if let Some(name) = node.child_by_field_name("name") {
        return Some(first_line(node_text(&name, content)));
    }

    if let Some(declarator) = node.child_by_field_name("declarator") {
        if is_identifier_kind(declarator.kind()) {
            return Some(first_line(node_text(&declarator, content)));
        }
        if let Some(name) = find_name(declarator, content, depth + 1) {
            return Some(name);
        }
    }

    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    if let Some(ident) = children.iter().find(|c| is_identifier_kind(c.kind())) {
        return Some(first_line(node_text(ident, content)));
    }
    children
        .into_iter()
        .find_map(|child| find_name(child, content, depth + 1))
}

fn is_identifier_kind(kind: &str) -> bool {
    matches!(
        kind,
        "identifier"
            | "name"
            | "constant"
            | "property_identifier"
            | "type_identifier"
            | "field_identifier"
            | "qualified_identifier"
            | "destructor_name"
            | "operator_name"
    )
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}

fn strip_quotes(text: &str) -> String {
    text.trim_matches(|c| c == '\'' || c == '"' || c == '`')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn extract(path: &str, content: &str) -> Vec<SemanticUnit> {
        UnitExtractor::new()
            .extract(&SourceFile::new(path, content))
            .unwrap()
    }

    fn kinds_and_names(units: &[SemanticUnit]) -> Vec<(UnitKind, &str)> {
        units.iter().map(|u| (u.kind, u.name.as_str())).collect()
    }

    /// Everything outside the units is whitespace and units never overlap.
    fn assert_covers(content: &str, units: &[SemanticUnit]) {
        let mut cursor = 0;
        for unit in units {
            assert!(unit.start_offset >= cursor, "units overlap");
            assert!(content[cursor..unit.start_offset].trim().is_empty());
            assert_eq!(unit.raw_text, &content[unit.start_offset..unit.end_offset]);
            cursor = unit.end_offset;
        }
        assert!(content[cursor..].trim().is_empty());
    }

    #[test]
    fn test_python_units() {
        let code = r#"import os
from typing import List

# helpers
def load(path: str) -> str:
    return open(path).read()

@dataclass
class Config:
    name: str

if __name__ == "__main__":
    load("x")
"#;
        let units = extract("app.py", code);
        assert_eq!(
            kinds_and_names(&units),
            vec![
                (UnitKind::ImportBlock, "imports"),
                (UnitKind::Function, "load"),
                (UnitKind::Class, "Config"),
            ]
        );
        assert!(units[1].raw_text.starts_with("# helpers"));
        assert!(units[2].raw_text.ends_with("load(\"x\")"));
        assert_covers(code, &units);
    }

    #[test]
    fn test_javascript_routes_and_hooks() {
        let code = r#"import express from 'express';
const { useState } = require('react');

const app = express();

// list users
app.get('/users', (req, res) => {
  res.json([]);
});

export function useCounter() {
  const [count, setCount] = useState(0);
  return { count, setCount };
}

export const fetchUser = async (id) => {
  return db.find(id);
};

app.listen(3000);
"#;
        let units = extract("server.js", code);
        assert_eq!(
            kinds_and_names(&units),
            vec![
                (UnitKind::ImportBlock, "imports"),
                (UnitKind::Route, "GET /users"),
                (UnitKind::Hook, "useCounter"),
                (UnitKind::Function, "fetchUser"),
            ]
        );
        assert!(units[1].raw_text.starts_with("const app = express();"));
        assert!(units[3].raw_text.ends_with("app.listen(3000);"));
        assert_covers(code, &units);
    }

    #[test]
    fn test_go_methods_and_rust_impls() {
        let go = "package main\n\nfunc main() {}\n\nfunc (s *Server) Start() error {\n\treturn nil\n}\n";
        let units = extract("main.go", go);
        assert_eq!(
            kinds_and_names(&units),
            vec![(UnitKind::Function, "main"), (UnitKind::Method, "Start")]
        );
        assert_covers(go, &units);

        let rust = "use std::fmt;\n\n#[derive(Debug)]\nstruct Point { x: i32 }\n\nimpl fmt::Display for Point {\n    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { Ok(()) }\n}\n";
        let units = extract("point.rs", rust);
        assert_eq!(
            kinds_and_names(&units),
            vec![
                (UnitKind::ImportBlock, "imports"),
                (UnitKind::Class, "Point"),
                (UnitKind::Class, "fmt::Display for Point"),
            ]
        );
        assert!(units[1].raw_text.starts_with("#[derive(Debug)]"));
        assert_covers(rust, &units);
    }

    #[test]
    fn test_class_members_split_into_methods() {
        let code = r#"import os

# service
class Service:
    """Talks to the backend."""

    timeout = 5

    def start(self):
        return os.getpid()

    @property
    def name(self):
        return "svc"

    def stop(self):
        pass
"#;
        let file = SourceFile::new("svc.py", code);
        let extractor = UnitExtractor::new();
        let units = extractor.extract(&file).unwrap();
        let class = &units[1];
        assert_eq!(class.kind, UnitKind::Class);

        let members = extractor.split_members(&file, class);
        assert_eq!(
            kinds_and_names(&members),
            vec![
                (UnitKind::Method, "Service.start"),
                (UnitKind::Method, "Service.name"),
                (UnitKind::Method, "Service.stop"),
            ]
        );
        assert_eq!(members[0].start_offset, class.start_offset);
        assert!(members[0].raw_text.starts_with("# service\nclass Service:"));
        assert_eq!(members[2].end_offset, class.end_offset);
        assert_covers(&code[class.start_offset..class.end_offset], &members
            .iter()
            .map(|m| SemanticUnit {
                start_offset: m.start_offset - class.start_offset,
                end_offset: m.end_offset - class.start_offset,
                ..m.clone()
            })
            .collect::<Vec<_>>());

        assert!(extractor.split_members(&file, &units[0]).is_empty());
    }

    #[test]
    fn test_java_and_javascript_class_members() {
        let java = "class Repo {\n  private int size;\n  Repo() { size = 0; }\n  int size() { return size; }\n}\n";
        let file = SourceFile::new("Repo.java", java);
        let extractor = UnitExtractor::new();
        let units = extractor.extract(&file).unwrap();
        let names: Vec<String> = extractor.split_members(&file, &units[0]).into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Repo.Repo", "Repo.size"]);

        let js = "export class Cart {\n  add(item) { this.items.push(item); }\n  total() { return 0; }\n}\n";
        let file = SourceFile::new("cart.js", js);
        let units = extractor.extract(&file).unwrap();
        let members = extractor.split_members(&file, &units[0]);
        assert_eq!(kinds_and_names(&members), vec![(UnitKind::Method, "Cart.add"), (UnitKind::Method, "Cart.total")]);
        assert!(members[1].raw_text.trim_end().ends_with('}'));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let result = UnitExtractor::new().extract(&SourceFile::new("broken.py", "def broken(:\n    pass\n"));
        assert!(matches!(result, Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn test_plain_text_has_no_units() {
        assert!(extract("README.md", "# Title\n\nSome prose.").is_empty());
        assert!(extract("empty.py", "").is_empty());
    }
}
