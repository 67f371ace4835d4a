//! Language-specific node type mappings for unit extraction.
//!
//! Maps top-level tree-sitter node kinds onto [`UnitKind`] for each
//! supported grammar. Nodes whose kind needs a look inside (JavaScript
//! exports, variable declarations holding arrow functions, route and hook
//! calls, Ruby `require`) are resolved by the extractor itself.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::processing::Language;
use crate::types::UnitKind;

/// Classification of one top-level node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Unit(UnitKind),
    Import,
    /// Needs inspection of the node's children to decide
    Inspect,
}

lazy_static! {
    static ref PYTHON: HashMap<&'static str, NodeRole> = python_node_roles();
    static ref JAVASCRIPT: HashMap<&'static str, NodeRole> = javascript_node_roles();
    static ref TYPESCRIPT: HashMap<&'static str, NodeRole> = typescript_node_roles();
    static ref GO: HashMap<&'static str, NodeRole> = go_node_roles();
    static ref RUST: HashMap<&'static str, NodeRole> = rust_node_roles();
    static ref JAVA: HashMap<&'static str, NodeRole> = java_node_roles();
    static ref C: HashMap<&'static str, NodeRole> = c_node_roles();
    static ref CPP: HashMap<&'static str, NodeRole> = cpp_node_roles();
    static ref RUBY: HashMap<&'static str, NodeRole> = ruby_node_roles();
    static ref EMPTY: HashMap<&'static str, NodeRole> = HashMap::new();
}

/// Get the node role table for a language.
pub fn node_roles(language: Language) -> &'static HashMap<&'static str, NodeRole> {
    match language {
        Language::Python => &PYTHON,
        Language::JavaScript => &JAVASCRIPT,
        Language::TypeScript | Language::TypeScriptReact => &TYPESCRIPT,
        Language::Go => &GO,
        Language::Rust => &RUST,
        Language::Java => &JAVA,
        Language::C => &C,
        Language::Cpp => &CPP,
        Language::Ruby => &RUBY,
        _ => &EMPTY,
    }
}

/// Look up the role of a top-level node kind.
pub fn role_of(language: Language, node_kind: &str) -> Option<NodeRole> {
    node_roles(language).get(node_kind).copied()
}

/// Node kinds inside a class body that become [`UnitKind::Method`] units
/// when an oversized class is split.
pub fn is_member_kind(language: Language, node_kind: &str) -> bool {
    match language {
        Language::Python => matches!(node_kind, "function_definition" | "decorated_definition"),
        Language::JavaScript | Language::TypeScript | Language::TypeScriptReact => {
            node_kind == "method_definition"
        }
        Language::Java => matches!(node_kind, "method_declaration" | "constructor_declaration"),
        Language::Rust => node_kind == "function_item",
        Language::Cpp => matches!(node_kind, "function_definition" | "template_declaration"),
        Language::Ruby => matches!(node_kind, "method" | "singleton_method"),
        _ => false,
    }
}

/// HTTP verbs and router helpers recognized in `app.get(...)` style calls.
pub fn is_route_method(name: &str) -> bool {
    matches!(
        name,
        "get" | "post" | "put" | "patch" | "delete" | "del" | "all" | "options" | "head" | "route"
    )
}

/// React hook naming convention: `use` followed by an uppercase letter.
pub fn is_hook_name(name: &str) -> bool {
    name.strip_prefix("use")
        .and_then(|rest| rest.chars().next())
        .map_or(false, |c| c.is_ascii_uppercase())
}

fn python_node_roles() -> HashMap<&'static str, NodeRole> {
    [
        ("function_definition", NodeRole::Unit(UnitKind::Function)),
        ("class_definition", NodeRole::Unit(UnitKind::Class)),
        ("decorated_definition", NodeRole::Inspect),
        ("import_statement", NodeRole::Import),
        ("import_from_statement", NodeRole::Import),
        ("future_import_statement", NodeRole::Import),
    ]
    .into_iter()
    .collect()
}

fn javascript_node_roles() -> HashMap<&'static str, NodeRole> {
    [
        ("function_declaration", NodeRole::Inspect),
        ("generator_function_declaration", NodeRole::Unit(UnitKind::Function)),
        ("class_declaration", NodeRole::Unit(UnitKind::Class)),
        ("import_statement", NodeRole::Import),
        ("export_statement", NodeRole::Inspect),
        ("lexical_declaration", NodeRole::Inspect),
        ("variable_declaration", NodeRole::Inspect),
        ("expression_statement", NodeRole::Inspect),
    ]
    .into_iter()
    .collect()
}

/// TypeScript extends JavaScript.
fn typescript_node_roles() -> HashMap<&'static str, NodeRole> {
    let mut roles = javascript_node_roles();
    roles.extend([
        ("interface_declaration", NodeRole::Unit(UnitKind::Class)),
        ("abstract_class_declaration", NodeRole::Unit(UnitKind::Class)),
        ("enum_declaration", NodeRole::Unit(UnitKind::Class)),
        ("module", NodeRole::Unit(UnitKind::Class)),
        ("internal_module", NodeRole::Unit(UnitKind::Class)),
    ]);
    roles
}

fn go_node_roles() -> HashMap<&'static str, NodeRole> {
    [
        ("function_declaration", NodeRole::Unit(UnitKind::Function)),
        ("method_declaration", NodeRole::Unit(UnitKind::Method)),
        ("type_declaration", NodeRole::Unit(UnitKind::Class)),
        ("import_declaration", NodeRole::Import),
    ]
    .into_iter()
    .collect()
}

fn rust_node_roles() -> HashMap<&'static str, NodeRole> {
    [
        ("function_item", NodeRole::Unit(UnitKind::Function)),
        ("macro_definition", NodeRole::Unit(UnitKind::Function)),
        ("impl_item", NodeRole::Unit(UnitKind::Class)),
        ("struct_item", NodeRole::Unit(UnitKind::Class)),
        ("enum_item", NodeRole::Unit(UnitKind::Class)),
        ("union_item", NodeRole::Unit(UnitKind::Class)),
        ("trait_item", NodeRole::Unit(UnitKind::Class)),
        ("mod_item", NodeRole::Unit(UnitKind::Class)),
        ("use_declaration", NodeRole::Import),
        ("extern_crate_declaration", NodeRole::Import),
    ]
    .into_iter()
    .collect()
}

fn java_node_roles() -> HashMap<&'static str, NodeRole> {
    [
        ("class_declaration", NodeRole::Unit(UnitKind::Class)),
        ("interface_declaration", NodeRole::Unit(UnitKind::Class)),
        ("enum_declaration", NodeRole::Unit(UnitKind::Class)),
        ("record_declaration", NodeRole::Unit(UnitKind::Class)),
        ("annotation_type_declaration", NodeRole::Unit(UnitKind::Class)),
        ("import_declaration", NodeRole::Import),
    ]
    .into_iter()
    .collect()
}

fn c_node_roles() -> HashMap<&'static str, NodeRole> {
    [
        ("function_definition", NodeRole::Unit(UnitKind::Function)),
        ("struct_specifier", NodeRole::Unit(UnitKind::Class)),
        ("union_specifier", NodeRole::Unit(UnitKind::Class)),
        ("enum_specifier", NodeRole::Unit(UnitKind::Class)),
        ("type_definition", NodeRole::Unit(UnitKind::Class)),
        ("preproc_include", NodeRole::Import),
    ]
    .into_iter()
    .collect()
}

/// C++ extends C.
fn cpp_node_roles() -> HashMap<&'static str, NodeRole> {
    let mut roles = c_node_roles();
    roles.extend([
        ("class_specifier", NodeRole::Unit(UnitKind::Class)),
        ("namespace_definition", NodeRole::Unit(UnitKind::Class)),
        ("template_declaration", NodeRole::Unit(UnitKind::Function)),
        ("using_declaration", NodeRole::Import),
    ]);
    roles
}

fn ruby_node_roles() -> HashMap<&'static str, NodeRole> {
    [
        ("method", NodeRole::Unit(UnitKind::Function)),
        ("singleton_method", NodeRole::Unit(UnitKind::Method)),
        ("class", NodeRole::Unit(UnitKind::Class)),
        ("module", NodeRole::Unit(UnitKind::Class)),
        ("call", NodeRole::Inspect),
    ]
    .into_iter()
    .collect()
}
