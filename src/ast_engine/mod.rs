//! AST engine for code parsing and semantic unit extraction.
//!
//! This module provides:
//! - Tree-sitter based parsing for the supported grammars
//! - Per-language node tables mapping node kinds onto unit kinds
//! - Semantic unit extraction for boundary-aware chunking

pub mod languages;
pub mod parser;
pub mod units;

pub use parser::{AstParser, ParsedFile};
pub use units::{UnitExtractor, IMPORT_BLOCK_NAME};
