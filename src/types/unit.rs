//! Semantic units: the syntactic constructs chunk boundaries are drawn on.

use serde::{Deserialize, Serialize};

/// Closed set of unit kinds recognized across all supported grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Function,
    Method,
    Class,
    /// HTTP route registration such as `app.get("/users", handler)`
    Route,
    /// React-style hook definition or top-level hook call
    Hook,
    /// One or more consecutive import statements
    ImportBlock,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Function => "function",
            UnitKind::Method => "method",
            UnitKind::Class => "class",
            UnitKind::Route => "route",
            UnitKind::Hook => "hook",
            UnitKind::ImportBlock => "import_block",
        }
    }
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit extracted from one file.
///
/// Units of a file are ordered, non-overlapping, and together cover the
/// file except for whitespace-only gaps. Offsets are byte offsets into the
/// file content; `raw_text == content[start_offset..end_offset]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticUnit {
    pub kind: UnitKind,
    pub name: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub raw_text: String,
}

impl SemanticUnit {
    pub fn len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.start_offset == self.end_offset
    }

    /// Lightweight reference stored on chunks.
    pub fn to_ref(&self) -> UnitRef {
        UnitRef {
            kind: self.kind,
            name: self.name.clone(),
            start_offset: self.start_offset,
            end_offset: self.end_offset,
        }
    }
}

/// Reference from a chunk back to a unit it contains, without the text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitRef {
    pub kind: UnitKind,
    pub name: String,
    pub start_offset: usize,
    pub end_offset: usize,
}
