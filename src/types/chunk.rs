//! Chunk type definitions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::UnitRef;
use crate::processing::Language;

/// How a chunk's boundaries were decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplittingMethod {
    /// One or more whole units packed under the token budget
    UnitPack,
    /// A window of lines from a unit (or file) too large for one chunk
    LineWindow,
    /// The entire file as a single chunk
    WholeFile,
    /// Consecutive sentences grouped by topic similarity
    Semantic,
}

impl SplittingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplittingMethod::UnitPack => "unit_pack",
            SplittingMethod::LineWindow => "line_window",
            SplittingMethod::WholeFile => "whole_file",
            SplittingMethod::Semantic => "semantic",
        }
    }
}

/// A token-bounded slice of a source file, the unit of embedding and storage.
///
/// Chunks are regenerated wholesale when their file changes; they are
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Content hash of path, index and text
    pub id: String,

    /// Text handed to the embedding provider, including injected context
    pub page_content: String,

    /// Repository-relative path of the file this chunk came from
    pub source_file: String,

    /// Position of this chunk within its file (0-indexed)
    pub chunk_index: usize,

    /// Units contained in this chunk, in source order
    pub unit_refs: Vec<UnitRef>,

    /// Number of tokens in `page_content`
    pub token_count: usize,

    pub splitting_method: SplittingMethod,

    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Create a chunk; the id is derived from path, index and content.
    pub fn new(
        source_file: &str,
        chunk_index: usize,
        page_content: String,
        token_count: usize,
        splitting_method: SplittingMethod,
        unit_refs: Vec<UnitRef>,
        metadata: ChunkMetadata,
    ) -> Self {
        Self {
            id: chunk_id(source_file, chunk_index, &page_content),
            page_content,
            source_file: source_file.to_string(),
            chunk_index,
            unit_refs,
            token_count,
            splitting_method,
            metadata,
        }
    }

    /// Names of the units in this chunk, in order.
    pub fn unit_names(&self) -> Vec<&str> {
        self.unit_refs.iter().map(|u| u.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.page_content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.page_content.is_empty()
    }
}

/// Deterministic chunk id: hex SHA-256 over path, index and text.
pub fn chunk_id(source_file: &str, chunk_index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_file.as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk_index.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Metadata associated with a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub language: Language,

    /// Line numbers of the body in the original file (1-indexed, inclusive)
    pub line_range: (usize, usize),

    /// Byte range of the body in the original file
    pub byte_range: (usize, usize),

    /// Whether the file's import block was prepended as shared context
    #[serde(default)]
    pub import_context: bool,
}

impl ChunkMetadata {
    pub fn new(language: Language, line_range: (usize, usize), byte_range: (usize, usize)) -> Self {
        Self {
            language,
            line_range,
            byte_range,
            import_context: false,
        }
    }

    pub fn with_import_context(mut self, injected: bool) -> Self {
        self.import_context = injected;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_deterministic() {
        let a = chunk_id("src/lib.rs", 0, "fn main() {}");
        let b = chunk_id("src/lib.rs", 0, "fn main() {}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_chunk_id_depends_on_every_part() {
        let base = chunk_id("src/lib.rs", 0, "fn main() {}");
        assert_ne!(base, chunk_id("src/main.rs", 0, "fn main() {}"));
        assert_ne!(base, chunk_id("src/lib.rs", 1, "fn main() {}"));
        assert_ne!(base, chunk_id("src/lib.rs", 0, "fn main() { }"));
    }
}
