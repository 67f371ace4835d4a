//! Core types for the indexing pipeline.

mod chunk;
mod config;
mod filters;
mod namespace;
mod source;
mod unit;

pub use chunk::{chunk_id, Chunk, ChunkMetadata, SplittingMethod};
pub use config::{ChunkConfig, PipelineConfig, ENV_PREFIX};
pub use filters::SearchFilters;
pub use namespace::Namespace;
pub use source::{ChangeSet, ChangeType, ChangedFile, RepoCharacteristics, SourceFile};
pub use unit::{SemanticUnit, UnitKind, UnitRef};
