//! Repository Indexer Library
//!
//! Change-aware ingestion of source repositories into token-bounded,
//! AST-aligned chunks, and hybrid (vector + lexical) retrieval over them.

pub mod ast_engine;
pub mod batch;
pub mod chunkers;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod processing;
pub mod queue;
pub mod retrieval;
pub mod strategy;
pub mod types;

pub use batch::{BatchConfig, FileProcessor, PoolOutcome, WorkerPool};
pub use chunkers::{AstChunker, Chunker};
pub use error::{ConfigError, IngestError, ProviderError, QueueError, RetrievalError};
pub use pipeline::{IngestRequest, IngestionPipeline, IngestionSummary, LocalRepository};
pub use retrieval::{HybridRetriever, RetrievalRequest, RetrievalResult, SourceRank};
pub use strategy::{ProcessingRecommendation, Strategy, StrategySelector};
pub use types::{Chunk, ChunkConfig, Namespace, PipelineConfig, SourceFile};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::batch::*;
    pub use crate::chunkers::{count_tokens, AstChunker, Chunker};
    pub use crate::error::*;
    pub use crate::output::*;
    pub use crate::pipeline::*;
    pub use crate::retrieval::*;
    pub use crate::strategy::*;
    pub use crate::types::*;
}

/// Default maximum chunk size in tokens
pub const DEFAULT_MAX_TOKENS: usize = 512;

/// Default minimum chunk size in tokens
pub const DEFAULT_MIN_TOKENS: usize = 50;

/// Default line-window overlap in tokens
pub const DEFAULT_OVERLAP_TOKENS: usize = 50;
