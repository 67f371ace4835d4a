//! Query-time hybrid retrieval over the vector index and lexical store.

mod fusion;
mod hybrid;

pub use fusion::{fuse, limit_per_file, normalize_scores, Candidate, RetrievalResult, SourceRank};
pub use hybrid::{HybridRetriever, RetrievalConfig, RetrievalRequest};
