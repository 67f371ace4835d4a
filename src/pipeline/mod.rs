//! Repository ingestion: strategy selection, per-file indexing and the
//! worker pool, wired to the external collaborators.

mod indexer;
mod ingest;
mod repository;

pub use indexer::FileIndexer;
pub use ingest::{IngestRequest, IngestionFailure, IngestionPipeline, IngestionSummary};
pub use repository::{parse_name_status, LocalRepository, RepositorySource};
