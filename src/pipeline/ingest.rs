//! Ingestion entrypoint: decide scope, read files, run the worker pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::indexer::FileIndexer;
use super::repository::RepositorySource;
use crate::batch::{BatchConfig, ProcessOptions, WorkerPool};
use crate::chunkers::{AstChunker, Chunker, HashingEncoder};
use crate::error::{ConfigError, IngestError};
use crate::output::{EmbeddingProvider, LexicalStore, StoreScope, VectorIndex};
use crate::processing::FileFilter;
use crate::queue::{BackoffPolicy, QueueConfig, RequestQueue};
use crate::retrieval::{HybridRetriever, RetrievalConfig};
use crate::strategy::{ProcessingRecommendation, SelectorConfig, Strategy, StrategySelector};
use crate::types::{Namespace, PipelineConfig, SourceFile};

/// Commit to diff against when the request names none.
const DEFAULT_CURRENT_COMMIT: &str = "HEAD";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    pub repo_url: String,
    pub branch: String,
    pub owner: String,
    pub name: String,
    /// Without a previous commit the run is always `full`
    pub previous_commit: Option<String>,
    pub current_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionFailure {
    pub path: String,
    pub error: String,
}

/// Structured outcome of one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub run_id: Uuid,
    pub namespace: String,
    pub strategy: Strategy,
    /// Present when the strategy came from a diff
    pub recommendation: Option<ProcessingRecommendation>,
    pub files_processed: usize,
    /// Filtered out, vanished, non-UTF-8, or not started before the deadline
    pub files_skipped: usize,
    pub files_deleted: usize,
    pub chunks_stored: usize,
    pub failures: Vec<IngestionFailure>,
    pub timed_out: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Repository ingestion pipeline.
///
/// Concurrent runs for different namespaces never contend. Runs for the
/// same namespace must be serialized by the caller.
pub struct IngestionPipeline {
    config: PipelineConfig,
    source: Arc<dyn RepositorySource>,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    lexical: Arc<dyn LexicalStore>,
    chunker: Arc<dyn Chunker>,
    filter: FileFilter,
    selector: StrategySelector,
    queue: Option<Arc<RequestQueue>>,
}

impl IngestionPipeline {
    /// Validates the configuration before anything runs.
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn RepositorySource>,
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorIndex>,
        lexical: Arc<dyn LexicalStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if embedder.dimensions() != config.embedding_dimensions {
            return Err(ConfigError::invalid(
                "embedding_dimensions",
                format!(
                    "configured {} but provider {} produces {}",
                    config.embedding_dimensions,
                    embedder.model_name(),
                    embedder.dimensions()
                ),
            ));
        }

        let chunker = Arc::new(AstChunker::with_encoder(Arc::new(HashingEncoder::new(
            config.embedding_dimensions,
        ))));
        let selector = StrategySelector::new(SelectorConfig::from(&config));

        Ok(Self {
            config,
            source,
            embedder,
            vectors,
            lexical,
            chunker,
            filter: FileFilter::default(),
            selector,
            queue: None,
        })
    }

    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_filter(mut self, filter: FileFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Share one request queue across runs instead of one per run.
    pub fn with_queue(mut self, queue: Arc<RequestQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Retriever over the same stores this pipeline writes to.
    pub fn retriever(&self) -> HybridRetriever {
        HybridRetriever::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.vectors),
            Arc::clone(&self.lexical),
            RetrievalConfig::from(&self.config),
        )
    }

    /// Recommend a strategy for a commit range without processing anything.
    pub async fn plan(
        &self,
        previous_commit: &str,
        current_commit: &str,
    ) -> Result<ProcessingRecommendation, IngestError> {
        let changes = self.source.diff(previous_commit, current_commit).await?;
        let repo = self.source.characteristics().await?;
        Ok(self.selector.recommend(&changes, &repo))
    }

    pub async fn process_repository(&self, request: IngestRequest) -> Result<IngestionSummary, IngestError> {
        let namespace = Namespace::new(&request.owner, &request.name, &request.branch)?;
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest", %run_id, namespace = %namespace);

        self.run(request, namespace, run_id).instrument(span).await
    }

    async fn run(
        &self,
        request: IngestRequest,
        namespace: Namespace,
        run_id: Uuid,
    ) -> Result<IngestionSummary, IngestError> {
        let started_at = Utc::now();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.run_timeout_secs);
        info!(repo_url = %request.repo_url, "Starting ingestion run");

        let mut summary = IngestionSummary {
            run_id,
            namespace: namespace.to_string(),
            strategy: Strategy::Full,
            recommendation: None,
            files_processed: 0,
            files_skipped: 0,
            files_deleted: 0,
            chunks_stored: 0,
            failures: Vec::new(),
            timed_out: false,
            started_at,
            finished_at: started_at,
        };

        let (to_index, mut to_remove) = match &request.previous_commit {
            Some(previous) => {
                let current = request.current_commit.as_deref().unwrap_or(DEFAULT_CURRENT_COMMIT);
                let changes = self.source.diff(previous, current).await?;
                let repo = self.source.characteristics().await?;
                let recommendation = self.selector.recommend(&changes, &repo);
                info!(
                    strategy = %recommendation.strategy,
                    confidence = recommendation.confidence,
                    changed = changes.len(),
                    reasoning = %recommendation.reasoning,
                    "Strategy selected"
                );
                summary.strategy = recommendation.strategy;
                summary.recommendation = Some(recommendation);

                match summary.strategy {
                    Strategy::Skip => {
                        summary.finished_at = Utc::now();
                        return Ok(summary);
                    }
                    Strategy::Incremental => (
                        changes.paths_to_index().map(str::to_string).collect(),
                        changes.paths_to_remove().map(str::to_string).collect(),
                    ),
                    Strategy::Full => (self.source.list_files().await?, Vec::new()),
                }
            }
            None => (self.source.list_files().await?, Vec::new()),
        };

        let scope = StoreScope::new(&self.config.user_id, namespace.as_str());
        if summary.strategy == Strategy::Full {
            let present: HashSet<&str> = to_index.iter().map(String::as_str).collect();
            to_remove = self
                .lexical
                .list_files(&scope)
                .await?
                .into_iter()
                .filter(|path| !present.contains(path.as_str()))
                .collect();
        }

        let queue = match &self.queue {
            Some(queue) => Arc::clone(queue),
            None => Arc::new(RequestQueue::new(QueueConfig::from(&self.config))),
        };
        let indexer = Arc::new(FileIndexer {
            chunker: Arc::clone(&self.chunker),
            chunk_config: self.config.chunk_config(),
            embedder: Arc::clone(&self.embedder),
            vectors: Arc::clone(&self.vectors),
            lexical: Arc::clone(&self.lexical),
            queue,
            backoff: BackoffPolicy::from(&self.config),
            max_retries: self.config.max_retries,
            embed_batch_size: self.config.embed_batch_size,
            namespace,
            scope,
        });

        for path in &to_remove {
            match indexer.remove_file(path).await {
                Ok(_) => summary.files_deleted += 1,
                Err(err) => {
                    warn!(path = %path, error = %err, "Failed to remove records");
                    summary.failures.push(IngestionFailure {
                        path: path.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let mut files = Vec::with_capacity(to_index.len());
        for path in to_index {
            match self.read_source_file(&path).await {
                Ok(Some(file)) => files.push(file),
                Ok(None) => summary.files_skipped += 1,
                Err(err) => {
                    warn!(path = %path, error = %err, "Failed to read file");
                    summary.failures.push(IngestionFailure {
                        path,
                        error: err.to_string(),
                    });
                }
            }
        }

        let pool = WorkerPool::new(indexer, BatchConfig::from(&self.config));
        let outcome = pool
            .process(files, ProcessOptions { deadline: Some(deadline) })
            .await;

        summary.files_processed = outcome.succeeded.len();
        summary.chunks_stored = outcome.total_chunks();
        summary.files_skipped += outcome.skipped.len();
        summary.timed_out = outcome.timed_out;
        summary.failures.extend(outcome.failed.into_iter().map(|f| IngestionFailure {
            path: f.path,
            error: f.error,
        }));
        summary.finished_at = Utc::now();

        info!(
            strategy = %summary.strategy,
            processed = summary.files_processed,
            skipped = summary.files_skipped,
            deleted = summary.files_deleted,
            failed = summary.failures.len(),
            chunks = summary.chunks_stored,
            timed_out = summary.timed_out,
            "Ingestion run complete"
        );
        Ok(summary)
    }

    /// Read and filter one path. `None` means the file is skipped.
    async fn read_source_file(&self, path: &str) -> Result<Option<SourceFile>, IngestError> {
        let Some(bytes) = self.source.read_file(path).await? else {
            debug!(path, "File vanished before it was read");
            return Ok(None);
        };

        let check = self
            .filter
            .check(path, bytes.len())
            .and_then(|()| self.filter.check_content(&bytes));
        if let Err(reason) = check {
            debug!(path, reason = %reason, "Skipping file");
            return Ok(None);
        }

        match SourceFile::from_bytes(path, bytes) {
            Some(file) => Ok(Some(file)),
            None => {
                debug!(path, "Skipping non-UTF-8 file");
                Ok(None)
            }
        }
    }
}
