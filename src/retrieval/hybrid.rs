//! Hybrid retrieval: vector and lexical search run concurrently and are
//! fused into one ranked list.
//!
//! Either source may fail or time out; the engine then answers from the
//! other. Only when both fail does the caller get
//! [`RetrievalError::Unavailable`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::fusion::{fuse, limit_per_file, Candidate, RetrievalResult};
use crate::error::RetrievalError;
use crate::output::{EmbeddingProvider, LexicalStore, StoreScope, VectorIndex};
use crate::types::{Namespace, PipelineConfig, SearchFilters};

/// Each source is asked for this many times `k` candidates, leaving room for
/// filtering and per-file deduplication.
const CANDIDATE_MULTIPLIER: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    pub namespace: Namespace,
    pub k: usize,
    #[serde(default)]
    pub filters: SearchFilters,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, namespace: Namespace, k: usize) -> Self {
        Self {
            query: query.into(),
            namespace,
            k,
            filters: SearchFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub user_id: String,
    pub subquery_timeout: Duration,
    pub corroboration_bonus: f64,
    /// Zero disables per-file deduplication
    pub max_chunks_per_file: usize,
}

impl From<&PipelineConfig> for RetrievalConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            user_id: config.user_id.clone(),
            subquery_timeout: Duration::from_millis(config.subquery_timeout_ms),
            corroboration_bonus: config.corroboration_bonus,
            max_chunks_per_file: config.max_chunks_per_file,
        }
    }
}

pub struct HybridRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    lexical: Arc<dyn LexicalStore>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorIndex>,
        lexical: Arc<dyn LexicalStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            vectors,
            lexical,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve the `k` best chunks for a query.
    ///
    /// An empty list means no matches.
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(RetrievalError::InvalidQuery("query is empty".to_string()));
        }
        if request.k == 0 {
            return Err(RetrievalError::InvalidQuery("k must be greater than zero".to_string()));
        }

        let fetch = request.k.saturating_mul(CANDIDATE_MULTIPLIER);
        let (vector, lexical) = tokio::join!(
            with_timeout(self.config.subquery_timeout, self.vector_candidates(query, request, fetch)),
            with_timeout(self.config.subquery_timeout, self.lexical_candidates(query, request, fetch)),
        );

        let (vector, lexical) = match (vector, lexical) {
            (Ok(v), Ok(l)) => (v, l),
            (Ok(v), Err(lexical_err)) => {
                warn!(namespace = %request.namespace, error = %lexical_err, "Lexical search failed, using vector results only");
                (v, Vec::new())
            }
            (Err(vector_err), Ok(l)) => {
                warn!(namespace = %request.namespace, error = %vector_err, "Vector search failed, using lexical results only");
                (Vec::new(), l)
            }
            (Err(vector), Err(lexical)) => {
                error!(namespace = %request.namespace, %vector, %lexical, "Both retrieval sources failed");
                return Err(RetrievalError::Unavailable { vector, lexical });
            }
        };

        debug!(vector = vector.len(), lexical = lexical.len(), "Fusing candidates");
        let fused: Vec<RetrievalResult> = fuse(vector, lexical, self.config.corroboration_bonus)
            .into_iter()
            .filter(|r| request.filters.matches(&r.file_path, r.language))
            .collect();
        let mut results = limit_per_file(fused, self.config.max_chunks_per_file);
        results.truncate(request.k);

        info!(
            namespace = %request.namespace,
            k = request.k,
            returned = results.len(),
            "Retrieval complete"
        );
        Ok(results)
    }

    async fn vector_candidates(
        &self,
        query: &str,
        request: &RetrievalRequest,
        top_k: usize,
    ) -> Result<Vec<Candidate>, String> {
        let vector = self.embedder.embed(query).await.map_err(|e| e.to_string())?;
        let matches = self
            .vectors
            .query(&request.namespace, &vector, top_k, &request.filters)
            .await
            .map_err(|e| e.to_string())?;

        Ok(matches
            .into_iter()
            .map(|m| Candidate {
                chunk_id: m.id,
                file_path: m.metadata.path,
                page_content: m.metadata.page_content,
                language: m.metadata.language,
                raw_score: f64::from(m.score),
            })
            .collect())
    }

    async fn lexical_candidates(
        &self,
        query: &str,
        request: &RetrievalRequest,
        limit: usize,
    ) -> Result<Vec<Candidate>, String> {
        let scope = StoreScope::new(&self.config.user_id, request.namespace.as_str());
        let matches = self
            .lexical
            .search(&scope, query, limit, &request.filters)
            .await
            .map_err(|e| e.to_string())?;

        Ok(matches
            .into_iter()
            .map(|m| Candidate {
                chunk_id: m.chunk_id,
                file_path: m.file_path,
                page_content: m.content,
                language: m.language,
                raw_score: m.score,
            })
            .collect())
    }
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, String>>,
) -> Result<T, String> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
    }
}
