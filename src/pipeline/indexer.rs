//! Per-file indexing: chunk, embed, store.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::batch::FileProcessor;
use crate::chunkers::Chunker;
use crate::error::{IngestError, ProviderError, QueueError};
use crate::output::{EmbeddingProvider, LexicalRow, LexicalStore, StoreScope, VectorIndex, VectorMetadata, VectorRecord};
use crate::queue::{BackoffPolicy, RequestQueue};
use crate::types::{Chunk, ChunkConfig, Namespace, SourceFile};

/// Collaborators and settings shared by every file of a run.
pub struct FileIndexer {
    pub(crate) chunker: Arc<dyn Chunker>,
    pub(crate) chunk_config: ChunkConfig,
    pub(crate) embedder: Arc<dyn EmbeddingProvider>,
    pub(crate) vectors: Arc<dyn VectorIndex>,
    pub(crate) lexical: Arc<dyn LexicalStore>,
    pub(crate) queue: Arc<RequestQueue>,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) max_retries: u32,
    pub(crate) embed_batch_size: usize,
    pub(crate) namespace: Namespace,
    pub(crate) scope: StoreScope,
}

impl FileIndexer {
    /// Rate-limited call with retry on transient errors.
    async fn call<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.backoff
            .retry(self.max_retries, operation, || async {
                match self.queue.enqueue(|| async { Ok::<_, QueueError>(op().await) }).await {
                    Ok(result) => result,
                    Err(err) => Err(ProviderError::Rejected {
                        service: "request_queue",
                        message: err.to_string(),
                    }),
                }
            })
            .await
    }

    /// Direct store call with retry; the relational store is not rate-limited.
    async fn store_call<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.backoff.retry(self.max_retries, operation, op).await
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.embed_batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.page_content.clone()).collect();
            let embedded = self.call("embed", || self.embedder.embed_batch(&texts)).await?;
            if embedded.len() != texts.len() {
                return Err(ProviderError::Malformed {
                    service: "embedding",
                    message: format!("expected {} vectors, got {}", texts.len(), embedded.len()),
                });
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    /// Remove every record of one file from both stores. Returns how many
    /// chunks were removed.
    ///
    /// Vectors go first: the lexical rows are the only record of a file's
    /// chunk ids, so they are kept until the vector delete has succeeded.
    pub async fn remove_file(&self, path: &str) -> Result<usize, IngestError> {
        let ids = self
            .store_call("lexical_ids", || self.lexical.chunk_ids_for_file(&self.scope, path))
            .await?;
        if !ids.is_empty() {
            self.call("vector_delete", || self.vectors.delete(&self.namespace, &ids))
                .await?;
        }
        self.store_call("lexical_delete", || self.lexical.delete_file(&self.scope, path))
            .await?;
        debug!(path, chunks = ids.len(), "Removed file records");
        Ok(ids.len())
    }
}

#[async_trait]
impl FileProcessor for FileIndexer {
    async fn process_file(&self, file: &SourceFile) -> Result<Vec<Chunk>> {
        let chunker = Arc::clone(&self.chunker);
        let config = self.chunk_config.clone();
        let owned = file.clone();
        let chunks = tokio::task::spawn_blocking(move || chunker.chunk(&owned, &config))
            .await
            .context("chunking task failed")?;

        let vectors = self.embed_chunks(&chunks).await?;
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                id: chunk.id.clone(),
                vector,
                metadata: VectorMetadata::from(chunk),
            })
            .collect();

        let previous = self
            .store_call("lexical_ids", || self.lexical.chunk_ids_for_file(&self.scope, &file.path))
            .await?;

        if !records.is_empty() {
            self.call("vector_upsert", || self.vectors.upsert(&self.namespace, records.clone()))
                .await?;
        }

        // Stale vectors go before the rows that name them are replaced.
        let current: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<String> = previous
            .into_iter()
            .filter(|id| !current.contains(id.as_str()))
            .collect();
        if !stale.is_empty() {
            self.call("vector_delete", || self.vectors.delete(&self.namespace, &stale))
                .await?;
        }

        let rows: Vec<LexicalRow> = chunks.iter().map(LexicalRow::from).collect();
        self.store_call("lexical_replace", || {
            self.lexical
                .replace_file_chunks(&self.scope, &file.path, rows.clone())
        })
        .await?;

        debug!(
            path = %file.path,
            language = %file.language.as_str(),
            chunks = chunks.len(),
            stale = stale.len(),
            "Indexed file"
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunkers::AstChunker;
    use crate::output::{HashingEmbedder, InMemoryLexicalStore, InMemoryVectorIndex};
    use crate::output::VectorMatch;
    use crate::queue::QueueConfig;
    use crate::types::SearchFilters;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FlakyEmbedder {
        inner: HashingEmbedder,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        fn model_name(&self) -> &str {
            "flaky"
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ProviderError::RateLimited { service: "embedding" });
            }
            self.inner.embed_batch(texts).await
        }
    }

    /// In-memory index whose deletes are refused while `refuse_deletes` is set.
    #[derive(Default)]
    struct DeleteRefusingIndex {
        inner: InMemoryVectorIndex,
        refuse_deletes: AtomicBool,
    }

    #[async_trait]
    impl VectorIndex for DeleteRefusingIndex {
        async fn upsert(&self, namespace: &Namespace, records: Vec<VectorRecord>) -> Result<(), ProviderError> {
            self.inner.upsert(namespace, records).await
        }

        async fn query(
            &self,
            namespace: &Namespace,
            vector: &[f32],
            top_k: usize,
            filters: &SearchFilters,
        ) -> Result<Vec<VectorMatch>, ProviderError> {
            self.inner.query(namespace, vector, top_k, filters).await
        }

        async fn delete(&self, namespace: &Namespace, ids: &[String]) -> Result<(), ProviderError> {
            if self.refuse_deletes.load(Ordering::SeqCst) {
                return Err(ProviderError::Rejected {
                    service: "vector_index",
                    message: "forbidden".to_string(),
                });
            }
            self.inner.delete(namespace, ids).await
        }
    }

    fn indexer(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorIndex>,
        lexical: Arc<InMemoryLexicalStore>,
    ) -> FileIndexer {
        FileIndexer {
            chunker: Arc::new(AstChunker::new()),
            chunk_config: ChunkConfig::with_max_tokens(64),
            embedder,
            vectors,
            lexical,
            queue: Arc::new(RequestQueue::new(QueueConfig::default())),
            backoff: BackoffPolicy::default(),
            max_retries: 3,
            embed_batch_size: 2,
            namespace: Namespace::new("acme", "api", "main").unwrap(),
            scope: StoreScope::new("user-1", "acme_api_main"),
        }
    }

    const V1: &str = "def first():\n    return 1\n\n\ndef second():\n    return 2\n\n\ndef third():\n    return 3\n";
    const V2: &str = "def first():\n    return 1\n";

    #[tokio::test(start_paused = true)]
    async fn test_reindexing_replaces_stale_records() {
        let vectors = Arc::new(InMemoryVectorIndex::new());
        let lexical = Arc::new(InMemoryLexicalStore::new());
        let indexer = indexer(Arc::new(HashingEmbedder::new(32)), vectors.clone(), lexical.clone());

        let first = indexer.process_file(&SourceFile::new("app.py", V1)).await.unwrap();
        assert!(!first.is_empty());
        assert_eq!(vectors.len(&indexer.namespace), first.len());
        assert_eq!(lexical.row_count(&indexer.scope), first.len());

        let second = indexer.process_file(&SourceFile::new("app.py", V2)).await.unwrap();
        assert_eq!(vectors.len(&indexer.namespace), second.len());
        assert_eq!(lexical.row_count(&indexer.scope), second.len());
        for chunk in &second {
            assert!(vectors.contains(&indexer.namespace, &chunk.id));
        }

        // Same content again is idempotent.
        let again = indexer.process_file(&SourceFile::new("app.py", V2)).await.unwrap();
        assert_eq!(again, second);
        assert_eq!(vectors.len(&indexer.namespace), second.len());

        let removed = indexer.remove_file("app.py").await.unwrap();
        assert_eq!(removed, second.len());
        assert_eq!(vectors.len(&indexer.namespace), 0);
        assert_eq!(lexical.row_count(&indexer.scope), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_embedding_errors_are_retried() {
        let embedder = Arc::new(FlakyEmbedder {
            inner: HashingEmbedder::new(32),
            failures_left: AtomicU32::new(2),
        });
        let vectors = Arc::new(InMemoryVectorIndex::new());
        let lexical = Arc::new(InMemoryLexicalStore::new());
        let indexer = indexer(embedder, vectors.clone(), lexical);

        let chunks = indexer.process_file(&SourceFile::new("app.py", V2)).await.unwrap();
        assert_eq!(vectors.len(&indexer.namespace), chunks.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_embedding_errors_fail_the_file() {
        let embedder = Arc::new(FlakyEmbedder {
            inner: HashingEmbedder::new(32),
            failures_left: AtomicU32::new(100),
        });
        let vectors = Arc::new(InMemoryVectorIndex::new());
        let lexical = Arc::new(InMemoryLexicalStore::new());
        let indexer = indexer(embedder, vectors.clone(), lexical.clone());

        let err = indexer.process_file(&SourceFile::new("app.py", V2)).await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
        assert_eq!(vectors.len(&indexer.namespace), 0);
        assert_eq!(lexical.row_count(&indexer.scope), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_vector_delete_keeps_ids_for_a_later_removal() {
        let vectors = Arc::new(DeleteRefusingIndex::default());
        let lexical = Arc::new(InMemoryLexicalStore::new());
        let indexer = indexer(Arc::new(HashingEmbedder::new(32)), vectors.clone(), lexical.clone());

        let chunks = indexer.process_file(&SourceFile::new("old.py", V1)).await.unwrap();
        vectors.refuse_deletes.store(true, Ordering::SeqCst);

        let err = indexer.remove_file("old.py").await.unwrap_err();
        assert!(err.to_string().contains("forbidden"));
        assert_eq!(vectors.inner.len(&indexer.namespace), chunks.len());
        assert_eq!(lexical.row_count(&indexer.scope), chunks.len());
        assert_eq!(lexical.list_files(&indexer.scope).await.unwrap(), vec!["old.py"]);

        vectors.refuse_deletes.store(false, Ordering::SeqCst);
        assert_eq!(indexer.remove_file("old.py").await.unwrap(), chunks.len());
        assert_eq!(vectors.inner.len(&indexer.namespace), 0);
        assert_eq!(lexical.row_count(&indexer.scope), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_stale_delete_keeps_previous_rows() {
        let vectors = Arc::new(DeleteRefusingIndex::default());
        let lexical = Arc::new(InMemoryLexicalStore::new());
        let indexer = indexer(Arc::new(HashingEmbedder::new(32)), vectors.clone(), lexical.clone());

        let first = indexer.process_file(&SourceFile::new("app.py", V1)).await.unwrap();
        vectors.refuse_deletes.store(true, Ordering::SeqCst);
        assert!(indexer.process_file(&SourceFile::new("app.py", V2)).await.is_err());
        let ids = lexical.chunk_ids_for_file(&indexer.scope, "app.py").await.unwrap();
        assert_eq!(ids.len(), first.len());

        vectors.refuse_deletes.store(false, Ordering::SeqCst);
        let second = indexer.process_file(&SourceFile::new("app.py", V2)).await.unwrap();
        assert_eq!(vectors.inner.len(&indexer.namespace), second.len());
        assert_eq!(lexical.row_count(&indexer.scope), second.len());
    }
}
