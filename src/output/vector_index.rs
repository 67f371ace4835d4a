//! Vector index seam and a brute-force in-memory implementation.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunkers::cosine_similarity;
use crate::error::ProviderError;
use crate::processing::Language;
use crate::types::{Chunk, Namespace, SearchFilters};

/// Metadata stored next to each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub path: String,
    pub language: Language,
    pub unit_names: Vec<String>,
    pub token_count: usize,
    pub chunk_index: usize,
    pub page_content: String,
}

impl From<&Chunk> for VectorMetadata {
    fn from(chunk: &Chunk) -> Self {
        Self {
            path: chunk.source_file.clone(),
            language: chunk.metadata.language,
            unit_names: chunk.unit_names().into_iter().map(str::to_string).collect(),
            token_count: chunk.token_count,
            chunk_index: chunk.chunk_index,
            page_content: chunk.page_content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: VectorMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

/// Nearest-neighbour index partitioned by namespace.
///
/// Upserting an existing id overwrites it.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, namespace: &Namespace, records: Vec<VectorRecord>) -> Result<(), ProviderError>;

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<VectorMatch>, ProviderError>;

    async fn delete(&self, namespace: &Namespace, ids: &[String]) -> Result<(), ProviderError>;
}

/// In-memory index for tests and local runs. Search is exhaustive cosine
/// similarity over the namespace.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    namespaces: RwLock<HashMap<String, HashMap<String, (Vec<f32>, VectorMetadata)>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, namespace: &Namespace) -> usize {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace.as_str())
            .map_or(0, HashMap::len)
    }

    pub fn contains(&self, namespace: &Namespace, id: &str) -> bool {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace.as_str())
            .map_or(false, |records| records.contains_key(id))
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, namespace: &Namespace, records: Vec<VectorRecord>) -> Result<(), ProviderError> {
        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        let stored = namespaces.entry(namespace.as_str().to_string()).or_default();
        for record in records {
            stored.insert(record.id, (record.vector, record.metadata));
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<VectorMatch>, ProviderError> {
        let namespaces = self.namespaces.read().unwrap_or_else(PoisonError::into_inner);
        let Some(stored) = namespaces.get(namespace.as_str()) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<VectorMatch> = stored
            .iter()
            .filter(|(_, (_, meta))| filters.matches(&meta.path, meta.language))
            .map(|(id, (v, meta))| VectorMatch {
                id: id.clone(),
                score: cosine_similarity(vector, v),
                metadata: meta.clone(),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, namespace: &Namespace, ids: &[String]) -> Result<(), ProviderError> {
        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(stored) = namespaces.get_mut(namespace.as_str()) {
            for id in ids {
                stored.remove(id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(path: &str, language: Language) -> VectorMetadata {
        VectorMetadata {
            path: path.to_string(),
            language,
            unit_names: Vec::new(),
            token_count: 1,
            chunk_index: 0,
            page_content: String::new(),
        }
    }

    fn record(id: &str, vector: Vec<f32>, path: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            metadata: meta(path, Language::Rust),
        }
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity_within_namespace() {
        let index = InMemoryVectorIndex::new();
        let ns = Namespace::new("acme", "api", "main").unwrap();
        let other = Namespace::new("acme", "web", "main").unwrap();

        index
            .upsert(
                &ns,
                vec![
                    record("a", vec![1.0, 0.0], "src/a.rs"),
                    record("b", vec![0.7, 0.7], "src/b.rs"),
                    record("c", vec![0.0, 1.0], "lib/c.rs"),
                ],
            )
            .await
            .unwrap();
        index.upsert(&other, vec![record("z", vec![1.0, 0.0], "z.rs")]).await.unwrap();

        let hits = index.query(&ns, &[1.0, 0.0], 2, &SearchFilters::default()).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let filtered = index
            .query(&ns, &[1.0, 0.0], 10, &SearchFilters::default().with_path_prefix("lib/"))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "c");
    }

    #[tokio::test]
    async fn test_upsert_overwrites_and_delete_removes() {
        let index = InMemoryVectorIndex::new();
        let ns = Namespace::new("acme", "api", "main").unwrap();

        index.upsert(&ns, vec![record("a", vec![1.0, 0.0], "src/a.rs")]).await.unwrap();
        index.upsert(&ns, vec![record("a", vec![0.0, 1.0], "src/a.rs")]).await.unwrap();
        assert_eq!(index.len(&ns), 1);

        let hits = index.query(&ns, &[0.0, 1.0], 1, &SearchFilters::default()).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        index.delete(&ns, &["a".to_string()]).await.unwrap();
        assert!(!index.contains(&ns, "a"));
    }
}
