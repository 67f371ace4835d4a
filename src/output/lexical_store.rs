//! Relational store seam with ranked full-text search.
//!
//! Rows are keyed by `(user_id, repo_id, file_path, chunk_index)`. The
//! in-memory implementation maintains its term index on write, standing in
//! for a store-side trigger, and ranks with BM25.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::ProviderError;
use crate::processing::Language;
use crate::types::{Chunk, SearchFilters};

const K1: f64 = 1.2;
const B: f64 = 0.75;

/// Store partition: one user's view of one repository namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreScope {
    pub user_id: String,
    pub repo_id: String,
}

impl StoreScope {
    pub fn new(user_id: impl Into<String>, repo_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            repo_id: repo_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalRow {
    pub chunk_id: String,
    pub file_path: String,
    pub chunk_index: usize,
    pub content: String,
    pub token_count: usize,
    pub language: Language,
    pub metadata: serde_json::Value,
}

impl From<&Chunk> for LexicalRow {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            file_path: chunk.source_file.clone(),
            chunk_index: chunk.chunk_index,
            content: chunk.page_content.clone(),
            token_count: chunk.token_count,
            language: chunk.metadata.language,
            metadata: serde_json::json!({
                "unit_names": chunk.unit_names(),
                "splitting_method": chunk.splitting_method.as_str(),
                "line_range": chunk.metadata.line_range,
                "import_context": chunk.metadata.import_context,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexicalMatch {
    pub chunk_id: String,
    pub file_path: String,
    pub content: String,
    pub language: Language,
    pub score: f64,
}

#[async_trait]
pub trait LexicalStore: Send + Sync {
    /// Replace every row of one file. Returns the chunk ids that were there
    /// before.
    async fn replace_file_chunks(
        &self,
        scope: &StoreScope,
        file_path: &str,
        rows: Vec<LexicalRow>,
    ) -> Result<Vec<String>, ProviderError>;

    async fn chunk_ids_for_file(&self, scope: &StoreScope, file_path: &str) -> Result<Vec<String>, ProviderError>;

    /// Remove a file's rows, returning their chunk ids.
    async fn delete_file(&self, scope: &StoreScope, file_path: &str) -> Result<Vec<String>, ProviderError>;

    async fn list_files(&self, scope: &StoreScope) -> Result<Vec<String>, ProviderError>;

    /// Ranked full-text search, best first. Rows matching no query term are
    /// not returned.
    async fn search(
        &self,
        scope: &StoreScope,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<LexicalMatch>, ProviderError>;
}

/// Search terms of a text: lowercase words, with `snake_case` identifiers
/// also contributing their parts.
pub fn terms(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in text.unicode_words() {
        let word = word.to_lowercase();
        if word.contains('_') {
            out.extend(word.split('_').filter(|p| !p.is_empty()).map(str::to_string));
        }
        out.push(word);
    }
    out
}

struct IndexedRow {
    row: LexicalRow,
    term_freq: HashMap<String, usize>,
    length: usize,
}

impl IndexedRow {
    fn new(row: LexicalRow) -> Self {
        let words = terms(&row.content);
        let length = words.len();
        let mut term_freq = HashMap::new();
        for word in words {
            *term_freq.entry(word).or_insert(0) += 1;
        }
        Self { row, term_freq, length }
    }
}

type Rows = BTreeMap<(String, usize), IndexedRow>;

#[derive(Default)]
pub struct InMemoryLexicalStore {
    scopes: RwLock<HashMap<StoreScope, Rows>>,
}

impl InMemoryLexicalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self, scope: &StoreScope) -> usize {
        self.scopes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scope)
            .map_or(0, BTreeMap::len)
    }
}

fn file_ids(rows: &Rows, file_path: &str) -> Vec<String> {
    rows.iter()
        .filter(|((path, _), _)| path == file_path)
        .map(|(_, r)| r.row.chunk_id.clone())
        .collect()
}

fn remove_file(rows: &mut Rows, file_path: &str) -> Vec<String> {
    let removed = file_ids(rows, file_path);
    rows.retain(|(path, _), _| path != file_path);
    removed
}

#[async_trait]
impl LexicalStore for InMemoryLexicalStore {
    async fn replace_file_chunks(
        &self,
        scope: &StoreScope,
        file_path: &str,
        rows: Vec<LexicalRow>,
    ) -> Result<Vec<String>, ProviderError> {
        let mut scopes = self.scopes.write().unwrap_or_else(PoisonError::into_inner);
        let stored = scopes.entry(scope.clone()).or_default();
        let previous = remove_file(stored, file_path);
        for row in rows {
            stored.insert((file_path.to_string(), row.chunk_index), IndexedRow::new(row));
        }
        Ok(previous)
    }

    async fn chunk_ids_for_file(&self, scope: &StoreScope, file_path: &str) -> Result<Vec<String>, ProviderError> {
        let scopes = self.scopes.read().unwrap_or_else(PoisonError::into_inner);
        Ok(scopes.get(scope).map(|rows| file_ids(rows, file_path)).unwrap_or_default())
    }

    async fn delete_file(&self, scope: &StoreScope, file_path: &str) -> Result<Vec<String>, ProviderError> {
        let mut scopes = self.scopes.write().unwrap_or_else(PoisonError::into_inner);
        Ok(scopes
            .get_mut(scope)
            .map(|rows| remove_file(rows, file_path))
            .unwrap_or_default())
    }

    async fn list_files(&self, scope: &StoreScope) -> Result<Vec<String>, ProviderError> {
        let scopes = self.scopes.read().unwrap_or_else(PoisonError::into_inner);
        let mut files: Vec<String> = scopes
            .get(scope)
            .map(|rows| rows.keys().map(|(path, _)| path.clone()).collect())
            .unwrap_or_default();
        files.dedup();
        Ok(files)
    }

    async fn search(
        &self,
        scope: &StoreScope,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<LexicalMatch>, ProviderError> {
        let mut query_terms = terms(query);
        query_terms.sort();
        query_terms.dedup();

        let scopes = self.scopes.read().unwrap_or_else(PoisonError::into_inner);
        let Some(rows) = scopes.get(scope) else {
            return Ok(Vec::new());
        };
        if query_terms.is_empty() || rows.is_empty() {
            return Ok(Vec::new());
        }

        let n = rows.len() as f64;
        let avg_len = rows.values().map(|r| r.length).sum::<usize>() as f64 / n;
        let idf: HashMap<&str, f64> = query_terms
            .iter()
            .map(|t| {
                let df = rows.values().filter(|r| r.term_freq.contains_key(t)).count() as f64;
                (t.as_str(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        let mut matches: Vec<LexicalMatch> = rows
            .values()
            .filter(|r| filters.matches(&r.row.file_path, r.row.language))
            .filter_map(|r| {
                let norm = 1.0 - B + B * r.length as f64 / avg_len.max(1.0);
                let score: f64 = query_terms
                    .iter()
                    .filter_map(|t| {
                        let tf = *r.term_freq.get(t)? as f64;
                        Some(idf[t.as_str()] * tf * (K1 + 1.0) / (tf + K1 * norm))
                    })
                    .sum();
                (score > 0.0).then(|| LexicalMatch {
                    chunk_id: r.row.chunk_id.clone(),
                    file_path: r.row.file_path.clone(),
                    content: r.row.content.clone(),
                    language: r.row.language,
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(limit);
        Ok(matches)
    }
}
