//! SQLite-backed persistent stores.
//!
//! One database file holds both the relational chunk rows and the vector
//! records, so consecutive CLI runs see what earlier runs indexed.
//!
//! # Schema
//!
//! - `chunk_rows`: one row per chunk, keyed by
//!   `(user_id, repo_id, file_path, chunk_index)`.
//! - `chunk_rows_fts`: FTS5 external-content index over `chunk_rows.content`,
//!   kept in sync by insert/update/delete triggers.
//! - `vector_records`: embeddings as little-endian `f32` blobs, keyed by
//!   `(namespace, chunk_id)`. Search is exhaustive cosine similarity over
//!   the namespace.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::debug;

use super::lexical_store::{terms, LexicalMatch, LexicalRow, LexicalStore, StoreScope};
use super::vector_index::{VectorIndex, VectorMatch, VectorMetadata, VectorRecord};
use crate::chunkers::cosine_similarity;
use crate::error::ProviderError;
use crate::processing::Language;
use crate::types::{Namespace, SearchFilters};

const SERVICE: &str = "sqlite";

fn store_error(err: sqlx::Error) -> ProviderError {
    match err {
        sqlx::Error::Database(db) => ProviderError::Rejected {
            service: SERVICE,
            message: db.to_string(),
        },
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            ProviderError::Malformed {
                service: SERVICE,
                message: err.to_string(),
            }
        }
        other => ProviderError::Unavailable {
            service: SERVICE,
            message: other.to_string(),
        },
    }
}

/// Open (creating if missing) the database at `path` with WAL enabled, and
/// apply the schema.
pub async fn connect(path: &Path) -> Result<SqlitePool, ProviderError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ProviderError::Unavailable {
            service: SERVICE,
            message: e.to_string(),
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(store_error)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(store_error)?;

    migrate(&pool).await?;
    debug!(path = %path.display(), "Opened index database");
    Ok(pool)
}

/// Create tables, the FTS index and its sync triggers. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<(), ProviderError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_rows (
            user_id TEXT NOT NULL,
            repo_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_id TEXT NOT NULL,
            content TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            language TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (user_id, repo_id, file_path, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(store_error)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_records (
            namespace TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            file_path TEXT NOT NULL,
            language TEXT NOT NULL,
            metadata_json TEXT NOT NULL,
            PRIMARY KEY (namespace, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(store_error)?;

    // FTS5 CREATE is not idempotent, so check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunk_rows_fts'",
    )
    .fetch_one(pool)
    .await
    .map_err(store_error)?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunk_rows_fts USING fts5(
                content,
                content='chunk_rows',
                content_rowid='rowid'
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(store_error)?;
    }

    let triggers = [
        r#"
        CREATE TRIGGER IF NOT EXISTS chunk_rows_ai AFTER INSERT ON chunk_rows BEGIN
            INSERT INTO chunk_rows_fts(rowid, content) VALUES (new.rowid, new.content);
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS chunk_rows_ad AFTER DELETE ON chunk_rows BEGIN
            INSERT INTO chunk_rows_fts(chunk_rows_fts, rowid, content)
            VALUES ('delete', old.rowid, old.content);
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS chunk_rows_au AFTER UPDATE ON chunk_rows BEGIN
            INSERT INTO chunk_rows_fts(chunk_rows_fts, rowid, content)
            VALUES ('delete', old.rowid, old.content);
            INSERT INTO chunk_rows_fts(rowid, content) VALUES (new.rowid, new.content);
        END
        "#,
        "CREATE INDEX IF NOT EXISTS idx_chunk_rows_chunk_id ON chunk_rows(chunk_id)",
    ];
    for statement in triggers {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(store_error)?;
    }

    Ok(())
}

/// Quote each search term as an FTS5 string and OR them together.
///
/// `None` when the query has no searchable terms.
fn fts_query(query: &str) -> Option<String> {
    let unique: BTreeSet<String> = terms(query).into_iter().collect();
    if unique.is_empty() {
        return None;
    }
    Some(
        unique
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Relational chunk store with trigger-maintained full-text search.
pub struct SqliteLexicalStore {
    pool: SqlitePool,
}

impl SqliteLexicalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LexicalStore for SqliteLexicalStore {
    async fn replace_file_chunks(
        &self,
        scope: &StoreScope,
        file_path: &str,
        rows: Vec<LexicalRow>,
    ) -> Result<Vec<String>, ProviderError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let previous: Vec<String> = sqlx::query_scalar(
            "SELECT chunk_id FROM chunk_rows WHERE user_id = ? AND repo_id = ? AND file_path = ? ORDER BY chunk_index",
        )
        .bind(&scope.user_id)
        .bind(&scope.repo_id)
        .bind(file_path)
        .fetch_all(&mut *tx)
        .await
        .map_err(store_error)?;

        sqlx::query("DELETE FROM chunk_rows WHERE user_id = ? AND repo_id = ? AND file_path = ?")
            .bind(&scope.user_id)
            .bind(&scope.repo_id)
            .bind(file_path)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        for row in &rows {
            sqlx::query(
                r#"
                INSERT INTO chunk_rows (user_id, repo_id, file_path, chunk_index, chunk_id,
                                        content, token_count, language, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&scope.user_id)
            .bind(&scope.repo_id)
            .bind(file_path)
            .bind(row.chunk_index as i64)
            .bind(&row.chunk_id)
            .bind(&row.content)
            .bind(row.token_count as i64)
            .bind(row.language.as_str())
            .bind(row.metadata.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }

        tx.commit().await.map_err(store_error)?;
        Ok(previous)
    }

    async fn chunk_ids_for_file(&self, scope: &StoreScope, file_path: &str) -> Result<Vec<String>, ProviderError> {
        sqlx::query_scalar(
            "SELECT chunk_id FROM chunk_rows WHERE user_id = ? AND repo_id = ? AND file_path = ? ORDER BY chunk_index",
        )
        .bind(&scope.user_id)
        .bind(&scope.repo_id)
        .bind(file_path)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn delete_file(&self, scope: &StoreScope, file_path: &str) -> Result<Vec<String>, ProviderError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT chunk_id FROM chunk_rows WHERE user_id = ? AND repo_id = ? AND file_path = ? ORDER BY chunk_index",
        )
        .bind(&scope.user_id)
        .bind(&scope.repo_id)
        .bind(file_path)
        .fetch_all(&mut *tx)
        .await
        .map_err(store_error)?;

        sqlx::query("DELETE FROM chunk_rows WHERE user_id = ? AND repo_id = ? AND file_path = ?")
            .bind(&scope.user_id)
            .bind(&scope.repo_id)
            .bind(file_path)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;
        Ok(ids)
    }

    async fn list_files(&self, scope: &StoreScope) -> Result<Vec<String>, ProviderError> {
        sqlx::query_scalar(
            "SELECT DISTINCT file_path FROM chunk_rows WHERE user_id = ? AND repo_id = ? ORDER BY file_path",
        )
        .bind(&scope.user_id)
        .bind(&scope.repo_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn search(
        &self,
        scope: &StoreScope,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<LexicalMatch>, ProviderError> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }
        let language = filters.language.map(|l| l.as_str());
        let prefix = filters.path_prefix.as_deref();

        let rows = sqlx::query(
            r#"
            SELECT c.chunk_id, c.file_path, c.content, c.language, bm25(chunk_rows_fts) AS bm25_score
            FROM chunk_rows_fts
            JOIN chunk_rows c ON c.rowid = chunk_rows_fts.rowid
            WHERE chunk_rows_fts MATCH ?
              AND c.user_id = ? AND c.repo_id = ?
              AND (? IS NULL OR c.language = ?)
              AND (? IS NULL OR substr(c.file_path, 1, length(?)) = ?)
            ORDER BY bm25_score, c.chunk_id
            LIMIT ?
            "#,
        )
        .bind(&fts)
        .bind(&scope.user_id)
        .bind(&scope.repo_id)
        .bind(language)
        .bind(language)
        .bind(prefix)
        .bind(prefix)
        .bind(prefix)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows
            .iter()
            .map(|row| {
                // bm25() is lower-is-better.
                let bm25_score: f64 = row.get("bm25_score");
                let language: String = row.get("language");
                LexicalMatch {
                    chunk_id: row.get("chunk_id"),
                    file_path: row.get("file_path"),
                    content: row.get("content"),
                    language: Language::from_name(&language),
                    score: -bm25_score,
                }
            })
            .collect())
    }
}

/// Encode a vector as little-endian `f32` bytes.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Persistent vector index over the `vector_records` table.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self, namespace: &Namespace) -> Result<usize, ProviderError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_records WHERE namespace = ?")
            .bind(namespace.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(count as usize)
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, namespace: &Namespace, records: Vec<VectorRecord>) -> Result<(), ProviderError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        for record in &records {
            let metadata = serde_json::to_string(&record.metadata).map_err(|e| ProviderError::Malformed {
                service: SERVICE,
                message: e.to_string(),
            })?;
            sqlx::query(
                r#"
                INSERT INTO vector_records (namespace, chunk_id, embedding, file_path, language, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(namespace, chunk_id) DO UPDATE SET
                    embedding = excluded.embedding,
                    file_path = excluded.file_path,
                    language = excluded.language,
                    metadata_json = excluded.metadata_json
                "#,
            )
            .bind(namespace.as_str())
            .bind(&record.id)
            .bind(vec_to_blob(&record.vector))
            .bind(&record.metadata.path)
            .bind(record.metadata.language.as_str())
            .bind(metadata)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }
        tx.commit().await.map_err(store_error)
    }

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<VectorMatch>, ProviderError> {
        let language = filters.language.map(|l| l.as_str());
        let prefix = filters.path_prefix.as_deref();

        let rows = sqlx::query(
            r#"
            SELECT chunk_id, embedding, metadata_json
            FROM vector_records
            WHERE namespace = ?
              AND (? IS NULL OR language = ?)
              AND (? IS NULL OR substr(file_path, 1, length(?)) = ?)
            "#,
        )
        .bind(namespace.as_str())
        .bind(language)
        .bind(language)
        .bind(prefix)
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            let metadata: VectorMetadata =
                serde_json::from_str(&metadata_json).map_err(|e| ProviderError::Malformed {
                    service: SERVICE,
                    message: e.to_string(),
                })?;
            matches.push(VectorMatch {
                id: row.get("chunk_id"),
                score: cosine_similarity(vector, &blob_to_vec(&blob)),
                metadata,
            });
        }

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, namespace: &Namespace, ids: &[String]) -> Result<(), ProviderError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        for id in ids {
            sqlx::query("DELETE FROM vector_records WHERE namespace = ? AND chunk_id = ?")
                .bind(namespace.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
        }
        tx.commit().await.map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn pool(dir: &tempfile::TempDir) -> SqlitePool {
        connect(&dir.path().join("index.db")).await.unwrap()
    }

    fn row(path: &str, index: usize, content: &str, language: Language) -> LexicalRow {
        LexicalRow {
            chunk_id: format!("{path}#{index}"),
            file_path: path.to_string(),
            chunk_index: index,
            content: content.to_string(),
            token_count: content.split_whitespace().count(),
            language,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(fts_query("  "), None);
        assert_eq!(
            fts_query("fetch_user \"now\""),
            Some("\"fetch\" OR \"fetch_user\" OR \"now\" OR \"user\"".to_string())
        );
    }

    #[test]
    fn test_blob_roundtrip() {
        let v = vec![0.5f32, -1.25, 3.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[tokio::test]
    async fn test_lexical_rows_persist_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let scope = StoreScope::new("user-1", "acme_api_main");

        {
            let store = SqliteLexicalStore::new(pool(&dir).await);
            store
                .replace_file_chunks(
                    &scope,
                    "api/users.py",
                    vec![row("api/users.py", 0, "def fetch_user(user_id): load the user record", Language::Python)],
                )
                .await
                .unwrap();
        }

        let store = SqliteLexicalStore::new(pool(&dir).await);
        assert_eq!(store.list_files(&scope).await.unwrap(), vec!["api/users.py"]);
        assert_eq!(
            store.chunk_ids_for_file(&scope, "api/users.py").await.unwrap(),
            vec!["api/users.py#0"]
        );
    }

    #[tokio::test]
    async fn test_replace_updates_fts_through_triggers() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteLexicalStore::new(pool(&dir).await);
        let scope = StoreScope::new("user-1", "acme_api_main");
        let any = SearchFilters::default();

        store
            .replace_file_chunks(&scope, "a.py", vec![row("a.py", 0, "parse the invoice totals", Language::Python)])
            .await
            .unwrap();
        assert_eq!(store.search(&scope, "invoice", 5, &any).await.unwrap().len(), 1);

        let previous = store
            .replace_file_chunks(&scope, "a.py", vec![row("a.py", 0, "render the shipping label", Language::Python)])
            .await
            .unwrap();
        assert_eq!(previous, vec!["a.py#0"]);
        assert!(store.search(&scope, "invoice", 5, &any).await.unwrap().is_empty());
        assert_eq!(store.search(&scope, "shipping", 5, &any).await.unwrap().len(), 1);

        let removed = store.delete_file(&scope, "a.py").await.unwrap();
        assert_eq!(removed, vec!["a.py#0"]);
        assert!(store.search(&scope, "shipping", 5, &any).await.unwrap().is_empty());
        assert!(store.list_files(&scope).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_and_filters_within_scope() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteLexicalStore::new(pool(&dir).await);
        let scope = StoreScope::new("user-1", "acme_api_main");
        let other = StoreScope::new("user-2", "acme_api_main");

        store
            .replace_file_chunks(
                &scope,
                "api/users.py",
                vec![row("api/users.py", 0, "fetch user by id; user cache; user record", Language::Python)],
            )
            .await
            .unwrap();
        store
            .replace_file_chunks(
                &scope,
                "web/users.js",
                vec![row("web/users.js", 0, "render a list of orders for the user", Language::JavaScript)],
            )
            .await
            .unwrap();
        store
            .replace_file_chunks(&other, "api/users.py", vec![row("api/users.py", 0, "user", Language::Python)])
            .await
            .unwrap();

        let results = store.search(&scope, "user", 10, &SearchFilters::default()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].file_path, "api/users.py");
        assert!(results[0].score > results[1].score);

        let js = SearchFilters::default().with_language(Language::JavaScript);
        let results = store.search(&scope, "user", 10, &js).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].language, Language::JavaScript);

        let api = SearchFilters::default().with_path_prefix("api/");
        let results = store.search(&scope, "user orders", 10, &api).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_path, "api/users.py");
    }

    fn record(id: &str, vector: Vec<f32>, path: &str, language: Language) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            metadata: VectorMetadata {
                path: path.to_string(),
                language,
                unit_names: vec!["fetch_user".to_string()],
                token_count: 4,
                chunk_index: 0,
                page_content: format!("contents of {path}"),
            },
        }
    }

    #[tokio::test]
    async fn test_vector_records_upsert_query_delete() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteVectorIndex::new(pool(&dir).await);
        let ns = Namespace::new("acme", "api", "main").unwrap();
        let other = Namespace::new("acme", "web", "main").unwrap();

        index
            .upsert(
                &ns,
                vec![
                    record("a", vec![1.0, 0.0], "api/users.py", Language::Python),
                    record("b", vec![0.7, 0.7], "web/cart.js", Language::JavaScript),
                    record("c", vec![0.0, 1.0], "api/orders.py", Language::Python),
                ],
            )
            .await
            .unwrap();
        index.upsert(&other, vec![record("z", vec![1.0, 0.0], "z.py", Language::Python)]).await.unwrap();
        index
            .upsert(&ns, vec![record("c", vec![0.0, -1.0], "api/orders.py", Language::Python)])
            .await
            .unwrap();
        assert_eq!(index.count(&ns).await.unwrap(), 3);

        let hits = index.query(&ns, &[1.0, 0.0], 2, &SearchFilters::default()).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(hits[0].metadata.page_content, "contents of api/users.py");
        assert_eq!(hits[0].metadata.unit_names, vec!["fetch_user"]);

        let js = SearchFilters::default().with_language(Language::JavaScript);
        let hits = index.query(&ns, &[1.0, 0.0], 10, &js).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");

        let orders = SearchFilters::default().with_path_prefix("api/orders");
        let hits = index.query(&ns, &[0.0, -1.0], 10, &orders).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        index.delete(&ns, &["a".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(index.count(&ns).await.unwrap(), 2);
        assert_eq!(index.count(&other).await.unwrap(), 1);
    }
}
