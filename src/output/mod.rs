//! External collaborators chunks are sent to: the embedding provider, the
//! vector index and the relational store. Stores come in an in-memory and a
//! SQLite-backed flavour.

mod embedding_client;
mod lexical_store;
mod sqlite_store;
mod vector_index;

pub use embedding_client::{EmbeddingProvider, HashingEmbedder, HttpEmbeddingProvider};
pub use lexical_store::{terms, InMemoryLexicalStore, LexicalMatch, LexicalRow, LexicalStore, StoreScope};
pub use vector_index::{InMemoryVectorIndex, VectorIndex, VectorMatch, VectorMetadata, VectorRecord};
pub use sqlite_store::{connect, migrate, SqliteLexicalStore, SqliteVectorIndex};
