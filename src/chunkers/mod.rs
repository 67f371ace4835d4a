//! Chunking of source files into token-bounded pieces.

mod ast_chunker;
mod base;
pub mod line_window;
pub mod semantic_text;

pub use ast_chunker::AstChunker;
pub use base::{count_tokens, Chunker, TiktokenCounter, TokenCounter};
pub use line_window::{line_windows, LineIndex};
pub use semantic_text::{cosine_similarity, hashed_embedding, HashingEncoder, SentenceEncoder};
