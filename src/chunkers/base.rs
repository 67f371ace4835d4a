//! Base trait for chunkers and token counting.

use anyhow::Result;

use crate::types::{Chunk, ChunkConfig, SourceFile};

/// The core trait that all chunkers implement.
///
/// Chunking never fails: files the AST engine cannot handle degrade to
/// line windows or text splitting instead of erroring.
pub trait Chunker: Send + Sync {
    /// Get the name of this chunker.
    fn name(&self) -> &'static str;

    /// Split a file into token-bounded chunks, in source order.
    ///
    /// Same file and same config produce byte-identical chunks.
    fn chunk(&self, file: &SourceFile, config: &ChunkConfig) -> Vec<Chunk>;
}

/// Token counter trait for counting tokens in text.
pub trait TokenCounter: Send + Sync {
    /// Count the number of tokens in the given text.
    fn count_tokens(&self, text: &str) -> usize;

    /// Encode text into token IDs.
    fn encode(&self, text: &str) -> Vec<usize>;

    /// Decode token IDs back to text.
    fn decode(&self, tokens: &[usize]) -> String;
}

/// Default token counter using tiktoken (cl100k_base encoding).
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenCounter {
    /// Create a new token counter with the cl100k_base encoding.
    pub fn new() -> Self {
        // The BPE table ships inside tiktoken-rs; loading it cannot fail at runtime.
        let bpe = tiktoken_rs::cl100k_base().expect("Failed to load cl100k_base encoding");
        Self { bpe }
    }

    /// Create a token counter with a specific encoding.
    pub fn with_encoding(encoding_name: &str) -> Result<Self> {
        let bpe = match encoding_name {
            "cl100k_base" => tiktoken_rs::cl100k_base()?,
            "p50k_base" => tiktoken_rs::p50k_base()?,
            "r50k_base" => tiktoken_rs::r50k_base()?,
            other => anyhow::bail!("unknown tiktoken encoding: {other}"),
        };
        Ok(Self { bpe })
    }
}

impl Default for TiktokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn encode(&self, text: &str) -> Vec<usize> {
        self.bpe.encode_ordinary(text)
    }

    fn decode(&self, tokens: &[usize]) -> String {
        self.bpe.decode(tokens.to_vec()).unwrap_or_default()
    }
}

lazy_static::lazy_static! {
    static ref COUNTER: TiktokenCounter = TiktokenCounter::new();
}

/// Count tokens using the process-wide default counter.
pub fn count_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    COUNTER.count_tokens(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_tokens() {
        assert_eq!(count_tokens(""), 0);
        assert!(count_tokens("fn main() { println!(\"hi\"); }") > 5);
    }

    #[test]
    fn test_encode_decode() {
        let counter = TiktokenCounter::new();
        let text = "def handler(request):\n    return None\n";
        let tokens = counter.encode(text);
        assert_eq!(tokens.len(), counter.count_tokens(text));
        assert_eq!(counter.decode(&tokens), text);
    }

    #[test]
    fn test_with_encoding_rejects_unknown_names() {
        assert!(TiktokenCounter::with_encoding("cl100k_base").is_ok());
        assert!(TiktokenCounter::with_encoding("p50k_base").is_ok());
        let err = TiktokenCounter::with_encoding("o200k_typo").err().unwrap();
        assert!(err.to_string().contains("o200k_typo"));
    }
}
