//! Configuration types.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::{DEFAULT_MAX_TOKENS, DEFAULT_MIN_TOKENS, DEFAULT_OVERLAP_TOKENS};

/// Environment variable prefix for every pipeline setting.
pub const ENV_PREFIX: &str = "REPO_INDEXER";

/// Global pipeline configuration.
///
/// Flat on purpose: every key maps to one `REPO_INDEXER_<KEY>` environment
/// variable and one top-level key in a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum tokens per chunk
    pub max_tokens: usize,
    /// Chunks below this are merged with a neighbour when the budget allows
    pub min_tokens: usize,
    /// Trailing context duplicated into the next line window
    pub overlap_tokens: usize,
    pub max_units_per_chunk: usize,
    pub include_imports_in_context: bool,
    /// Topic-shift threshold for sentence grouping in the text fallback
    pub similarity_threshold: f32,

    pub max_workers: usize,
    pub files_per_batch: usize,
    pub batch_delay_ms: u64,
    /// Below this many files, ingestion runs sequentially without workers
    pub parallel_threshold: usize,
    pub run_timeout_secs: u64,

    pub max_requests_per_minute: u32,
    pub embed_batch_size: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_step_ms: u64,
    pub backoff_cap_ms: u64,

    pub incremental_file_ceiling: usize,
    pub structural_change_ceiling: usize,

    pub subquery_timeout_ms: u64,
    pub corroboration_bonus: f64,
    /// Deduplication limit after fusion; 0 disables it
    pub max_chunks_per_file: usize,

    /// Owner of the relational rows written by this pipeline
    pub user_id: String,
    pub embedding_api_url: Option<String>,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    /// Dimensions of the local hashing embedder used without an API URL
    pub embedding_dimensions: usize,
    /// SQLite file holding chunk rows and vectors between runs
    pub database_path: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            min_tokens: DEFAULT_MIN_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
            max_units_per_chunk: 8,
            include_imports_in_context: true,
            similarity_threshold: 0.5,
            max_workers: 4,
            files_per_batch: 3,
            batch_delay_ms: 1500,
            parallel_threshold: 50,
            run_timeout_secs: 30 * 60,
            max_requests_per_minute: 60,
            embed_batch_size: 32,
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_step_ms: 1000,
            backoff_cap_ms: 10_000,
            incremental_file_ceiling: 30,
            structural_change_ceiling: 3,
            subquery_timeout_ms: 5000,
            corroboration_bonus: 0.1,
            max_chunks_per_file: 1,
            user_id: String::new(),
            embedding_api_url: None,
            embedding_api_key: None,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 256,
            database_path: "repo-indexer.db".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load defaults, then an optional config file, then `REPO_INDEXER_*`
    /// environment variables, and validate the result.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Reject settings that would make the pipeline misbehave mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::Missing("user_id"));
        }
        self.chunk_config().validate()?;
        if self.max_workers == 0 {
            return Err(ConfigError::invalid("max_workers", "must be at least 1"));
        }
        if self.files_per_batch == 0 {
            return Err(ConfigError::invalid("files_per_batch", "must be at least 1"));
        }
        if self.max_requests_per_minute == 0 {
            return Err(ConfigError::invalid(
                "max_requests_per_minute",
                "must be at least 1",
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(ConfigError::invalid("embed_batch_size", "must be at least 1"));
        }
        if self.embedding_dimensions == 0 {
            return Err(ConfigError::invalid(
                "embedding_dimensions",
                "must be at least 1",
            ));
        }
        if self.database_path.trim().is_empty() {
            return Err(ConfigError::Missing("database_path"));
        }
        Ok(())
    }

    /// Chunking parameters for the per-file chunker.
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            max_tokens: self.max_tokens,
            min_tokens: self.min_tokens,
            overlap_tokens: self.overlap_tokens,
            max_units_per_chunk: self.max_units_per_chunk,
            include_imports_in_context: self.include_imports_in_context,
            similarity_threshold: self.similarity_threshold,
        }
    }
}

/// Configuration for individual chunk operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub max_tokens: usize,
    pub min_tokens: usize,
    pub overlap_tokens: usize,
    pub max_units_per_chunk: usize,
    pub include_imports_in_context: bool,
    pub similarity_threshold: f32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            min_tokens: DEFAULT_MIN_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
            max_units_per_chunk: 8,
            include_imports_in_context: true,
            similarity_threshold: 0.5,
        }
    }
}

impl ChunkConfig {
    /// Create a config with the given token budget.
    pub fn with_max_tokens(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            min_tokens: DEFAULT_MIN_TOKENS.min(max_tokens / 4),
            overlap_tokens: DEFAULT_OVERLAP_TOKENS.min(max_tokens / 4),
            ..Default::default()
        }
    }

    pub fn with_min_tokens(mut self, min_tokens: usize) -> Self {
        self.min_tokens = min_tokens;
        self
    }

    pub fn with_overlap(mut self, overlap_tokens: usize) -> Self {
        self.overlap_tokens = overlap_tokens;
        self
    }

    pub fn with_max_units(mut self, max_units_per_chunk: usize) -> Self {
        self.max_units_per_chunk = max_units_per_chunk;
        self
    }

    pub fn with_imports_in_context(mut self, include: bool) -> Self {
        self.include_imports_in_context = include;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::invalid("max_tokens", "must be at least 1"));
        }
        if self.min_tokens > self.max_tokens {
            return Err(ConfigError::invalid(
                "min_tokens",
                format!("{} exceeds max_tokens {}", self.min_tokens, self.max_tokens),
            ));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(ConfigError::invalid(
                "overlap_tokens",
                "must be smaller than max_tokens",
            ));
        }
        if self.max_units_per_chunk == 0 {
            return Err(ConfigError::invalid(
                "max_units_per_chunk",
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::invalid(
                "similarity_threshold",
                "must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PipelineConfig {
        PipelineConfig {
            user_id: "user-1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_are_valid_once_user_is_set() {
        assert!(valid().validate().is_ok());
        assert!(matches!(
            PipelineConfig::default().validate(),
            Err(ConfigError::Missing("user_id"))
        ));
    }

    #[test]
    fn test_rejects_inverted_token_bounds() {
        let config = PipelineConfig {
            min_tokens: 600,
            max_tokens: 500,
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "min_tokens", .. })
        ));
    }

    #[test]
    fn test_rejects_zero_workers_and_rate() {
        assert!(PipelineConfig { max_workers: 0, ..valid() }.validate().is_err());
        assert!(PipelineConfig { max_requests_per_minute: 0, ..valid() }
            .validate()
            .is_err());
    }

    #[test]
    fn test_chunk_config_builders() {
        let config = ChunkConfig::with_max_tokens(100)
            .with_overlap(10)
            .with_max_units(2)
            .with_imports_in_context(false);
        assert_eq!(config.max_tokens, 100);
        assert_eq!(config.min_tokens, 25);
        assert_eq!(config.overlap_tokens, 10);
        assert_eq!(config.max_units_per_chunk, 2);
        assert!(!config.include_imports_in_context);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexer.toml");
        std::fs::write(&path, "user_id = \"file-user\"\nmax_tokens = 256\nmax_workers = 2\ndatabase_path = \"data/index.db\"\n").unwrap();

        let config = PipelineConfig::load(path.to_str()).unwrap();
        assert_eq!(config.user_id, "file-user");
        assert_eq!(config.max_tokens, 256);
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.files_per_batch, 3);
        assert_eq!(config.database_path, "data/index.db");
    }

    #[test]
    fn test_rejects_blank_database_path() {
        let config = PipelineConfig {
            database_path: " ".into(),
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("database_path"))
        ));
    }
}
