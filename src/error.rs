//! Error types for the ingestion and retrieval pipeline.

use thiserror::Error;

use crate::processing::Language;

/// Construction-time configuration errors. Raised before any work starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Failure of an external collaborator: embedding provider, vector index or
/// relational store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{service} rate limited")]
    RateLimited { service: &'static str },

    #[error("{service} request timed out")]
    Timeout { service: &'static str },

    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },

    #[error("{service} rejected request: {message}")]
    Rejected {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned a malformed response: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },
}

impl ProviderError {
    /// Transient errors are retried by callers with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Timeout { .. }
                | ProviderError::Unavailable { .. }
        )
    }

    pub fn service(&self) -> &'static str {
        match self {
            ProviderError::RateLimited { service }
            | ProviderError::Timeout { service }
            | ProviderError::Unavailable { service, .. }
            | ProviderError::Rejected { service, .. }
            | ProviderError::Malformed { service, .. } => service,
        }
    }
}

/// Reasons the AST engine could not produce semantic units for a file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no grammar available for {0}")]
    Unsupported(Language),

    #[error("failed to load {0} grammar")]
    Grammar(Language),

    #[error("parser produced no tree")]
    NoTree,

    #[error("{count} syntax error(s), first at line {line}")]
    Syntax { count: usize, line: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("request queue closed before the task was admitted")]
    Closed,
}

/// Retrieval fails only when no source could answer.
///
/// An empty result list means "no matches"; this error means "service down".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("retrieval unavailable: vector search failed ({vector}); lexical search failed ({lexical})")]
    Unavailable { vector: String, lexical: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("repository error: {0}")]
    Repository(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited { service: "embedding" }.is_transient());
        assert!(ProviderError::Timeout { service: "vector_index" }.is_transient());
        assert!(!ProviderError::Rejected {
            service: "embedding",
            message: "bad input".into()
        }
        .is_transient());
    }

    #[test]
    fn test_unavailable_message_names_both_sources() {
        let err = RetrievalError::Unavailable {
            vector: "timeout".into(),
            lexical: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("timeout"));
        assert!(msg.contains("connection refused"));
    }
}
