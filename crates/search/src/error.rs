use sift_protocol::codes;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

/// Failures returned to the caller of a query. Never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("top_k must be between 1 and {max}, got {top_k}")]
    InvalidTopK { top_k: usize, max: usize },

    #[error("Empty query")]
    EmptyQuery,

    #[error("Invalid filters: {0}")]
    InvalidFilters(String),

    #[error("No retrieval path available (vector: {vector}; keyword: {keyword})")]
    NoRetrievalPath { vector: String, keyword: String },

    #[error("Query cancelled")]
    Cancelled,

    #[error("Too many concurrent queries (waited {waited_ms} ms)")]
    Overloaded { waited_ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Stable code of the query interface.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidTopK { .. } | Self::EmptyQuery | Self::InvalidFilters(_) => {
                codes::INVALID_REQUEST
            }
            Self::NoRetrievalPath { .. } => codes::UNAVAILABLE,
            Self::Cancelled => codes::CANCELLED,
            Self::Overloaded { .. } => codes::OVERLOADED,
            Self::Internal(_) => codes::INTERNAL,
        }
    }

    #[must_use]
    pub const fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            Self::InvalidTopK { .. } | Self::EmptyQuery | Self::InvalidFilters(_)
        )
    }
}

/// Internal cache fault. The engine bypasses the cache instead of surfacing it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum CacheError {
    #[error("query cache lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Retrieval failed: {0}")]
    Query(#[from] QueryError),

    #[error("Generation timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Generation backend error: {0}")]
    Backend(String),
}
