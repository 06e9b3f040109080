use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

/// Failure of the embedding collaborator. The core never lets one of these crash a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("embedding timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    #[error("embedding backend error: {0}")]
    Backend(String),

    #[error("cannot embed empty text")]
    EmptyInput,

    #[error("embedding has dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbeddingError {
    /// Reason code reported by the embedder service boundary.
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Backend(_) | Self::DimensionMismatch { .. } => "backend-error",
            Self::EmptyInput => "empty-input",
        }
    }
}

/// Structural index faults. These are never downgraded.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Unsupported index format version {found} (expected {expected})")]
    UnsupportedFormat { found: u32, expected: u32 },

    #[error("Chunk {0} already has an embedding")]
    DuplicateChunk(u64),

    #[error("Corrupt index: {0}")]
    Corrupt(String),

    #[error("Vector index unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported metadata schema_version {found} (expected {expected})")]
    UnsupportedSchema { found: u32, expected: u32 },

    #[error("{0}")]
    Other(String),
}
