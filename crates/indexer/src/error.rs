use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

/// A single bad input record. Logged and skipped; the batch continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestionError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("document {document_id:?}: {reason}")]
    InvalidDocument { document_id: String, reason: String },
}

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Chunker error: {0}")]
    ChunkerError(#[from] sift_chunker::ChunkerError),

    #[error("Index error: {0}")]
    IndexError(#[from] sift_vector_store::IndexError),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] sift_vector_store::VectorStoreError),

    #[error("Invalid index directory: {0}")]
    InvalidPath(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
