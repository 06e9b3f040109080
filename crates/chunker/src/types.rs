use crate::error::{ChunkerError, Result};
use serde::{Deserialize, Serialize};
use sift_protocol::DocumentMetadata;
use std::sync::Arc;

/// Chunk identifier, unique and monotonically assigned across an index.
pub type ChunkId = u64;

/// A source record. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub id: String,

    pub text: String,

    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: DocumentMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Length in characters (offsets are character based).
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ChunkerError::invalid_document("document id is empty"));
        }
        if self.id.chars().any(char::is_control) {
            return Err(ChunkerError::invalid_document(format!(
                "document id {:?} contains control characters",
                self.id
            )));
        }
        Ok(())
    }
}

/// A window of document text. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,

    /// Back-reference to the owning document
    pub document_id: Arc<str>,

    pub text: String,

    /// Start offset in characters (inclusive)
    pub start_offset: usize,

    /// End offset in characters (exclusive)
    pub end_offset: usize,

    /// Position of this window within its document
    pub sequence_index: usize,
}

impl Chunk {
    /// Number of characters covered by this chunk
    #[must_use]
    pub const fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }
}
