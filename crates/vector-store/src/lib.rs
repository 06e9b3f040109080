//! # Sift Vector Store
//!
//! Semantic half of the retrieval core.
//!
//! ```text
//! Chunk[]
//!     │
//!     ├──> Embedder (local hash model | remote HTTP service)
//!     │      └─> unit vectors of dimension D
//!     │
//!     ├──> VectorIndex
//!     │      ├─> pending build buffer (ingestion only)
//!     │      └─> published FlatSnapshot (shared by every query)
//!     │
//!     ├──> vectors.bin   (versioned binary artifact)
//!     └──> MetadataStore (chunk_id -> text + source metadata, metadata.json)
//! ```
//!
//! ## Example
//!
//! ```
//! use sift_vector_store::VectorIndex;
//!
//! let index = VectorIndex::new(2);
//! index.add(0, vec![1.0, 0.0]).unwrap();
//! index.add(1, vec![0.0, 1.0]).unwrap();
//! assert_eq!(index.publish(), 1);
//!
//! let hits = index.search(&[1.0, 0.0], 1).unwrap();
//! assert_eq!(hits[0].chunk_id, 0);
//! ```

mod embeddings;
mod error;
mod index;
mod metadata;
pub mod persist;
mod remote;

pub use embeddings::{
    build_embedder, embed_checked, normalize, Embedder, EmbedderBackend, EmbedderConfig,
    EmbeddingResult, HashEmbedder,
};
pub use error::{EmbeddingError, IndexError, Result, VectorStoreError};
pub use index::{FlatSnapshot, SimilarityMetric, VectorHit, VectorIndex};
pub use metadata::{ChunkRecord, MetadataStore};
pub use remote::HttpEmbedder;
