//! # Sift Chunker
//!
//! Splits documents into overlapping, fixed-size character windows: the unit of indexing
//! and retrieval.
//!
//! ## Windows
//!
//! ```text
//! text:    |-------------------- L chars --------------------|
//! chunk 0: [0, S)
//! chunk 1:           [S-O, 2S-O)
//! chunk 2:                     [2(S-O), min(3S-2O, L))
//! ```
//!
//! A document of `L` characters yields `ceil(max(0, L - O) / (S - O))` chunks and the
//! last one always ends at `L`.
//!
//! ## Example
//!
//! ```rust
//! use sift_chunker::{ChunkIdAllocator, Chunker, ChunkerConfig, Document};
//!
//! let chunker = Chunker::new(ChunkerConfig::new(500, 50)).unwrap();
//! let ids = ChunkIdAllocator::new();
//! let document = Document::new("c-1", "x".repeat(1000));
//!
//! let spans: Vec<_> = chunker
//!     .chunk(&document, &ids)
//!     .map(|c| (c.start_offset, c.end_offset))
//!     .collect();
//! assert_eq!(spans, vec![(0, 500), (450, 950), (900, 1000)]);
//! ```

mod chunker;
mod config;
mod error;
mod types;

pub use chunker::{window_count, ChunkIdAllocator, Chunker, Chunks};
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};
pub use types::{Chunk, ChunkId, Document};

pub use sift_protocol::DocumentMetadata;
