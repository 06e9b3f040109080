//! # Sift Indexer
//!
//! Batched ingestion and index persistence.
//!
//! ## Pipeline
//!
//! ```text
//! documents.jsonl
//!     │
//!     ├──> Chunker (overlapping windows)
//!     │      └─> MetadataStore
//!     │
//!     ├──> Embedder (bounded batches, failures queued for retry)
//!     │      └─> VectorIndex build buffer
//!     │
//!     ├──> KeywordIndex
//!     │
//!     └──> publish once per run
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use sift_chunker::{Chunker, ChunkerConfig};
//! use sift_indexer::{read_documents_jsonl, save_index, EmbedSettings, IngestConfig, Ingestor};
//! use sift_search::{Bm25Params, IndexSet, KeywordIndex};
//! use sift_vector_store::{build_embedder, EmbedderConfig, MetadataStore, VectorIndex};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EmbedderConfig::default();
//!     let embedder = build_embedder(&config)?;
//!     let indexes = IndexSet {
//!         vectors: Arc::new(VectorIndex::new(embedder.dimension())),
//!         keywords: Arc::new(KeywordIndex::new(Bm25Params::default())),
//!         metadata: Arc::new(MetadataStore::new()),
//!         embedder,
//!     };
//!     let settings = EmbedSettings { timeout: config.timeout(), max_batch: config.max_batch };
//!     let ingestor = Ingestor::new(
//!         Chunker::new(ChunkerConfig::default())?,
//!         indexes,
//!         IngestConfig::default(),
//!         settings,
//!     )?;
//!
//!     let input = read_documents_jsonl("docs.jsonl").await?;
//!     let stats = ingestor.ingest(input.documents).await?;
//!     save_index("index", ingestor.indexes()).await?;
//!     println!("Indexed {} documents, {} chunks", stats.documents, stats.chunks);
//!     Ok(())
//! }
//! ```

mod bundle;
mod error;
mod ingestor;
mod source;
mod stats;

pub use bundle::{
    load_index, save_index, IndexManifest, MANIFEST_FILE, METADATA_FILE, VECTORS_FILE,
};
pub use error::{IndexerError, IngestionError, Result};
pub use ingestor::{EmbedSettings, IngestConfig, Ingestor};
pub use source::{parse_document_line, read_documents_jsonl, JsonlDocuments};
pub use stats::IngestStats;
