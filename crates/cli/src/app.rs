use crate::config::SiftConfig;
use anyhow::{Context as AnyhowContext, Result};
use serde::Serialize;
use sift_chunker::Chunker;
use sift_indexer::{
    load_index, read_documents_jsonl, save_index, IndexManifest, IngestStats, Ingestor,
    VECTORS_FILE,
};
use sift_search::{IndexSet, KeywordIndex, QueryEngine, QueryEnhancer};
use sift_vector_store::{build_embedder, persist, MetadataStore, VectorIndex};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Empty indexes wired to the configured embedder.
pub fn fresh_indexes(config: &SiftConfig) -> Result<IndexSet> {
    let embedder = build_embedder(&config.embedder).context("Failed to build embedder")?;
    Ok(IndexSet {
        vectors: Arc::new(VectorIndex::new(embedder.dimension())),
        keywords: Arc::new(KeywordIndex::new(config.bm25)),
        metadata: Arc::new(MetadataStore::new()),
        embedder,
    })
}

pub async fn open_index(config: &SiftConfig, dir: &Path) -> Result<IndexSet> {
    let embedder = build_embedder(&config.embedder).context("Failed to build embedder")?;
    load_index(dir, embedder, config.bm25)
        .await
        .with_context(|| format!("Failed to load index from {}", dir.display()))
}

pub fn build_engine(config: &SiftConfig, indexes: IndexSet) -> Result<QueryEngine> {
    let engine = QueryEngine::new(config.engine, config.fusion, config.cache, indexes)
        .map_err(anyhow::Error::msg)
        .context("Invalid engine configuration")?;
    Ok(engine.with_enhancer(QueryEnhancer::new(config.enhancer.clone())))
}

/// Ingest a JSON-lines file into `out`, extending an existing index there if present.
pub async fn index_documents(config: &SiftConfig, input: &Path, out: &Path) -> Result<IngestStats> {
    let parsed = read_documents_jsonl(input)
        .await
        .with_context(|| format!("Failed to read documents from {}", input.display()))?;

    let indexes = if out.join(sift_indexer::METADATA_FILE).is_file() {
        log::info!("Extending existing index at {}", out.display());
        open_index(config, out).await?
    } else {
        fresh_indexes(config)?
    };

    let chunker = Chunker::new(config.chunker).context("Invalid chunker configuration")?;
    let ingestor = Ingestor::new(chunker, indexes, config.ingest, config.embed_settings())?;
    if !ingestor.indexes().vectors.is_available() {
        let failed = ingestor.rebuild_vectors().await?;
        log::info!("Rebuilt stale vectors before ingesting ({failed} failed)");
    }

    let mut stats = ingestor.ingest(parsed.documents).await?;
    for err in parsed.errors {
        stats.add_error(err.to_string());
    }
    if ingestor.pending_retries() > 0 {
        let remaining = ingestor.retry_pending().await?;
        if remaining > 0 {
            log::warn!("{remaining} chunks have no embedding and are keyword-only");
        }
    }

    save_index(out, ingestor.indexes()).await?;
    Ok(stats)
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorFileInfo {
    pub format_version: u32,
    pub dimension: usize,
    pub vector_count: usize,
    pub metric: u8,
    pub snapshot_version: u64,
}

/// What `sift stats` prints.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<IndexManifest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vectors: Option<VectorFileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vectors_error: Option<String>,
    pub documents: usize,
    pub chunks: usize,
    pub keyword_terms: usize,
    pub categories: BTreeMap<String, usize>,
}

pub async fn summarize_index(config: &SiftConfig, dir: &Path) -> Result<IndexSummary> {
    let indexes = open_index(config, dir).await?;
    let manifest = IndexManifest::load(dir).await.ok();

    let (vectors, vectors_error) = match tokio::fs::read(dir.join(VECTORS_FILE)).await {
        Ok(bytes) => match persist::decode_header(&bytes) {
            Ok(header) => (
                Some(VectorFileInfo {
                    format_version: header.format_version,
                    dimension: header.dimension,
                    vector_count: header.vector_count,
                    metric: header.metric.code(),
                    snapshot_version: header.snapshot_version,
                }),
                indexes.vectors.unavailable_reason(),
            ),
            Err(err) => (None, Some(err.to_string())),
        },
        Err(err) => (None, Some(err.to_string())),
    };

    Ok(IndexSummary {
        manifest,
        vectors,
        vectors_error,
        documents: indexes.metadata.document_count(),
        chunks: indexes.metadata.len(),
        keyword_terms: indexes.keywords.term_count(),
        categories: indexes.metadata.category_counts(),
    })
}
