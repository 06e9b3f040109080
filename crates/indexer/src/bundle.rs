use crate::error::{IndexerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sift_search::{Bm25Params, IndexSet, KeywordIndex};
use sift_vector_store::{persist, Embedder, MetadataStore, VectorIndex};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const VECTORS_FILE: &str = "vectors.bin";
pub const METADATA_FILE: &str = "metadata.json";

const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Describes what produced the persisted vectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub schema_version: u32,
    pub model_id: String,
    pub dimension: usize,
    pub vector_version: u64,
    pub chunks: usize,
    pub documents: usize,
    pub saved_at: DateTime<Utc>,
}

impl IndexManifest {
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(MANIFEST_FILE);
        let bytes = tokio::fs::read(&path).await?;
        let manifest: Self = serde_json::from_slice(&bytes)
            .map_err(|e| IndexerError::InvalidPath(format!("{}: {e}", path.display())))?;
        if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
            return Err(IndexerError::InvalidPath(format!(
                "{}: unsupported schema_version {}",
                path.display(),
                manifest.schema_version
            )));
        }
        Ok(manifest)
    }
}

fn file(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

/// Persist the published vector snapshot, the metadata side-store and a manifest.
///
/// The keyword index is not written; it is rebuilt from chunk text on load.
pub async fn save_index(dir: impl AsRef<Path>, indexes: &IndexSet) -> Result<IndexManifest> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir).await?;

    let snapshot = indexes.vectors.snapshot();
    persist::save(&snapshot, file(dir, VECTORS_FILE)).await?;
    indexes.metadata.save(file(dir, METADATA_FILE)).await?;

    let manifest = IndexManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        model_id: indexes.embedder.model_id().to_string(),
        dimension: snapshot.dimension(),
        vector_version: snapshot.version(),
        chunks: indexes.metadata.len(),
        documents: indexes.metadata.document_count(),
        saved_at: Utc::now(),
    };
    let bytes = serde_json::to_vec_pretty(&manifest)
        .map_err(sift_vector_store::VectorStoreError::from)?;
    let path = file(dir, MANIFEST_FILE);
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;

    log::info!(
        "Saved index to {} ({} chunks, vector index v{})",
        dir.display(),
        manifest.chunks,
        manifest.vector_version
    );
    Ok(manifest)
}

/// Load an index directory for querying.
///
/// Metadata is required. A missing, corrupt or mismatched vector file leaves the vector
/// index unavailable so keyword-only retrieval still works.
pub async fn load_index(
    dir: impl AsRef<Path>,
    embedder: Arc<dyn Embedder>,
    params: Bm25Params,
) -> Result<IndexSet> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(IndexerError::InvalidPath(format!(
            "{} is not an index directory",
            dir.display()
        )));
    }

    let metadata = MetadataStore::load(file(dir, METADATA_FILE)).await?;
    let keywords = KeywordIndex::from_records(
        params,
        metadata
            .records()
            .iter()
            .map(|(id, record)| (*id, record.text.as_str()))
            .collect::<Vec<_>>(),
    );

    let dimension = embedder.dimension();
    let vectors = match check_manifest(dir, embedder.as_ref()).await {
        Err(reason) => {
            log::warn!("Vector index unavailable: {reason}");
            VectorIndex::unavailable(dimension, reason)
        }
        Ok(()) => match persist::load(file(dir, VECTORS_FILE), dimension).await {
            Ok(snapshot) => VectorIndex::from_snapshot(snapshot),
            Err(err) => {
                log::warn!("Vector index unavailable: {err}");
                VectorIndex::unavailable(dimension, err.to_string())
            }
        },
    };

    log::info!(
        "Loaded index from {} ({} chunks, {} vectors, {} keyword terms)",
        dir.display(),
        metadata.len(),
        vectors.len(),
        keywords.term_count()
    );
    Ok(IndexSet {
        embedder,
        vectors: Arc::new(vectors),
        keywords: Arc::new(keywords),
        metadata: Arc::new(metadata),
    })
}

async fn check_manifest(dir: &Path, embedder: &dyn Embedder) -> std::result::Result<(), String> {
    let manifest = IndexManifest::load(dir)
        .await
        .map_err(|e| format!("manifest: {e}"))?;
    if manifest.model_id != embedder.model_id() {
        return Err(format!(
            "vectors were built with model {:?}, embedder is {:?}",
            manifest.model_id,
            embedder.model_id()
        ));
    }
    Ok(())
}
