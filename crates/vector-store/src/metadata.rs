use crate::error::{Result, VectorStoreError};
use serde::{Deserialize, Serialize};
use sift_chunker::{Chunk, ChunkId};
use sift_protocol::{normalize_category, DocumentMetadata, ResultMetadata};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

const METADATA_SCHEMA_VERSION: u32 = 1;

/// Text and source metadata of one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub document_id: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub sequence_index: usize,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl ChunkRecord {
    #[must_use]
    pub fn from_chunk(chunk: &Chunk, metadata: &DocumentMetadata) -> Self {
        Self {
            document_id: chunk.document_id.to_string(),
            text: chunk.text.clone(),
            start_offset: chunk.start_offset,
            end_offset: chunk.end_offset,
            sequence_index: chunk.sequence_index,
            metadata: metadata.clone(),
        }
    }

    /// At most `max_chars` characters of the chunk text, trimmed.
    #[must_use]
    pub fn snippet(&self, max_chars: usize) -> String {
        let text = self.text.trim();
        match text.char_indices().nth(max_chars) {
            Some((cut, _)) => text[..cut].trim_end().to_string(),
            None => text.to_string(),
        }
    }

    #[must_use]
    pub fn result_metadata(&self) -> ResultMetadata {
        ResultMetadata {
            document_id: self.document_id.clone(),
            sequence_index: self.sequence_index,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            source: self.metadata.clone(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedMetadata {
    schema_version: u32,
    chunks: BTreeMap<ChunkId, ChunkRecord>,
}

/// `chunk_id -> ChunkRecord` side-store, serialized independently of the vectors.
///
/// Every mutation bumps [`MetadataStore::version`].
#[derive(Debug, Default)]
pub struct MetadataStore {
    chunks: RwLock<BTreeMap<ChunkId, Arc<ChunkRecord>>>,
    version: AtomicU64,
}

impl MetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, chunk_id: ChunkId, record: ChunkRecord) {
        self.chunks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chunk_id, Arc::new(record));
        self.version.fetch_add(1, Ordering::Release);
    }

    pub fn insert_chunk(&self, chunk: &Chunk, metadata: &DocumentMetadata) {
        self.insert(chunk.id, ChunkRecord::from_chunk(chunk, metadata));
    }

    pub fn get(&self, chunk_id: ChunkId) -> Option<Arc<ChunkRecord>> {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chunk_id)
            .cloned()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.chunks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First chunk id not yet used by any record.
    pub fn next_chunk_id(&self) -> ChunkId {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .next_back()
            .map_or(0, |id| id + 1)
    }

    /// Every record in ascending chunk id order.
    pub fn records(&self) -> Vec<(ChunkId, Arc<ChunkRecord>)> {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, record)| (*id, Arc::clone(record)))
            .collect()
    }

    pub fn document_count(&self) -> usize {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let mut documents: Vec<&str> = chunks.values().map(|r| r.document_id.as_str()).collect();
        documents.sort_unstable();
        documents.dedup();
        documents.len()
    }

    /// Chunk counts per normalized category; chunks without one are counted under
    /// `"uncategorized"`.
    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts = BTreeMap::new();
        for record in chunks.values() {
            let category = record
                .metadata
                .category
                .as_deref()
                .map(normalize_category)
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "uncategorized".to_string());
            *counts.entry(category).or_insert(0) += 1;
        }
        counts
    }

    /// Replace the source metadata of every chunk of `document_id`. Vectors are untouched.
    pub fn update_document_metadata(&self, document_id: &str, metadata: &DocumentMetadata) -> usize {
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = 0;
        for record in chunks.values_mut() {
            if record.document_id == document_id {
                let mut next = (**record).clone();
                next.metadata = metadata.clone();
                *record = Arc::new(next);
                updated += 1;
            }
        }
        if updated > 0 {
            self.version.fetch_add(1, Ordering::Release);
        }
        updated
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let persisted = PersistedMetadata {
            schema_version: METADATA_SCHEMA_VERSION,
            chunks: self
                .records()
                .into_iter()
                .map(|(id, record)| (id, (*record).clone()))
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&persisted)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let persisted: PersistedMetadata = serde_json::from_slice(&bytes)?;
        if persisted.schema_version != METADATA_SCHEMA_VERSION {
            return Err(VectorStoreError::UnsupportedSchema {
                found: persisted.schema_version,
                expected: METADATA_SCHEMA_VERSION,
            });
        }
        let chunks = persisted
            .chunks
            .into_iter()
            .map(|(id, record)| (id, Arc::new(record)))
            .collect();
        Ok(Self {
            chunks: RwLock::new(chunks),
            version: AtomicU64::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(document_id: &str, text: &str, category: Option<&str>) -> ChunkRecord {
        let mut metadata = DocumentMetadata::default();
        metadata.category = category.map(str::to_string);
        ChunkRecord {
            document_id: document_id.to_string(),
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.chars().count(),
            sequence_index: 0,
            metadata,
        }
    }

    #[test]
    fn snippet_cuts_on_characters() {
        let r = record("d", "  héllo wörld  ", None);
        assert_eq!(r.snippet(5), "héllo");
        assert_eq!(r.snippet(100), "héllo wörld");
        assert_eq!(r.snippet(6), "héllo");
    }

    #[test]
    fn next_chunk_id_follows_the_largest_key() {
        let store = MetadataStore::new();
        assert_eq!(store.next_chunk_id(), 0);
        store.insert(4, record("a", "x", None));
        store.insert(2, record("a", "y", None));
        assert_eq!(store.next_chunk_id(), 5);
        assert_eq!(store.document_count(), 1);
    }

    #[test]
    fn category_counts_group_missing_categories() {
        let store = MetadataStore::new();
        store.insert(0, record("a", "x", Some("Mortgage")));
        store.insert(1, record("a", "y", Some(" mortgage")));
        store.insert(2, record("b", "z", None));
        let counts = store.category_counts();
        assert_eq!(counts.get("mortgage"), Some(&2));
        assert_eq!(counts.get("uncategorized"), Some(&1));
    }

    #[test]
    fn metadata_updates_touch_only_one_document() {
        let store = MetadataStore::new();
        store.insert(0, record("a", "x", Some("Mortgage")));
        store.insert(1, record("b", "y", Some("Mortgage")));
        let updated = store.update_document_metadata(
            "a",
            &DocumentMetadata::default().category("Credit card"),
        );
        assert_eq!(updated, 1);
        assert_eq!(store.version(), 3);
        assert_eq!(
            store.get(0).unwrap().metadata.category.as_deref(),
            Some("Credit card")
        );
        assert_eq!(store.get(1).unwrap().metadata.category.as_deref(), Some("Mortgage"));

        store.update_document_metadata("missing", &DocumentMetadata::default());
        assert_eq!(store.version(), 3);
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("metadata.json");
        let store = MetadataStore::new();
        let mut r = record("c-9", "charged twice for one purchase", Some("Credit card"));
        r.metadata.date = NaiveDate::from_ymd_opt(2023, 4, 2);
        store.insert(17, r.clone());
        store.save(&path).await.unwrap();

        let loaded = MetadataStore::load(&path).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(*loaded.get(17).unwrap(), r);
    }

    #[tokio::test]
    async fn load_rejects_unknown_schema() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("metadata.json");
        tokio::fs::write(&path, r#"{"schema_version":9,"chunks":{}}"#)
            .await
            .unwrap();
        assert!(matches!(
            MetadataStore::load(&path).await,
            Err(VectorStoreError::UnsupportedSchema { found: 9, .. })
        ));
    }
}
