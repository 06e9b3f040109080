use crate::error::{IndexerError, IngestionError, Result};
use crate::stats::IngestStats;
use serde::{Deserialize, Serialize};
use sift_chunker::{Chunk, ChunkId, ChunkIdAllocator, Chunker, Document};
use sift_search::IndexSet;
use sift_vector_store::{embed_checked, IndexError};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Chunks embedded and committed per batch
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { batch_size: 256 }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.batch_size == 0 {
            return Err("ingest batch_size must be > 0".to_string());
        }
        Ok(())
    }
}

/// Embedding call settings used during ingestion.
#[derive(Debug, Clone, Copy)]
pub struct EmbedSettings {
    pub timeout: Duration,
    pub max_batch: usize,
}

/// A chunk whose embedding failed and will be retried.
#[derive(Debug, Clone)]
struct PendingEmbedding {
    chunk_id: ChunkId,
    text: String,
}

/// Owns the mutable side of the indexes: chunking, embedding and the build buffer.
pub struct Ingestor {
    chunker: Chunker,
    ids: ChunkIdAllocator,
    indexes: IndexSet,
    config: IngestConfig,
    embed: EmbedSettings,
    retry: Mutex<Vec<PendingEmbedding>>,
    run: tokio::sync::Mutex<()>,
}

impl Ingestor {
    /// New chunk ids continue after the largest id already in the metadata store.
    ///
    /// Chunks the metadata store knows but the published vector index lacks (embeddings
    /// that failed before the index was saved) start out queued for retry.
    pub fn new(
        chunker: Chunker,
        indexes: IndexSet,
        config: IngestConfig,
        embed: EmbedSettings,
    ) -> Result<Self> {
        config.validate().map_err(IndexerError::Config)?;
        let next_id = indexes.metadata.next_chunk_id();
        let pending = missing_embeddings(&indexes);
        if !pending.is_empty() {
            log::info!("{} chunks have no embedding; queued for retry", pending.len());
        }
        Ok(Self {
            chunker,
            ids: ChunkIdAllocator::starting_at(next_id),
            indexes,
            config,
            embed,
            retry: Mutex::new(pending),
            run: tokio::sync::Mutex::new(()),
        })
    }

    #[must_use]
    pub const fn indexes(&self) -> &IndexSet {
        &self.indexes
    }

    pub fn pending_retries(&self) -> usize {
        self.retry.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Chunk, embed and index `documents` in bounded batches, then publish once.
    ///
    /// Invalid or too-short documents are skipped and counted, as are documents no longer
    /// than the chunk overlap (they produce no window). Chunks whose embedding fails
    /// are indexed for keyword search and queued for retry. Structural index faults abort.
    pub async fn ingest<I>(&self, documents: I) -> Result<IngestStats>
    where
        I: IntoIterator<Item = Document>,
    {
        let _run = self.run.lock().await;
        let started = Instant::now();
        let mut stats = IngestStats::new();
        let min_chars = self.chunker.config().min_document_chars;
        let mut batch: Vec<Chunk> = Vec::with_capacity(self.config.batch_size);

        for document in documents {
            if let Err(err) = document.validate() {
                let err = IngestionError::InvalidDocument {
                    document_id: document.id.clone(),
                    reason: err.to_string(),
                };
                log::warn!("Skipping {err}");
                stats.skip_document(Some(err.to_string()));
                continue;
            }
            if document.text.trim().chars().count() < min_chars {
                log::debug!("Skipping short document {}", document.id);
                stats.skip_document(None);
                continue;
            }
            if self.chunker.count(&document) == 0 {
                let err = IngestionError::InvalidDocument {
                    document_id: document.id.clone(),
                    reason: format!(
                        "{} characters do not exceed the chunk overlap of {}",
                        document.char_len(),
                        self.chunker.config().overlap
                    ),
                };
                log::warn!("Skipping {err}");
                stats.skip_document(Some(err.to_string()));
                continue;
            }

            let chunks = self.chunker.chunk(&document, &self.ids);
            stats.add_document(document.metadata.category.as_deref(), chunks.len());
            for chunk in chunks {
                self.indexes.metadata.insert_chunk(&chunk, &document.metadata);
                batch.push(chunk);
                if batch.len() >= self.config.batch_size {
                    self.commit_batch(std::mem::take(&mut batch), &mut stats).await?;
                }
            }
        }
        if !batch.is_empty() {
            self.commit_batch(batch, &mut stats).await?;
        }

        let version = self.indexes.vectors.publish();
        stats.time_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "Ingested {} documents ({} chunks, {} embedded, {} queued for retry) in {} ms; vector index v{version}",
            stats.documents,
            stats.chunks,
            stats.embedded,
            stats.embedding_failures,
            stats.time_ms
        );
        Ok(stats)
    }

    /// Re-embed queued chunks, publish successes, and return how many remain queued.
    pub async fn retry_pending(&self) -> Result<usize> {
        let _run = self.run.lock().await;
        let queued = std::mem::take(
            &mut *self.retry.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if queued.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = queued.iter().map(|p| p.text.clone()).collect();
        let results = embed_checked(
            self.indexes.embedder.as_ref(),
            &texts,
            self.embed.timeout,
            self.embed.max_batch,
        )
        .await;

        let mut still_failing = Vec::new();
        let mut recovered = 0usize;
        for (pending, result) in queued.into_iter().zip(results) {
            match result {
                Ok(vector) => {
                    self.add_vector(pending.chunk_id, vector)?;
                    recovered += 1;
                }
                Err(err) => {
                    log::debug!("Chunk {} still fails to embed: {err}", pending.chunk_id);
                    still_failing.push(pending);
                }
            }
        }

        let remaining = still_failing.len();
        self.retry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(still_failing);
        if recovered > 0 {
            let version = self.indexes.vectors.publish();
            log::info!("Recovered {recovered} embeddings; vector index v{version}");
        }
        Ok(remaining)
    }

    /// Re-embed every chunk in the metadata store and replace the vector index wholesale.
    ///
    /// Used when the persisted vectors are missing or unusable. Returns the chunk count
    /// that could not be embedded (those are queued for retry).
    pub async fn rebuild_vectors(&self) -> Result<usize> {
        let _run = self.run.lock().await;
        let records = self.indexes.metadata.records();
        let mut entries = Vec::with_capacity(records.len());
        let mut failed = Vec::new();

        for window in records.chunks(self.config.batch_size) {
            let texts: Vec<String> = window.iter().map(|(_, r)| r.text.clone()).collect();
            let results = embed_checked(
                self.indexes.embedder.as_ref(),
                &texts,
                self.embed.timeout,
                self.embed.max_batch,
            )
            .await;
            for ((chunk_id, record), result) in window.iter().zip(results) {
                match result {
                    Ok(vector) => entries.push((*chunk_id, vector)),
                    Err(_) => failed.push(PendingEmbedding {
                        chunk_id: *chunk_id,
                        text: record.text.clone(),
                    }),
                }
            }
        }

        let failures = failed.len();
        let version = self.indexes.vectors.rebuild(entries)?;
        *self.retry.lock().unwrap_or_else(PoisonError::into_inner) = failed;
        log::info!(
            "Rebuilt vector index v{version} from {} chunks ({failures} failed)",
            records.len()
        );
        Ok(failures)
    }

    async fn commit_batch(&self, batch: Vec<Chunk>, stats: &mut IngestStats) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let results = embed_checked(
            self.indexes.embedder.as_ref(),
            &texts,
            self.embed.timeout,
            self.embed.max_batch,
        )
        .await;

        let mut failed = Vec::new();
        for (chunk, result) in batch.iter().zip(results) {
            match result {
                Ok(vector) => {
                    self.add_vector(chunk.id, vector)?;
                    stats.embedded += 1;
                }
                Err(err) => {
                    log::warn!(
                        "Embedding failed for chunk {} ({}): {err}",
                        chunk.id,
                        err.reason_code()
                    );
                    stats.embedding_failures += 1;
                    failed.push(PendingEmbedding {
                        chunk_id: chunk.id,
                        text: chunk.text.clone(),
                    });
                }
            }
        }
        if !failed.is_empty() {
            self.retry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(failed);
        }

        self.indexes
            .keywords
            .add_batch(batch.iter().map(|c| (c.id, c.text.as_str())));
        log::debug!("Committed batch of {} chunks", batch.len());
        Ok(())
    }

    fn add_vector(&self, chunk_id: ChunkId, vector: Vec<f32>) -> Result<()> {
        match self.indexes.vectors.add(chunk_id, vector) {
            Ok(()) => Ok(()),
            Err(IndexError::DuplicateChunk(id)) => {
                log::warn!("Chunk {id} already has an embedding; keeping the existing one");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Metadata records without a published vector. Empty while the vector index is unavailable,
/// since `rebuild_vectors` re-embeds everything in that case.
fn missing_embeddings(indexes: &IndexSet) -> Vec<PendingEmbedding> {
    if !indexes.vectors.is_available() {
        return Vec::new();
    }
    let snapshot = indexes.vectors.snapshot();
    let embedded: HashSet<ChunkId> = snapshot.chunk_ids().iter().copied().collect();
    indexes
        .metadata
        .records()
        .into_iter()
        .filter(|(chunk_id, _)| !embedded.contains(chunk_id))
        .map(|(chunk_id, record)| PendingEmbedding {
            chunk_id,
            text: record.text.clone(),
        })
        .collect()
}
