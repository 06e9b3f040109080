use crate::error::IndexError;
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use sift_chunker::ChunkId;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type IndexResult<T> = std::result::Result<T, IndexError>;

/// Similarity convention shared by every vector in an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Inner product over unit vectors (cosine similarity)
    InnerProduct,
}

impl SimilarityMetric {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::InnerProduct => 0,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::InnerProduct),
            _ => None,
        }
    }
}

/// A scored vector search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub chunk_id: ChunkId,
    pub score: f32,
}

/// Immutable, versioned flat index.
///
/// Vector id `i` is row `i` of `data`; rows are in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatSnapshot {
    version: u64,
    dimension: usize,
    metric: SimilarityMetric,
    data: Vec<f32>,
    chunk_ids: Vec<ChunkId>,
}

impl FlatSnapshot {
    #[must_use]
    pub const fn empty(dimension: usize) -> Self {
        Self {
            version: 0,
            dimension,
            metric: SimilarityMetric::InnerProduct,
            data: Vec::new(),
            chunk_ids: Vec::new(),
        }
    }

    /// Bulk construction from `(chunk_id, vector)` pairs.
    pub fn build<I>(dimension: usize, entries: I) -> IndexResult<Self>
    where
        I: IntoIterator<Item = (ChunkId, Vec<f32>)>,
    {
        let mut snapshot = Self::empty(dimension);
        let mut seen = HashSet::new();
        for (chunk_id, vector) in entries {
            check_dimension(dimension, &vector)?;
            if !seen.insert(chunk_id) {
                return Err(IndexError::DuplicateChunk(chunk_id));
            }
            snapshot.data.extend_from_slice(&vector);
            snapshot.chunk_ids.push(chunk_id);
        }
        Ok(snapshot)
    }

    /// Reassemble a snapshot from its raw parts (used when loading from disk).
    pub fn from_parts(
        version: u64,
        dimension: usize,
        metric: SimilarityMetric,
        data: Vec<f32>,
        chunk_ids: Vec<ChunkId>,
    ) -> IndexResult<Self> {
        if dimension == 0 {
            return Err(IndexError::Corrupt("dimension is zero".to_string()));
        }
        if data.len() != chunk_ids.len() * dimension {
            return Err(IndexError::Corrupt(format!(
                "{} floats for {} vectors of dimension {dimension}",
                data.len(),
                chunk_ids.len()
            )));
        }
        Ok(Self {
            version,
            dimension,
            metric,
            data,
            chunk_ids,
        })
    }

    #[must_use]
    pub const fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub const fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// `vector_id -> chunk_id` table.
    #[must_use]
    pub fn chunk_ids(&self) -> &[ChunkId] {
        &self.chunk_ids
    }

    #[must_use]
    pub fn vector(&self, vector_id: usize) -> Option<&[f32]> {
        let start = vector_id.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Exactly `min(k, len)` hits by descending score, ties by ascending vector id.
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<VectorHit>> {
        check_dimension(self.dimension, query)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let matrix = ArrayView2::from_shape((self.len(), self.dimension), &self.data)
            .map_err(|e| IndexError::Corrupt(e.to_string()))?;
        let scores = matrix.dot(&ArrayView1::from(query));

        let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
        let by_rank = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
        };
        let k = k.min(ranked.len());
        if k < ranked.len() {
            ranked.select_nth_unstable_by(k - 1, by_rank);
            ranked.truncate(k);
        }
        ranked.sort_unstable_by(by_rank);

        Ok(ranked
            .into_iter()
            .map(|(vector_id, score)| VectorHit {
                chunk_id: self.chunk_ids[vector_id],
                score,
            })
            .collect())
    }

    fn appended(&self, entries: &[(ChunkId, Vec<f32>)], version: u64) -> Self {
        let mut data = Vec::with_capacity(self.data.len() + entries.len() * self.dimension);
        data.extend_from_slice(&self.data);
        let mut chunk_ids = Vec::with_capacity(self.chunk_ids.len() + entries.len());
        chunk_ids.extend_from_slice(&self.chunk_ids);
        for (chunk_id, vector) in entries {
            data.extend_from_slice(vector);
            chunk_ids.push(*chunk_id);
        }
        Self {
            version,
            dimension: self.dimension,
            metric: self.metric,
            data,
            chunk_ids,
        }
    }
}

fn check_dimension(expected: usize, vector: &[f32]) -> IndexResult<()> {
    if vector.len() == expected {
        Ok(())
    } else {
        Err(IndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        })
    }
}

#[derive(Debug, Default)]
struct PendingBuild {
    entries: Vec<(ChunkId, Vec<f32>)>,
    /// Chunk ids that are published or pending
    known: HashSet<ChunkId>,
}

/// Index handle: one published snapshot plus a private build buffer.
///
/// Searches clone the published `Arc` and never wait on ingestion; `add`, `publish` and
/// `rebuild` serialize on the build buffer only.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    published: RwLock<Arc<FlatSnapshot>>,
    pending: Mutex<PendingBuild>,
    unavailable: RwLock<Option<String>>,
}

impl VectorIndex {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self::from_snapshot(FlatSnapshot::empty(dimension))
    }

    #[must_use]
    pub fn from_snapshot(snapshot: FlatSnapshot) -> Self {
        let known = snapshot.chunk_ids.iter().copied().collect();
        Self {
            dimension: snapshot.dimension,
            published: RwLock::new(Arc::new(snapshot)),
            pending: Mutex::new(PendingBuild {
                entries: Vec::new(),
                known,
            }),
            unavailable: RwLock::new(None),
        }
    }

    /// A handle that refuses vector search until a valid snapshot is published.
    #[must_use]
    pub fn unavailable(dimension: usize, reason: impl Into<String>) -> Self {
        let index = Self::new(dimension);
        index.mark_unavailable(reason);
        index
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// The current searchable snapshot.
    pub fn snapshot(&self) -> Arc<FlatSnapshot> {
        Arc::clone(&self.published.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn unavailable_reason(&self) -> Option<String> {
        self.unavailable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_available(&self) -> bool {
        self.unavailable_reason().is_none()
    }

    pub fn mark_unavailable(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::warn!("Vector index marked unavailable: {reason}");
        *self.unavailable.write().unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }

    /// Stage a vector for the next publish. Invisible to searches until then.
    pub fn add(&self, chunk_id: ChunkId, vector: Vec<f32>) -> IndexResult<()> {
        check_dimension(self.dimension, &vector)?;
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.known.insert(chunk_id) {
            return Err(IndexError::DuplicateChunk(chunk_id));
        }
        pending.entries.push((chunk_id, vector));
        Ok(())
    }

    /// Atomically swap in a snapshot holding every staged vector; returns the new version.
    ///
    /// With nothing staged the version is left unchanged.
    pub fn publish(&self) -> u64 {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        if pending.entries.is_empty() {
            return current.version();
        }

        let next = Arc::new(current.appended(&pending.entries, current.version() + 1));
        let version = next.version();
        let added = pending.entries.len();
        pending.entries.clear();
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = next;
        self.clear_unavailable();
        log::info!("Published vector index v{version} (+{added} vectors)");
        version
    }

    /// Replace the whole index, discarding staged and published vectors.
    pub fn rebuild<I>(&self, entries: I) -> IndexResult<u64>
    where
        I: IntoIterator<Item = (ChunkId, Vec<f32>)>,
    {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let built = FlatSnapshot::build(self.dimension, entries)?;
        let version = self.snapshot().version() + 1;
        let next = Arc::new(built.with_version(version));
        pending.entries.clear();
        pending.known = next.chunk_ids.iter().copied().collect();
        let count = next.len();
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = next;
        self.clear_unavailable();
        log::info!("Rebuilt vector index v{version} ({count} vectors)");
        Ok(version)
    }

    /// Search the published snapshot.
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<VectorHit>> {
        if let Some(reason) = self.unavailable_reason() {
            return Err(IndexError::Unavailable(reason));
        }
        self.snapshot().search(query, k)
    }

    fn clear_unavailable(&self) {
        *self.unavailable.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scenario() -> FlatSnapshot {
        FlatSnapshot::build(
            2,
            vec![(0, vec![1.0, 0.0]), (1, vec![0.0, 1.0]), (2, vec![-1.0, 0.0])],
        )
        .unwrap()
    }

    fn ids(hits: &[VectorHit]) -> Vec<ChunkId> {
        hits.iter().map(|h| h.chunk_id).collect()
    }

    #[test]
    fn test_two_dimensional_scenario() {
        let hits = scenario().search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(
            hits,
            vec![
                VectorHit {
                    chunk_id: 0,
                    score: 1.0
                },
                VectorHit {
                    chunk_id: 1,
                    score: 0.0
                },
            ]
        );
    }

    #[test]
    fn test_returns_min_k_n() {
        let snapshot = scenario();
        assert_eq!(snapshot.search(&[0.0, 1.0], 10).unwrap().len(), 3);
        assert!(snapshot.search(&[0.0, 1.0], 0).unwrap().is_empty());
        assert!(FlatSnapshot::empty(2).search(&[0.0, 1.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_ties_follow_insertion_order() {
        let snapshot = FlatSnapshot::build(
            2,
            vec![(9, vec![0.0, 1.0]), (3, vec![0.0, 1.0]), (5, vec![0.0, 1.0])],
        )
        .unwrap();
        let hits = snapshot.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(ids(&hits), vec![9, 3]);
    }

    #[test]
    fn test_search_is_repeatable() {
        let snapshot = scenario();
        let a = snapshot.search(&[0.6, 0.8], 3).unwrap();
        let b = snapshot.search(&[0.6, 0.8], 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let index = VectorIndex::new(2);
        assert!(matches!(
            index.add(1, vec![1.0, 0.0, 0.0]),
            Err(IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert!(matches!(
            scenario().search(&[1.0], 1),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_add_is_invisible_until_publish() {
        let index = VectorIndex::new(2);
        index.add(0, vec![1.0, 0.0]).unwrap();
        assert!(index.search(&[1.0, 0.0], 5).unwrap().is_empty());
        assert_eq!(index.pending_len(), 1);

        let version = index.publish();
        assert_eq!(version, 1);
        assert_eq!(ids(&index.search(&[1.0, 0.0], 5).unwrap()), vec![0]);
        assert_eq!(index.publish(), 1);
    }

    #[test]
    fn test_in_flight_snapshot_survives_publish() {
        let index = VectorIndex::new(2);
        index.add(0, vec![1.0, 0.0]).unwrap();
        index.publish();

        let held = index.snapshot();
        index.add(1, vec![0.9, 0.1]).unwrap();
        index.publish();

        assert_eq!(held.len(), 1);
        assert_eq!(held.version(), 1);
        assert_eq!(index.snapshot().len(), 2);
        assert_eq!(index.version(), 2);
    }

    #[test]
    fn test_duplicate_chunk_is_rejected() {
        let index = VectorIndex::new(2);
        index.add(4, vec![1.0, 0.0]).unwrap();
        index.publish();
        assert!(matches!(
            index.add(4, vec![0.0, 1.0]),
            Err(IndexError::DuplicateChunk(4))
        ));
    }

    #[test]
    fn test_rebuild_replaces_everything_and_bumps_version() {
        let index = VectorIndex::new(2);
        index.add(0, vec![1.0, 0.0]).unwrap();
        index.publish();
        index.add(1, vec![0.0, 1.0]).unwrap();

        let version = index.rebuild(vec![(7, vec![0.0, 1.0])]).unwrap();
        assert_eq!(version, 2);
        assert_eq!(index.pending_len(), 0);
        assert_eq!(ids(&index.search(&[1.0, 0.0], 5).unwrap()), vec![7]);
        index.add(0, vec![1.0, 0.0]).unwrap();
    }

    #[test]
    fn test_unavailable_until_rebuilt() {
        let index = VectorIndex::unavailable(2, "persisted index is corrupt");
        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(IndexError::Unavailable(_))
        ));
        index.rebuild(vec![(0, vec![1.0, 0.0])]).unwrap();
        assert!(index.is_available());
        assert_eq!(index.search(&[1.0, 0.0], 1).unwrap().len(), 1);
    }
}
