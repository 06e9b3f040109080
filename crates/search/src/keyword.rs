use serde::{Deserialize, Serialize};
use sift_chunker::ChunkId;
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};
use unicode_segmentation::UnicodeSegmentation;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "had", "has", "have",
    "i", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not", "of", "on", "or", "so",
    "that", "the", "their", "them", "then", "there", "these", "they", "this", "to", "was", "we",
    "were", "which", "will", "with", "you", "your",
];

/// BM25 tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f32,
    /// Length normalization strength, `0..=1`
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl Bm25Params {
    pub fn validate(&self) -> Result<(), String> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(format!("bm25 k1 must be >= 0, got {}", self.k1));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(format!("bm25 b must be within 0..=1, got {}", self.b));
        }
        Ok(())
    }
}

/// Lowercased word tokens, stopwords and single characters removed.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(str::to_lowercase)
        .filter(|word| word.chars().count() > 1 && !STOPWORDS.contains(&word.as_str()))
        .collect()
}

#[derive(Debug, Default)]
struct Postings {
    /// term -> (chunk_id, term_frequency), ascending chunk id
    terms: HashMap<String, Vec<(ChunkId, u32)>>,
    lengths: HashMap<ChunkId, u32>,
    total_length: u64,
    version: u64,
}

impl Postings {
    fn insert(&mut self, chunk_id: ChunkId, text: &str) -> bool {
        if self.lengths.contains_key(&chunk_id) {
            return false;
        }
        let tokens = tokenize(text);
        let mut frequencies: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *frequencies.entry(token.clone()).or_insert(0) += 1;
        }
        for (term, tf) in frequencies {
            let list = self.terms.entry(term).or_default();
            let at = list.partition_point(|(id, _)| *id < chunk_id);
            list.insert(at, (chunk_id, tf));
        }
        self.lengths.insert(chunk_id, tokens.len() as u32);
        self.total_length += tokens.len() as u64;
        true
    }
}

/// Inverted index with BM25 scoring.
///
/// Updates are incremental and additive only: `add` takes the write lock briefly, becomes
/// visible to the next search, and bumps the version. Chunks are never removed.
#[derive(Debug, Default)]
pub struct KeywordIndex {
    params: Bm25Params,
    postings: RwLock<Postings>,
}

impl KeywordIndex {
    #[must_use]
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            postings: RwLock::default(),
        }
    }

    /// Build from `(chunk_id, text)` pairs, e.g. the persisted metadata side-store.
    pub fn from_records<'a, I>(params: Bm25Params, records: I) -> Self
    where
        I: IntoIterator<Item = (ChunkId, &'a str)>,
    {
        let index = Self::new(params);
        index.add_batch(records);
        index
    }

    #[must_use]
    pub const fn params(&self) -> Bm25Params {
        self.params
    }

    /// Index one chunk. Returns `false` if the chunk was already indexed.
    pub fn add(&self, chunk_id: ChunkId, text: &str) -> bool {
        self.add_batch([(chunk_id, text)]) == 1
    }

    /// Index many chunks under one version bump. Returns how many were new.
    pub fn add_batch<'a, I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = (ChunkId, &'a str)>,
    {
        let mut postings = self.postings.write().unwrap_or_else(PoisonError::into_inner);
        let added = records
            .into_iter()
            .filter(|(chunk_id, text)| postings.insert(*chunk_id, text))
            .count();
        if added > 0 {
            postings.version += 1;
        }
        added
    }

    pub fn version(&self) -> u64 {
        self.postings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .version
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.postings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lengths
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn term_count(&self) -> usize {
        self.postings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .terms
            .len()
    }

    /// Top `k` chunks by BM25, ties broken by ascending chunk id.
    ///
    /// Chunks matching no query term are not returned.
    pub fn search(&self, query: &str, k: usize) -> Vec<(ChunkId, f32)> {
        let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        if terms.is_empty() || k == 0 {
            return Vec::new();
        }

        let postings = self.postings.read().unwrap_or_else(PoisonError::into_inner);
        let n = postings.lengths.len() as f32;
        if n == 0.0 {
            return Vec::new();
        }
        let avg_len = (postings.total_length as f32 / n).max(1.0);
        let Bm25Params { k1, b } = self.params;

        let mut scores: HashMap<ChunkId, f32> = HashMap::new();
        for term in &terms {
            let Some(list) = postings.terms.get(term) else {
                continue;
            };
            let df = list.len() as f32;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            for &(chunk_id, tf) in list {
                let tf = tf as f32;
                let len = postings.lengths.get(&chunk_id).copied().unwrap_or(0) as f32;
                let norm = k1 * (1.0 - b + b * len / avg_len);
                *scores.entry(chunk_id).or_insert(0.0) += idf * tf * (k1 + 1.0) / (tf + norm);
            }
        }
        drop(postings);

        let mut ranked: Vec<(ChunkId, f32)> = scores.into_iter().collect();
        ranked.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }
}
