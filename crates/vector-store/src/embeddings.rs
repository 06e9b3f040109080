use crate::error::EmbeddingError;
use crate::remote::HttpEmbedder;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use unicode_segmentation::UnicodeSegmentation;

/// Outcome for a single text of a batch.
pub type EmbeddingResult = std::result::Result<Vec<f32>, EmbeddingError>;

/// Capability boundary for the embedding model.
///
/// Implementations return one outcome per input text, in input order. The outer error is
/// reserved for failures of the whole call (timeout, backend unavailable); a bad item
/// (e.g. empty text) only fails its own slot.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier; part of the determinism contract.
    fn model_id(&self) -> &str;

    /// Fixed vector dimension for this model version.
    fn dimension(&self) -> usize;

    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<EmbeddingResult>, EmbeddingError>;

    async fn embed(&self, text: &str) -> EmbeddingResult {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .unwrap_or_else(|| Err(EmbeddingError::Backend("empty embedding result".to_string())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderBackend {
    /// In-process deterministic feature-hashing model
    Local,
    /// HTTP embedding service
    Remote,
}

impl EmbedderBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub backend: EmbedderBackend,
    pub model_id: String,
    pub dimension: usize,
    /// Required for the remote backend
    pub endpoint: Option<String>,
    /// Per-call deadline for ingestion batches. Also the remote client's request timeout, so
    /// it caps query embedding too; the query path's own deadline is the engine's
    /// `embed_timeout_ms`.
    pub timeout_ms: u64,
    /// Largest batch sent in one call
    pub max_batch: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            backend: EmbedderBackend::Local,
            model_id: "hash-v1".to_string(),
            dimension: 384,
            endpoint: None,
            timeout_ms: 2_000,
            max_batch: 64,
        }
    }
}

impl EmbedderConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.dimension == 0 {
            return Err("embedder dimension must be > 0".to_string());
        }
        if self.model_id.trim().is_empty() {
            return Err("embedder model_id must not be empty".to_string());
        }
        if self.max_batch == 0 {
            return Err("embedder max_batch must be > 0".to_string());
        }
        if self.backend == EmbedderBackend::Remote
            && self.endpoint.as_deref().map_or(true, |e| e.trim().is_empty())
        {
            return Err("remote embedder requires an endpoint".to_string());
        }
        Ok(())
    }
}

/// Select the embedder variant named by the configuration.
pub fn build_embedder(config: &EmbedderConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    config.validate().map_err(EmbeddingError::Backend)?;
    match config.backend {
        EmbedderBackend::Local => {
            log::info!(
                "Using local embedder {} (dimension {})",
                config.model_id,
                config.dimension
            );
            Ok(Arc::new(HashEmbedder::new(
                config.model_id.clone(),
                config.dimension,
            )))
        }
        EmbedderBackend::Remote => {
            let endpoint = config.endpoint.clone().unwrap_or_default();
            log::info!("Using remote embedder {} at {endpoint}", config.model_id);
            Ok(Arc::new(HttpEmbedder::new(
                endpoint,
                config.model_id.clone(),
                config.dimension,
                config.timeout(),
            )?))
        }
    }
}

/// Embed `texts` with a bounded wait, enforcing dimension and unit norm on every vector.
///
/// Batches larger than `max_batch` are split; a failed sub-batch fails only its own items.
pub async fn embed_checked(
    embedder: &dyn Embedder,
    texts: &[String],
    timeout: Duration,
    max_batch: usize,
) -> Vec<EmbeddingResult> {
    let dimension = embedder.dimension();
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(max_batch.max(1)) {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, embedder.embed_batch(batch)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(EmbeddingError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        };
        match outcome {
            Ok(results) if results.len() == batch.len() => {
                out.extend(
                    results
                        .into_iter()
                        .map(|r| r.and_then(|v| unit_vector(v, dimension))),
                );
            }
            Ok(results) => {
                let err = EmbeddingError::Backend(format!(
                    "embedder returned {} vectors for {} texts",
                    results.len(),
                    batch.len()
                ));
                log::warn!("{err}");
                out.extend(batch.iter().map(|_| Err(err.clone())));
            }
            Err(err) => {
                log::warn!("Embedding batch of {} failed: {err}", batch.len());
                out.extend(batch.iter().map(|_| Err(err.clone())));
            }
        }
    }
    out
}

fn unit_vector(mut vector: Vec<f32>, dimension: usize) -> EmbeddingResult {
    if vector.len() != dimension {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(EmbeddingError::Backend(
            "embedding contains non-finite values".to_string(),
        ));
    }
    normalize(&mut vector);
    Ok(vector)
}

/// Scale to unit L2 norm in place; the zero vector is left untouched.
pub fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

/// Deterministic local model: signed feature hashing of word unigrams and bigrams.
///
/// Identical `(text, model_id)` always produce the identical vector.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    model_id: String,
    dimension: usize,
    seed: u64,
}

impl HashEmbedder {
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        let model_id = model_id.into();
        let seed = fnv1a_64(model_id.as_bytes())
            ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Self {
            model_id,
            dimension: dimension.max(1),
            seed,
        }
    }

    fn embed_one(&self, text: &str) -> EmbeddingResult {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let words: Vec<String> = text.unicode_words().map(str::to_lowercase).collect();
        if words.is_empty() {
            return Ok(self.whole_text_vector(text));
        }

        let mut vec = vec![0.0f32; self.dimension];
        for word in &words {
            self.accumulate(&mut vec, word.as_bytes(), 1.0);
        }
        for pair in words.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vec, bigram.as_bytes(), 0.5);
        }
        normalize(&mut vec);
        Ok(vec)
    }

    fn accumulate(&self, vec: &mut [f32], feature: &[u8], weight: f32) {
        let mut state = fnv1a_64(feature) ^ self.seed;
        let bits = splitmix64(&mut state);
        let bucket = (bits % self.dimension as u64) as usize;
        let sign = if bits >> 63 == 0 { 1.0 } else { -1.0 };
        vec[bucket] += sign * weight;
    }

    fn whole_text_vector(&self, text: &str) -> Vec<f32> {
        let mut state = fnv1a_64(text.as_bytes()) ^ self.seed;
        let mut vec = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            let bits = splitmix64(&mut state);
            let high = (bits >> 32) as u32;
            let mantissa = high >> 9;
            let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
            vec.push(unit.mul_add(2.0, -1.0));
        }
        normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<EmbeddingResult>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
