use crate::embeddings::{Embedder, EmbeddingResult};
use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    vectors: Vec<Option<Vec<f32>>>,
}

/// Embedding service reached over HTTP.
///
/// Wire shape: `POST {endpoint}` with `{"model": .., "texts": [..]}`, answered by
/// `{"vectors": [[..] | null, ..]}` in request order. A `null` slot is a per-item failure.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model_id: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model_id: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Backend(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model_id: model_id.into(),
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
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
        let mut slots: Vec<Option<EmbeddingResult>> = texts
            .iter()
            .map(|t| t.trim().is_empty().then_some(Err(EmbeddingError::EmptyInput)))
            .collect();
        let sent: Vec<&str> = texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(String::as_str)
            .collect();
        if sent.is_empty() {
            return Ok(slots.into_iter().flatten().collect());
        }

        let request = EmbedRequest {
            model: &self.model_id,
            texts: sent.clone(),
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout { elapsed_ms: 0 }
                } else {
                    EmbeddingError::Backend(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingError::Backend(format!(
                "embedding service returned {status}"
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Backend(format!("invalid embedding response: {e}")))?;
        if body.vectors.len() != sent.len() {
            return Err(EmbeddingError::Backend(format!(
                "embedding service returned {} vectors for {} texts",
                body.vectors.len(),
                sent.len()
            )));
        }

        let mut vectors = body.vectors.into_iter();
        for slot in &mut slots {
            if slot.is_none() {
                let vector = vectors.next().flatten().ok_or_else(|| {
                    EmbeddingError::Backend("embedding service rejected text".to_string())
                });
                *slot = Some(vector);
            }
        }
        Ok(slots.into_iter().flatten().collect())
    }
}
