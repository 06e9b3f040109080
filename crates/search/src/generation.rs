use crate::confidence::Confidence;
use crate::engine::QueryEngine;
use crate::error::GenerationError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sift_chunker::ChunkId;
use sift_protocol::{ConfidenceReport, QueryRequest, QueryResult, ResultMetadata};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// One retrieved chunk handed to the generator, in rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub chunk_id: ChunkId,
    pub snippet: String,
    pub metadata: ResultMetadata,
}

impl From<&QueryResult> for ContextChunk {
    fn from(result: &QueryResult) -> Self {
        Self {
            chunk_id: result.chunk_id,
            snippet: result.snippet.clone(),
            metadata: result.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub query: String,
    pub context: Vec<ContextChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub answer: String,
    /// Chunk ids the answer actually cites
    #[serde(default)]
    pub cited: Vec<ChunkId>,
}

/// Downstream answer-generation capability.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResponse, GenerationError>;
}

/// Generated answer with the results it cites.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub query: String,
    pub answer: String,
    pub citations: Vec<QueryResult>,
    pub confidence: ConfidenceReport,
}

/// Generation service reached over HTTP: `POST {endpoint}` with a `GenerationRequest` body.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: Client,
    endpoint: String,
}

impl HttpGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> std::result::Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Backend(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl AnswerGenerator for HttpGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResponse, GenerationError> {
        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }
                } else {
                    GenerationError::Backend(e.to_string())
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Backend(format!(
                "generation service returned {status}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| GenerationError::Backend(format!("invalid generation response: {e}")))
    }
}

impl QueryEngine {
    /// Retrieve context for `request` and have `generator` answer from it.
    ///
    /// Cited ids that were not part of the supplied context are discarded.
    pub async fn answer(
        &self,
        request: &QueryRequest,
        generator: &dyn AnswerGenerator,
    ) -> std::result::Result<Answer, GenerationError> {
        let results = self.query(request).await?;
        let confidence = Confidence::assess(&results, request.top_k);
        let generated = generator
            .generate(GenerationRequest {
                query: request.query.clone(),
                context: results.iter().map(ContextChunk::from).collect(),
            })
            .await?;

        let supplied: HashSet<ChunkId> = results.iter().map(|r| r.chunk_id).collect();
        let mut cited = HashSet::new();
        for chunk_id in &generated.cited {
            if !supplied.contains(chunk_id) {
                log::warn!("Generator cited chunk {chunk_id} outside the supplied context");
            } else {
                cited.insert(*chunk_id);
            }
        }

        Ok(Answer {
            query: request.query.clone(),
            answer: generated.answer,
            citations: results
                .iter()
                .filter(|r| cited.contains(&r.chunk_id))
                .cloned()
                .collect(),
            confidence,
        })
    }
}
