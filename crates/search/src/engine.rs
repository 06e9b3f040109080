use crate::analytics::{QueryAnalytics, QueryStats};
use crate::cache::{
    CacheConfig, CacheKey, CacheOutcome, CacheStats, CachedResults, Computed, IndexVersion,
    QueryCache,
};
use crate::confidence::Confidence;
use crate::enhance::QueryEnhancer;
use crate::error::{QueryError, Result};
use crate::fusion::{FusedHit, FusionConfig, HybridRanker};
use crate::keyword::KeywordIndex;
use serde::{Deserialize, Serialize};
use sift_chunker::ChunkId;
use sift_protocol::{QueryFilters, QueryRequest, QueryResponse, QueryResult};
use sift_vector_store::{embed_checked, Embedder, MetadataStore, VectorIndex};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for embedding the query text. Ingestion uses the embedder's own `timeout_ms`.
    pub embed_timeout_ms: u64,
    /// Deadline for each of the vector and keyword searches
    pub search_timeout_ms: u64,
    /// Each path retrieves `top_k * candidate_multiplier` candidates before filtering
    pub candidate_multiplier: usize,
    pub max_top_k: usize,
    pub snippet_chars: usize,
    /// 0 disables snippet de-duplication
    pub dedupe_prefix_chars: usize,
    pub max_concurrent_queries: usize,
    pub queue_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embed_timeout_ms: 2_000,
            search_timeout_ms: 1_000,
            candidate_multiplier: 4,
            max_top_k: 100,
            snippet_chars: 300,
            dedupe_prefix_chars: 150,
            max_concurrent_queries: 64,
            queue_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_top_k == 0 {
            return Err("max_top_k must be > 0".to_string());
        }
        if self.candidate_multiplier == 0 {
            return Err("candidate_multiplier must be > 0".to_string());
        }
        if self.max_concurrent_queries == 0 {
            return Err("max_concurrent_queries must be > 0".to_string());
        }
        if self.embed_timeout_ms == 0 || self.search_timeout_ms == 0 {
            return Err("timeouts must be > 0".to_string());
        }
        Ok(())
    }

    #[must_use]
    pub const fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }

    #[must_use]
    pub const fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    #[must_use]
    pub const fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}

/// Everything a query reads, shared with the ingestion path.
#[derive(Clone)]
pub struct IndexSet {
    pub embedder: Arc<dyn Embedder>,
    pub vectors: Arc<VectorIndex>,
    pub keywords: Arc<KeywordIndex>,
    pub metadata: Arc<MetadataStore>,
}

impl IndexSet {
    #[must_use]
    pub fn version(&self) -> IndexVersion {
        IndexVersion {
            vector: self.vectors.version(),
            keyword: self.keywords.version(),
            metadata: self.metadata.version(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub queries: QueryStats,
    pub cache: CacheStats,
    pub vector_count: usize,
    pub vector_version: u64,
    pub vector_available: bool,
    pub keyword_chunks: usize,
    pub keyword_version: u64,
    pub chunks: usize,
}

/// Orchestrates one query: cache, embed, parallel retrieval, fusion, metadata resolution.
pub struct QueryEngine {
    config: EngineConfig,
    indexes: IndexSet,
    ranker: HybridRanker,
    enhancer: QueryEnhancer,
    cache: QueryCache,
    permits: Arc<Semaphore>,
    analytics: QueryAnalytics,
}

type PathResult = std::result::Result<Vec<(ChunkId, f32)>, String>;

impl QueryEngine {
    pub fn new(
        config: EngineConfig,
        fusion: FusionConfig,
        cache: CacheConfig,
        indexes: IndexSet,
    ) -> std::result::Result<Self, String> {
        config.validate()?;
        fusion.validate()?;
        cache.validate()?;
        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_queries)),
            config,
            indexes,
            ranker: HybridRanker::new(fusion),
            enhancer: QueryEnhancer::default(),
            cache: QueryCache::new(cache),
            analytics: QueryAnalytics::default(),
        })
    }

    /// Search every variant `enhancer` produces instead of the raw query alone.
    #[must_use]
    pub fn with_enhancer(mut self, enhancer: QueryEnhancer) -> Self {
        self.enhancer = enhancer;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn indexes(&self) -> &IndexSet {
        &self.indexes
    }

    pub fn index_version(&self) -> IndexVersion {
        self.indexes.version()
    }

    /// Ranked results for `request`, at most `top_k` of them.
    ///
    /// Dropping the returned future cancels the query; coalesced waiters then receive
    /// `QueryError::Cancelled`.
    pub async fn query(&self, request: &QueryRequest) -> Result<CachedResults> {
        let outcome = self.query_inner(request).await;
        match &outcome {
            Ok(results) => self.analytics.record_success(results.len()),
            Err(err) => {
                self.analytics.record_failure();
                log::debug!("Query failed: {err}");
            }
        }
        outcome
    }

    /// `query` plus a confidence assessment, in wire form.
    pub async fn respond(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let results = self.query(request).await?;
        let confidence = Confidence::assess(&results, request.top_k);
        Ok(QueryResponse {
            query: request.query.clone(),
            top_k: request.top_k,
            results: results.as_ref().clone(),
            confidence,
        })
    }

    pub fn stats(&self) -> EngineStats {
        let vectors = &self.indexes.vectors;
        let keywords = &self.indexes.keywords;
        EngineStats {
            queries: self.analytics.snapshot(),
            cache: self.cache.stats(),
            vector_count: vectors.len(),
            vector_version: vectors.version(),
            vector_available: vectors.is_available(),
            keyword_chunks: keywords.len(),
            keyword_version: keywords.version(),
            chunks: self.indexes.metadata.len(),
        }
    }

    async fn query_inner(&self, request: &QueryRequest) -> Result<CachedResults> {
        let query = request.query.trim();
        self.validate(query, request)?;

        let waited = Instant::now();
        let _permit = match tokio::time::timeout(
            self.config.queue_timeout(),
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(QueryError::Internal("query pool closed".to_string())),
            Err(_) => {
                return Err(QueryError::Overloaded {
                    waited_ms: waited.elapsed().as_millis() as u64,
                })
            }
        };

        let key = CacheKey::new(query, request.top_k, &request.filters, self.index_version());
        let (result, outcome) = self
            .cache
            .get_or_compute(key, || self.retrieve(query, request.top_k, &request.filters))
            .await;
        match outcome {
            CacheOutcome::Hit => self.analytics.record_cache_hit(),
            CacheOutcome::Coalesced => self.analytics.record_coalesced(),
            CacheOutcome::Computed | CacheOutcome::Bypassed => {}
        }
        result
    }

    fn validate(&self, query: &str, request: &QueryRequest) -> Result<()> {
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        if request.top_k == 0 || request.top_k > self.config.max_top_k {
            return Err(QueryError::InvalidTopK {
                top_k: request.top_k,
                max: self.config.max_top_k,
            });
        }
        if request
            .filters
            .date_range
            .as_ref()
            .is_some_and(|range| range.is_inverted())
        {
            return Err(QueryError::InvalidFilters(
                "date_range.from is after date_range.to".to_string(),
            ));
        }
        Ok(())
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: &QueryFilters,
    ) -> std::result::Result<Computed, QueryError> {
        let started = Instant::now();
        let mut pool = top_k.saturating_mul(self.config.candidate_multiplier);
        if filters.is_active() {
            pool = pool.saturating_mul(2);
        }

        let variants = self.enhancer.variants(query);
        if variants.len() > 1 {
            log::debug!("Searching {} query variants: {variants:?}", variants.len());
        }

        let vector_path = self.vector_path(&variants, pool);
        let keyword_path = self.keyword_path(&variants, pool);
        let (vector, keyword) = tokio::join!(vector_path, keyword_path);

        let degraded = vector.is_err() || keyword.is_err();
        let (vector, keyword) = match (vector, keyword) {
            (Err(vector), Err(keyword)) => {
                self.analytics.record_retrieval(false);
                log::warn!("Both retrieval paths failed: vector: {vector}; keyword: {keyword}");
                return Err(QueryError::NoRetrievalPath { vector, keyword });
            }
            (Ok(vector), Err(reason)) => {
                log::warn!("Keyword path failed ({reason}); serving vector-only ranking");
                (vector, Vec::new())
            }
            (Err(reason), Ok(keyword)) => {
                log::warn!("Vector path failed ({reason}); serving keyword-only ranking");
                (Vec::new(), keyword)
            }
            (Ok(vector), Ok(keyword)) => (vector, keyword),
        };
        self.analytics.record_retrieval(degraded);

        let fused = self.ranker.fuse(&vector, &keyword);
        let results = self.resolve(&fused, top_k, filters);
        log::debug!(
            "Query retrieved {} vector + {} keyword candidates -> {} results in {} ms",
            vector.len(),
            keyword.len(),
            results.len(),
            started.elapsed().as_millis()
        );

        Ok(Computed {
            results: Arc::new(results),
            cacheable: !degraded,
        })
    }

    async fn vector_path(&self, variants: &[String], pool: usize) -> PathResult {
        let vectors = &self.indexes.vectors;
        if let Some(reason) = vectors.unavailable_reason() {
            return Err(format!("index unavailable: {reason}"));
        }

        let mut embeddings = Vec::with_capacity(variants.len());
        let mut first_error = None;
        let results = embed_checked(
            self.indexes.embedder.as_ref(),
            variants,
            self.config.embed_timeout(),
            variants.len().max(1),
        )
        .await;
        for result in results {
            match result {
                Ok(embedding) => embeddings.push(embedding),
                Err(e) if first_error.is_none() => {
                    first_error = Some(format!("embedding failed ({}): {e}", e.reason_code()));
                }
                Err(_) => {}
            }
        }
        if embeddings.is_empty() {
            return Err(first_error.unwrap_or_else(|| "no query text to embed".to_string()));
        }

        let vectors = Arc::clone(vectors);
        bounded(self.config.search_timeout(), "vector search", move || {
            let mut lists: Vec<Vec<(ChunkId, f32)>> = Vec::with_capacity(embeddings.len());
            for embedding in &embeddings {
                let hits = vectors.search(embedding, pool).map_err(|e| e.to_string())?;
                lists.push(hits.into_iter().map(|h| (h.chunk_id, h.score)).collect());
            }
            Ok(merge_variant_hits(lists, pool))
        })
        .await
    }

    async fn keyword_path(&self, variants: &[String], pool: usize) -> PathResult {
        if self.indexes.keywords.is_empty() {
            return Err("keyword index is empty".to_string());
        }
        let keywords = Arc::clone(&self.indexes.keywords);
        let variants = variants.to_vec();
        bounded(self.config.search_timeout(), "keyword search", move || {
            let lists: Vec<Vec<(ChunkId, f32)>> = variants
                .iter()
                .map(|variant| keywords.search(variant, pool))
                .collect();
            Ok(merge_variant_hits(lists, pool))
        })
        .await
    }

    /// Attach metadata, drop filtered and duplicate snippets, truncate to `top_k`.
    fn resolve(&self, fused: &[FusedHit], top_k: usize, filters: &QueryFilters) -> Vec<QueryResult> {
        let dedupe = self.config.dedupe_prefix_chars;
        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::with_capacity(top_k);

        for hit in fused {
            if results.len() == top_k {
                break;
            }
            let Some(record) = self.indexes.metadata.get(hit.chunk_id) else {
                log::warn!("Chunk {} has no metadata record; skipping", hit.chunk_id);
                continue;
            };
            if !filters.allows(record.metadata.category.as_deref(), record.metadata.date) {
                continue;
            }
            let snippet = record.snippet(self.config.snippet_chars);
            if dedupe > 0 {
                let prefix: String = snippet.chars().take(dedupe).collect();
                if !seen.insert(prefix) {
                    continue;
                }
            }
            results.push(QueryResult {
                chunk_id: hit.chunk_id,
                score: hit.combined,
                snippet,
                metadata: record.result_metadata(),
            });
        }
        results
    }
}

/// Best score per chunk across the variant rankings, descending, at most `pool` long.
///
/// The sort is stable, so a single ranking keeps its own tie order.
fn merge_variant_hits(lists: Vec<Vec<(ChunkId, f32)>>, pool: usize) -> Vec<(ChunkId, f32)> {
    let mut merged: Vec<(ChunkId, f32)> = lists.into_iter().flatten().collect();
    merged.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut seen = HashSet::with_capacity(merged.len());
    merged.retain(|(chunk_id, _)| seen.insert(*chunk_id));
    merged.truncate(pool);
    merged
}

/// Run a CPU-bound search on the blocking pool with a deadline.
async fn bounded<F>(timeout: Duration, what: &str, search: F) -> PathResult
where
    F: FnOnce() -> PathResult + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(search)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(format!("{what} task failed: {join}")),
        Err(_) => Err(format!("{what} timed out after {} ms", timeout.as_millis())),
    }
}
