//! Hybrid retrieval: BM25 keyword index, score fusion, query cache and the query engine.
//!
//! ```text
//! QueryRequest
//!     │
//!     ├──> QueryCache (hit | join in-flight | lead)
//!     │
//!     ├──> QueryEnhancer (query variants)
//!     │
//!     ├──> Embedder ──> VectorIndex.search ─┐
//!     │                                     ├──> HybridRanker ──> MetadataStore ──> filters
//!     └──> KeywordIndex.search ─────────────┘
//! ```

mod analytics;
mod cache;
mod confidence;
mod engine;
mod enhance;
mod error;
mod fusion;
mod generation;
mod keyword;

pub use analytics::{QueryAnalytics, QueryStats};
pub use cache::{
    CacheConfig, CacheKey, CacheOutcome, CacheStats, CachedResults, Computed, IndexVersion,
    QueryCache, Shared,
};
pub use confidence::Confidence;
pub use engine::{EngineConfig, EngineStats, IndexSet, QueryEngine};
pub use enhance::{EnhancerConfig, QueryAnalysis, QueryEnhancer, QueryIntent};
pub use error::{GenerationError, QueryError, Result};
pub use fusion::{FusedHit, FusionConfig, HybridRanker, Normalization};
pub use generation::{
    AnswerGenerator, Answer, ContextChunk, GenerationRequest, GenerationResponse, HttpGenerator,
};
pub use keyword::{tokenize, Bm25Params, KeywordIndex};
