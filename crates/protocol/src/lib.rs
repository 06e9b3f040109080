use anyhow::Result;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod filters;

pub use filters::{normalize_category, DateRange, QueryFilters};

pub const QUERY_API_VERSION: u32 = 1;

pub const DEFAULT_TOP_K: usize = 5;

/// Stable error codes of the query interface.
pub mod codes {
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const UNAVAILABLE: &str = "unavailable";
    pub const CANCELLED: &str = "cancelled";
    pub const OVERLOADED: &str = "overloaded";
    pub const INTERNAL: &str = "internal";
}

/// Source metadata attached to every document and copied onto its chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Free-form source fields (issue, company, state, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl DocumentMetadata {
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub const fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueryRequest {
    pub query: String,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default)]
    pub filters: QueryFilters,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            top_k,
            filters: QueryFilters::default(),
        }
    }

    #[must_use]
    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = filters;
        self
    }
}

const fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

/// Metadata of the chunk behind a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResultMetadata {
    pub document_id: String,
    pub sequence_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    #[serde(flatten)]
    pub source: DocumentMetadata,
}

/// One ranked, resolved chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryResult {
    pub chunk_id: u64,
    pub score: f32,
    pub snippet: String,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    VeryLow,
    NoData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConfidenceBreakdown {
    pub similarity: f32,
    pub retrieval_quality: f32,
    pub source_diversity: f32,
    pub metadata_completeness: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConfidenceReport {
    pub score: f32,
    pub level: ConfidenceLevel,
    pub breakdown: ConfidenceBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryResponse {
    pub query: String,
    pub top_k: usize,
    pub results: Vec<QueryResult>,
    pub confidence: ConfidenceReport,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        let hint = match code {
            codes::INVALID_REQUEST => Some(
                "Send a non-empty query and a top_k between 1 and the server maximum.".to_string(),
            ),
            codes::UNAVAILABLE => {
                Some("Neither vector nor keyword retrieval is available; rebuild the index.".to_string())
            }
            codes::OVERLOADED => Some("Retry after a short delay.".to_string()),
            _ => None,
        };
        Self {
            code: code.to_string(),
            message: message.into(),
            hint,
        }
    }
}

pub fn serialize_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}

pub fn query_request_schema() -> Result<String> {
    let schema = schemars::schema_for!(QueryRequest);
    serde_json::to_string_pretty(&schema).map_err(Into::into)
}
