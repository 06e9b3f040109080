use crate::error::{IngestionError, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use sift_chunker::{Document, DocumentMetadata};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

/// One line of a documents file.
///
/// Metadata may be nested under `metadata` or given as top-level fields; top-level fields
/// win when both are present.
#[derive(Debug, Deserialize)]
struct SourceRecord {
    id: String,
    text: String,
    #[serde(default)]
    metadata: Option<DocumentMetadata>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    date: Option<NaiveDate>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl From<SourceRecord> for Document {
    fn from(record: SourceRecord) -> Self {
        let mut metadata = record.metadata.unwrap_or_default();
        if record.category.is_some() {
            metadata.category = record.category;
        }
        if record.date.is_some() {
            metadata.date = record.date;
        }
        metadata.tags.extend(record.tags);
        metadata.attributes.extend(record.attributes);
        Self::new(record.id, record.text).with_metadata(metadata)
    }
}

/// Documents parsed from a JSON-lines file plus the lines that could not be parsed.
#[derive(Debug, Default)]
pub struct JsonlDocuments {
    pub documents: Vec<Document>,
    pub errors: Vec<IngestionError>,
}

/// Parse one JSON-lines record. `line` is 1-based and only used in the error.
pub fn parse_document_line(raw: &str, line: usize) -> std::result::Result<Document, IngestionError> {
    serde_json::from_str::<SourceRecord>(raw)
        .map(Document::from)
        .map_err(|e| IngestionError::Malformed {
            line,
            reason: e.to_string(),
        })
}

/// Read documents from a JSON-lines file. Blank lines are ignored; malformed lines are
/// reported with their line number and skipped.
pub async fn read_documents_jsonl(path: impl AsRef<Path>) -> Result<JsonlDocuments> {
    let path = path.as_ref();
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut out = JsonlDocuments::default();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match parse_document_line(&line, line_no) {
            Ok(document) => out.documents.push(document),
            Err(err) => {
                log::warn!("Skipping {}: {err}", path.display());
                out.errors.push(err);
            }
        }
    }

    log::info!(
        "Read {} documents from {} ({} malformed lines)",
        out.documents.len(),
        path.display(),
        out.errors.len()
    );
    Ok(out)
}
