use serde::{Deserialize, Serialize};
use sift_protocol::normalize_category;
use std::collections::BTreeMap;

/// Statistics about one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Documents chunked and indexed
    pub documents: usize,

    /// Documents skipped as invalid or too short
    pub skipped_documents: usize,

    /// Chunks created
    pub chunks: usize,

    /// Chunks whose vector reached the index build
    pub embedded: usize,

    /// Chunks queued for embedding retry
    pub embedding_failures: usize,

    /// Time taken in milliseconds
    pub time_ms: u64,

    /// Documents per normalized category
    pub categories: BTreeMap<String, usize>,

    /// Errors encountered
    pub errors: Vec<String>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, category: Option<&str>, chunks: usize) {
        self.documents += 1;
        self.chunks += chunks;
        let category = category
            .map(normalize_category)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "uncategorized".to_string());
        *self.categories.entry(category).or_insert(0) += 1;
    }

    pub fn skip_document(&mut self, error: Option<String>) {
        self.skipped_documents += 1;
        if let Some(error) = error {
            self.errors.push(error);
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    /// Fold another run (e.g. a second input file) into this one.
    pub fn merge(&mut self, other: Self) {
        self.documents += other.documents;
        self.skipped_documents += other.skipped_documents;
        self.chunks += other.chunks;
        self.embedded += other.embedded;
        self.embedding_failures += other.embedding_failures;
        self.time_ms += other.time_ms;
        for (category, count) in other.categories {
            *self.categories.entry(category).or_insert(0) += count;
        }
        self.errors.extend(other.errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn categories_are_normalized_and_merged() {
        let mut first = IngestStats::new();
        first.add_document(Some("Credit Card"), 2);
        first.add_document(None, 1);
        first.skip_document(Some("bad id".to_string()));

        let mut second = IngestStats::new();
        second.add_document(Some(" credit card "), 3);
        second.skip_document(None);

        first.merge(second);
        assert_eq!(first.documents, 3);
        assert_eq!(first.chunks, 6);
        assert_eq!(first.skipped_documents, 2);
        assert_eq!(first.categories.get("credit card"), Some(&2));
        assert_eq!(first.categories.get("uncategorized"), Some(&1));
        assert_eq!(first.errors, vec!["bad id".to_string()]);
    }
}
