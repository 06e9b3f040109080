use sift_protocol::{ConfidenceBreakdown, ConfidenceLevel, ConfidenceReport, QueryResult};
use std::collections::HashSet;

const SIMILARITY_WEIGHT: f32 = 40.0;
const RETRIEVAL_WEIGHT: f32 = 30.0;
const DIVERSITY_WEIGHT: f32 = 20.0;
const COMPLETENESS_WEIGHT: f32 = 10.0;

/// Heuristic 0-100 trust score for a result list.
pub struct Confidence;

impl Confidence {
    #[must_use]
    pub fn assess(results: &[QueryResult], requested_k: usize) -> ConfidenceReport {
        if results.is_empty() {
            return ConfidenceReport {
                score: 0.0,
                level: ConfidenceLevel::NoData,
                breakdown: ConfidenceBreakdown::default(),
            };
        }

        let n = results.len() as f32;
        let mean_score = results.iter().map(|r| r.score.clamp(0.0, 1.0)).sum::<f32>() / n;
        let retrieval = (n / requested_k.max(1) as f32).min(1.0);
        let categories: HashSet<Option<String>> = results
            .iter()
            .map(|r| {
                r.metadata
                    .source
                    .category
                    .as_deref()
                    .map(sift_protocol::normalize_category)
            })
            .collect();
        let diversity = categories.len() as f32 / n;
        let complete = results
            .iter()
            .filter(|r| r.metadata.source.category.is_some() && r.metadata.source.date.is_some())
            .count() as f32
            / n;

        let breakdown = ConfidenceBreakdown {
            similarity: mean_score * SIMILARITY_WEIGHT,
            retrieval_quality: retrieval * RETRIEVAL_WEIGHT,
            source_diversity: diversity * DIVERSITY_WEIGHT,
            metadata_completeness: complete * COMPLETENESS_WEIGHT,
        };
        let score = breakdown.similarity
            + breakdown.retrieval_quality
            + breakdown.source_diversity
            + breakdown.metadata_completeness;

        ConfidenceReport {
            score,
            level: level_for(score),
            breakdown,
        }
    }
}

fn level_for(score: f32) -> ConfidenceLevel {
    if score >= 70.0 {
        ConfidenceLevel::High
    } else if score >= 40.0 {
        ConfidenceLevel::Medium
    } else if score >= 20.0 {
        ConfidenceLevel::Low
    } else {
        ConfidenceLevel::VeryLow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use sift_protocol::{DocumentMetadata, ResultMetadata};

    fn result(score: f32, category: Option<&str>, dated: bool) -> QueryResult {
        let mut source = DocumentMetadata::default();
        source.category = category.map(str::to_string);
        if dated {
            source.date = NaiveDate::from_ymd_opt(2023, 5, 1);
        }
        QueryResult {
            chunk_id: 0,
            score,
            snippet: String::new(),
            metadata: ResultMetadata {
                document_id: "d".to_string(),
                sequence_index: 0,
                start_offset: 0,
                end_offset: 0,
                source,
            },
        }
    }

    #[test]
    fn empty_results_have_no_data() {
        let report = Confidence::assess(&[], 5);
        assert_eq!(report.level, ConfidenceLevel::NoData);
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn strong_diverse_complete_results_are_high() {
        let results = vec![
            result(1.0, Some("Mortgage"), true),
            result(0.9, Some("Credit card"), true),
        ];
        let report = Confidence::assess(&results, 2);
        assert!((report.breakdown.similarity - 38.0).abs() < 1e-4);
        assert_eq!(report.breakdown.retrieval_quality, 30.0);
        assert_eq!(report.breakdown.source_diversity, 20.0);
        assert_eq!(report.breakdown.metadata_completeness, 10.0);
        assert_eq!(report.level, ConfidenceLevel::High);
    }

    #[test]
    fn sparse_weak_results_score_low() {
        let results = vec![result(0.1, None, false)];
        let report = Confidence::assess(&results, 10);
        assert!((report.score - 27.0).abs() < 1e-4);
        assert_eq!(report.level, ConfidenceLevel::Low);
    }

    #[test]
    fn category_case_does_not_add_diversity() {
        let results = vec![
            result(0.0, Some("Mortgage"), false),
            result(0.0, Some("mortgage"), false),
        ];
        let report = Confidence::assess(&results, 10);
        assert_eq!(report.breakdown.source_diversity, 10.0);
        assert_eq!(report.level, ConfidenceLevel::VeryLow);
    }
}
