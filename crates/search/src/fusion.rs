use serde::{Deserialize, Serialize};
use sift_chunker::ChunkId;
use std::collections::HashMap;

/// How each input list is mapped onto `[0, 1]` before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `(s - min) / (max - min)`; a list of equal scores maps to 1.0
    MinMax,
    /// `(k + 1) / (k + rank)`; equal scores share a rank
    ReciprocalRank,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub normalization: Normalization,
    /// RRF constant, only used by `ReciprocalRank`
    pub rrf_k: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.5,
            keyword_weight: 0.5,
            normalization: Normalization::MinMax,
            rrf_k: 60.0,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (name, weight) in [
            ("vector_weight", self.vector_weight),
            ("keyword_weight", self.keyword_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(format!("{name} must be a finite value >= 0, got {weight}"));
            }
        }
        if self.vector_weight + self.keyword_weight == 0.0 {
            return Err("at least one fusion weight must be positive".to_string());
        }
        if !self.rrf_k.is_finite() || self.rrf_k <= 0.0 {
            return Err(format!("rrf_k must be > 0, got {}", self.rrf_k));
        }
        Ok(())
    }
}

/// A fused hit with the normalized per-path scores that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedHit {
    pub chunk_id: ChunkId,
    pub combined: f32,
    pub vector_score: Option<f32>,
    pub keyword_score: Option<f32>,
}

/// Weighted fusion of the vector and keyword rankings.
#[derive(Debug, Clone, Copy, Default)]
pub struct HybridRanker {
    config: FusionConfig,
}

impl HybridRanker {
    #[must_use]
    pub const fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse two rankings (each ordered best-first) into one list over their union.
    ///
    /// An absent score counts as 0. Output is sorted by combined score descending, ties by
    /// ascending chunk id. If one list is empty the other list's order is kept as is.
    #[must_use]
    pub fn fuse(&self, vector: &[(ChunkId, f32)], keyword: &[(ChunkId, f32)]) -> Vec<FusedHit> {
        let vector_norm = self.normalize(vector);
        let keyword_norm = self.normalize(keyword);
        let FusionConfig {
            vector_weight,
            keyword_weight,
            ..
        } = self.config;

        if keyword_norm.is_empty() {
            return vector_norm
                .into_iter()
                .map(|(chunk_id, score)| FusedHit {
                    chunk_id,
                    combined: vector_weight * score,
                    vector_score: Some(score),
                    keyword_score: None,
                })
                .collect();
        }
        if vector_norm.is_empty() {
            return keyword_norm
                .into_iter()
                .map(|(chunk_id, score)| FusedHit {
                    chunk_id,
                    combined: keyword_weight * score,
                    vector_score: None,
                    keyword_score: Some(score),
                })
                .collect();
        }

        let mut merged: HashMap<ChunkId, (Option<f32>, Option<f32>)> = HashMap::new();
        for (chunk_id, score) in vector_norm {
            merged.entry(chunk_id).or_default().0 = Some(score);
        }
        for (chunk_id, score) in keyword_norm {
            merged.entry(chunk_id).or_default().1 = Some(score);
        }

        let mut fused: Vec<FusedHit> = merged
            .into_iter()
            .map(|(chunk_id, (v, k))| FusedHit {
                chunk_id,
                combined: vector_weight * v.unwrap_or(0.0) + keyword_weight * k.unwrap_or(0.0),
                vector_score: v,
                keyword_score: k,
            })
            .collect();
        fused.sort_unstable_by(|a, b| {
            b.combined
                .total_cmp(&a.combined)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        fused
    }

    fn normalize(&self, list: &[(ChunkId, f32)]) -> Vec<(ChunkId, f32)> {
        match self.config.normalization {
            Normalization::MinMax => min_max(list),
            Normalization::ReciprocalRank => reciprocal_rank(list, self.config.rrf_k),
        }
    }
}

fn min_max(list: &[(ChunkId, f32)]) -> Vec<(ChunkId, f32)> {
    let (min, max) = list
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (_, s)| {
            (lo.min(*s), hi.max(*s))
        });
    let span = max - min;
    list.iter()
        .map(|&(chunk_id, score)| {
            let normalized = if span > 0.0 {
                (score - min) / span
            } else {
                1.0
            };
            (chunk_id, normalized)
        })
        .collect()
}

fn reciprocal_rank(list: &[(ChunkId, f32)], k: f32) -> Vec<(ChunkId, f32)> {
    let mut rank = 0usize;
    let mut previous: Option<f32> = None;
    list.iter()
        .enumerate()
        .map(|(position, &(chunk_id, score))| {
            if previous != Some(score) {
                rank = position + 1;
                previous = Some(score);
            }
            (chunk_id, (k + 1.0) / (k + rank as f32))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(hits: &[FusedHit]) -> Vec<ChunkId> {
        hits.iter().map(|h| h.chunk_id).collect()
    }

    #[test]
    fn min_max_maps_onto_unit_interval() {
        assert_eq!(
            min_max(&[(1, 0.9), (2, 0.5), (3, 0.1)]),
            vec![(1, 1.0), (2, 0.5), (3, 0.0)]
        );
        assert_eq!(min_max(&[(1, 0.3), (2, 0.3)]), vec![(1, 1.0), (2, 1.0)]);
    }

    #[test]
    fn reciprocal_rank_shares_rank_on_ties() {
        let normalized = reciprocal_rank(&[(1, 5.0), (2, 5.0), (3, 1.0)], 60.0);
        assert_eq!(normalized[0].1, 1.0);
        assert_eq!(normalized[1].1, 1.0);
        assert!((normalized[2].1 - 61.0 / 63.0).abs() < 1e-6);
    }

    #[test]
    fn absent_score_counts_as_zero() {
        let ranker = HybridRanker::default();
        let fused = ranker.fuse(&[(1, 0.9), (2, 0.1)], &[(2, 3.0), (3, 1.0)]);
        assert_eq!(ids(&fused), vec![1, 2, 3]);
        assert_eq!(fused[0].combined, 0.5);
        assert_eq!(fused[1].combined, 0.5);
        assert_eq!(fused[2].combined, 0.0);
        assert_eq!(fused[2].vector_score, None);
    }

    #[test]
    fn empty_keyword_list_keeps_vector_order() {
        let ranker = HybridRanker::default();
        let vector = [(9, 0.8), (3, 0.8), (5, 0.2)];
        assert_eq!(ids(&ranker.fuse(&vector, &[])), vec![9, 3, 5]);
        assert_eq!(ids(&ranker.fuse(&[], &vector)), vec![9, 3, 5]);
        assert!(ranker.fuse(&[], &[]).is_empty());
    }

    #[test]
    fn weights_shift_the_ranking() {
        let keyword_heavy = HybridRanker::new(FusionConfig {
            vector_weight: 0.2,
            keyword_weight: 0.8,
            ..FusionConfig::default()
        });
        let fused = keyword_heavy.fuse(&[(1, 1.0), (2, 0.0)], &[(2, 1.0), (1, 0.0)]);
        assert_eq!(ids(&fused), vec![2, 1]);
    }

    #[test]
    fn config_validation() {
        assert!(FusionConfig::default().validate().is_ok());
        let zero = FusionConfig {
            vector_weight: 0.0,
            keyword_weight: 0.0,
            ..FusionConfig::default()
        };
        assert!(zero.validate().is_err());
    }
}
