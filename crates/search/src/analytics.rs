use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running query counters of one engine.
#[derive(Debug, Default)]
pub struct QueryAnalytics {
    total: AtomicU64,
    successful: AtomicU64,
    degraded: AtomicU64,
    failed: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    computed: AtomicU64,
    results: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QueryStats {
    pub total_queries: u64,
    /// Queries that returned at least one result
    pub successful_queries: u64,
    /// Retrievals served by only one of the two paths
    pub degraded_queries: u64,
    pub failed_queries: u64,
    pub cache_hits: u64,
    pub coalesced_waits: u64,
    /// Retrievals actually executed (cache misses)
    pub retrievals: u64,
    pub total_results: u64,
    pub success_rate: f64,
    pub mean_results: f64,
}

impl QueryAnalytics {
    pub(crate) fn record_success(&self, result_count: usize) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if result_count > 0 {
            self.successful.fetch_add(1, Ordering::Relaxed);
        }
        self.results
            .fetch_add(result_count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retrieval(&self, degraded: bool) {
        self.computed.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.degraded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> QueryStats {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let results = self.results.load(Ordering::Relaxed);
        let ratio = |num: u64| {
            if total == 0 {
                0.0
            } else {
                num as f64 / total as f64
            }
        };
        QueryStats {
            total_queries: total,
            successful_queries: successful,
            degraded_queries: self.degraded.load(Ordering::Relaxed),
            failed_queries: self.failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced.load(Ordering::Relaxed),
            retrievals: self.computed.load(Ordering::Relaxed),
            total_results: results,
            success_rate: ratio(successful),
            mean_results: ratio(results),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_rates() {
        let analytics = QueryAnalytics::default();
        assert_eq!(analytics.snapshot().success_rate, 0.0);

        analytics.record_success(4);
        analytics.record_success(0);
        analytics.record_failure();
        analytics.record_retrieval(true);

        let stats = analytics.snapshot();
        assert_eq!(stats.total_queries, 3);
        assert_eq!(stats.successful_queries, 1);
        assert_eq!(stats.failed_queries, 1);
        assert_eq!(stats.degraded_queries, 1);
        assert!((stats.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((stats.mean_results - 4.0 / 3.0).abs() < 1e-9);
    }
}
