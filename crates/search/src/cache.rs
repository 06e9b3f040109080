use crate::error::{CacheError, QueryError};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sift_protocol::{QueryFilters, QueryResult};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Final, shareable result list of one query.
pub type CachedResults = Arc<Vec<QueryResult>>;

/// Outcome handed to the leader and every coalesced waiter.
pub type Shared = Result<CachedResults, QueryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached result lists
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("cache capacity must be > 0".to_string());
        }
        Ok(())
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Versions of the searchable indexes and the metadata store at lookup time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct IndexVersion {
    pub vector: u64,
    pub keyword: u64,
    pub metadata: u64,
}

/// blake3 digest of `(query_text, top_k, filters, index_version)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    #[must_use]
    pub fn new(query: &str, top_k: usize, filters: &QueryFilters, version: IndexVersion) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"sift-query-v1\0");
        write_field(&mut hasher, query.as_bytes());
        hasher.update(&(top_k as u64).to_le_bytes());
        write_field(&mut hasher, filters.canonical().as_bytes());
        hasher.update(&version.vector.to_le_bytes());
        hasher.update(&version.keyword.to_le_bytes());
        hasher.update(&version.metadata.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

fn write_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// How a lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    /// This caller ran the computation
    Computed,
    /// This caller waited on another caller's computation
    Coalesced,
    /// The cache was faulty and skipped
    Bypassed,
}

/// Result of a computation plus whether it may be stored.
#[derive(Debug, Clone)]
pub struct Computed {
    pub results: CachedResults,
    pub cacheable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub expired: u64,
}

struct Entry {
    results: CachedResults,
    inserted: Instant,
}

struct State {
    entries: LruCache<CacheKey, Entry>,
    inflight: HashMap<CacheKey, watch::Receiver<Option<Shared>>>,
}

enum Lookup {
    Hit(CachedResults),
    Wait(watch::Receiver<Option<Shared>>),
    Lead(watch::Sender<Option<Shared>>),
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
}

/// Bounded LRU of query results with TTL and single-flight computation.
///
/// Keys embed the index version, so a publish makes older entries unreachable; they age out
/// through LRU eviction or TTL without an explicit sweep.
pub struct QueryCache {
    ttl: Duration,
    state: Mutex<State>,
    counters: Counters,
}

impl QueryCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl: config.ttl(),
            state: Mutex::new(State {
                entries: LruCache::new(capacity),
                inflight: HashMap::new(),
            }),
            counters: Counters::default(),
        }
    }

    /// Return the cached value for `key`, join an identical in-flight computation, or run
    /// `compute` and share its outcome with everyone who joins meanwhile.
    ///
    /// Dropping the leading caller before it finishes hands `QueryError::Cancelled` to every
    /// waiter and frees the slot. Failures are shared but never stored.
    pub async fn get_or_compute<F, Fut>(&self, key: CacheKey, compute: F) -> (Shared, CacheOutcome)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Computed, QueryError>>,
    {
        let lookup = match self.lookup(key) {
            Ok(lookup) => lookup,
            Err(err) => {
                log::warn!("Bypassing query cache: {err}");
                let result = compute().await.map(|computed| computed.results);
                return (result, CacheOutcome::Bypassed);
            }
        };

        match lookup {
            Lookup::Hit(results) => (Ok(results), CacheOutcome::Hit),
            Lookup::Wait(rx) => (wait_for(rx).await, CacheOutcome::Coalesced),
            Lookup::Lead(tx) => {
                let mut flight = Flight {
                    cache: self,
                    key,
                    tx: Some(tx),
                };
                let outcome = compute().await;
                (flight.finish(outcome), CacheOutcome::Computed)
            }
        }
    }

    fn lookup(&self, key: CacheKey) -> Result<Lookup, CacheError> {
        let mut state = self.lock()?;

        let fresh = state
            .entries
            .get(&key)
            .filter(|entry| entry.inserted.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.results));
        if let Some(results) = fresh {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Lookup::Hit(results));
        }
        if state.entries.pop(&key).is_some() {
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(rx) = state.inflight.get(&key) {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            return Ok(Lookup::Wait(rx.clone()));
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        state.inflight.insert(key, rx);
        Ok(Lookup::Lead(tx))
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, CacheError> {
        self.state.lock().map_err(|_| CacheError::Poisoned)
    }

    fn settle(&self, key: CacheKey, store: Option<CachedResults>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.inflight.remove(&key);
        if let Some(results) = store {
            let entry = Entry {
                results,
                inserted: Instant::now(),
            };
            if let Some((evicted, _)) = state.entries.push(key, entry) {
                if evicted != key {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map_or(0, |state| state.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
        }
    }
}

/// Leader's hold on an in-flight slot.
struct Flight<'a> {
    cache: &'a QueryCache,
    key: CacheKey,
    tx: Option<watch::Sender<Option<Shared>>>,
}

impl Flight<'_> {
    fn finish(&mut self, outcome: Result<Computed, QueryError>) -> Shared {
        let store = match &outcome {
            Ok(computed) if computed.cacheable => Some(Arc::clone(&computed.results)),
            _ => None,
        };
        let shared = outcome.map(|computed| computed.results);
        self.cache.settle(self.key, store);
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(shared.clone()));
        }
        shared
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            log::debug!("In-flight query dropped before completion; cancelling waiters");
            self.cache.settle(self.key, None);
            let _ = tx.send(Some(Err(QueryError::Cancelled)));
        }
    }
}

async fn wait_for(mut rx: watch::Receiver<Option<Shared>>) -> Shared {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(result) = current {
            return result;
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone().unwrap_or(Err(QueryError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sift_protocol::{DocumentMetadata, ResultMetadata};
    use std::sync::atomic::AtomicUsize;

    fn results(chunk_id: u64) -> CachedResults {
        Arc::new(vec![QueryResult {
            chunk_id,
            score: 1.0,
            snippet: format!("chunk {chunk_id}"),
            metadata: ResultMetadata {
                document_id: "d".to_string(),
                sequence_index: 0,
                start_offset: 0,
                end_offset: 1,
                source: DocumentMetadata::default(),
            },
        }])
    }

    fn key(query: &str, vector: u64) -> CacheKey {
        CacheKey::new(
            query,
            5,
            &QueryFilters::default(),
            IndexVersion {
                vector,
                ..IndexVersion::default()
            },
        )
    }

    fn cacheable(chunk_id: u64) -> Result<Computed, QueryError> {
        Ok(Computed {
            results: results(chunk_id),
            cacheable: true,
        })
    }

    #[test]
    fn key_covers_every_input() {
        let base = key("late fee", 1);
        assert_eq!(base, key("late fee", 1));
        assert_ne!(base, key("late fees", 1));
        assert_ne!(base, key("late fee", 2));
        let filtered = CacheKey::new(
            "late fee",
            5,
            &QueryFilters {
                category: Some("Mortgage".to_string()),
                date_range: None,
            },
            IndexVersion {
                vector: 1,
                ..IndexVersion::default()
            },
        );
        assert_ne!(base, filtered);
        let other_k = CacheKey::new(
            "late fee",
            6,
            &QueryFilters::default(),
            IndexVersion {
                vector: 1,
                ..IndexVersion::default()
            },
        );
        assert_ne!(base, other_k);
        let relabeled = CacheKey::new(
            "late fee",
            5,
            &QueryFilters::default(),
            IndexVersion {
                vector: 1,
                keyword: 0,
                metadata: 1,
            },
        );
        assert_ne!(base, relabeled);
    }

    #[tokio::test]
    async fn second_lookup_hits() {
        let cache = QueryCache::new(CacheConfig::default());
        let (first, outcome) = cache.get_or_compute(key("q", 1), || async { cacheable(3) }).await;
        assert_eq!(outcome, CacheOutcome::Computed);
        let (second, outcome) = cache
            .get_or_compute(key("q", 1), || async { cacheable(4) })
            .await;
        assert_eq!(outcome, CacheOutcome::Hit);
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    }

    #[tokio::test]
    async fn new_index_version_misses() {
        let cache = QueryCache::new(CacheConfig::default());
        let _ = cache.get_or_compute(key("q", 1), || async { cacheable(3) }).await;
        let (result, outcome) = cache
            .get_or_compute(key("q", 2), || async { cacheable(4) })
            .await;
        assert_eq!(outcome, CacheOutcome::Computed);
        assert_eq!(result.unwrap()[0].chunk_id, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_absent() {
        let cache = QueryCache::new(CacheConfig {
            capacity: 8,
            ttl_secs: 10,
        });
        let _ = cache.get_or_compute(key("q", 1), || async { cacheable(1) }).await;
        tokio::time::advance(Duration::from_secs(9)).await;
        let (_, outcome) = cache.get_or_compute(key("q", 1), || async { cacheable(2) }).await;
        assert_eq!(outcome, CacheOutcome::Hit);

        tokio::time::advance(Duration::from_secs(2)).await;
        let (result, outcome) = cache
            .get_or_compute(key("q", 1), || async { cacheable(2) })
            .await;
        assert_eq!(outcome, CacheOutcome::Computed);
        assert_eq!(result.unwrap()[0].chunk_id, 2);
        assert_eq!(cache.stats().expired, 1);
    }

    #[tokio::test]
    async fn least_recently_used_is_evicted() {
        let cache = QueryCache::new(CacheConfig {
            capacity: 2,
            ttl_secs: 300,
        });
        let _ = cache.get_or_compute(key("a", 1), || async { cacheable(1) }).await;
        let _ = cache.get_or_compute(key("b", 1), || async { cacheable(2) }).await;
        let _ = cache.get_or_compute(key("a", 1), || async { cacheable(9) }).await;
        let _ = cache.get_or_compute(key("c", 1), || async { cacheable(3) }).await;

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        let (_, outcome) = cache.get_or_compute(key("a", 1), || async { cacheable(9) }).await;
        assert_eq!(outcome, CacheOutcome::Hit);
        let (_, outcome) = cache.get_or_compute(key("b", 1), || async { cacheable(9) }).await;
        assert_eq!(outcome, CacheOutcome::Computed);
    }

    #[tokio::test]
    async fn failures_and_uncacheable_results_are_not_stored() {
        let cache = QueryCache::new(CacheConfig::default());
        let (result, _) = cache
            .get_or_compute(key("q", 1), || async { Err(QueryError::EmptyQuery) })
            .await;
        assert_eq!(result, Err(QueryError::EmptyQuery));
        let _ = cache
            .get_or_compute(key("q", 1), || async {
                Ok(Computed {
                    results: results(1),
                    cacheable: false,
                })
            })
            .await;
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn poisoned_cache_is_bypassed() {
        let cache = Arc::new(QueryCache::new(CacheConfig::default()));
        let poisoner = Arc::clone(&cache);
        let _ = std::thread::spawn(move || {
            let _state = poisoner.state.lock().unwrap();
            panic!("poison the cache lock");
        })
        .join();
        assert!(matches!(cache.lock(), Err(CacheError::Poisoned)));

        let (result, outcome) = cache.get_or_compute(key("q", 1), || async { cacheable(5) }).await;
        assert_eq!(outcome, CacheOutcome::Bypassed);
        assert_eq!(result.unwrap()[0].chunk_id, 5);

        let (_, outcome) = cache.get_or_compute(key("q", 1), || async { cacheable(6) }).await;
        assert_eq!(outcome, CacheOutcome::Bypassed);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn identical_concurrent_lookups_share_one_computation() {
        let cache = Arc::new(QueryCache::new(CacheConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let leader = {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_compute(key("q", 1), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = release_rx.await;
                        cacheable(7)
                    })
                    .await
            })
        };
        while cache.stats().misses == 0 {
            tokio::task::yield_now().await;
        }

        let follower = {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_compute(key("q", 1), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        cacheable(8)
                    })
                    .await
            })
        };
        while cache.stats().coalesced == 0 {
            tokio::task::yield_now().await;
        }
        let _ = release_tx.send(());

        let (a, a_outcome) = leader.await.unwrap();
        let (b, b_outcome) = follower.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a_outcome, CacheOutcome::Computed);
        assert_eq!(b_outcome, CacheOutcome::Coalesced);
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[tokio::test]
    async fn cancelled_leader_propagates_cancellation() {
        let cache = Arc::new(QueryCache::new(CacheConfig::default()));

        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute(key("q", 1), || async {
                        std::future::pending::<()>().await;
                        cacheable(1)
                    })
                    .await
            })
        };
        while cache.stats().misses == 0 {
            tokio::task::yield_now().await;
        }

        let follower = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute(key("q", 1), || async { cacheable(2) })
                    .await
            })
        };
        while cache.stats().coalesced == 0 {
            tokio::task::yield_now().await;
        }

        leader.abort();
        let (result, outcome) = follower.await.unwrap();
        assert_eq!(outcome, CacheOutcome::Coalesced);
        assert_eq!(result, Err(QueryError::Cancelled));

        let (result, outcome) = cache.get_or_compute(key("q", 1), || async { cacheable(3) }).await;
        assert_eq!(outcome, CacheOutcome::Computed);
        assert_eq!(result.unwrap()[0].chunk_id, 3);
    }
}
