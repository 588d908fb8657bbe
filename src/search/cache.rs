//! Cost-aware result cache
//!
//! Entries are keyed by a SHA-256 fingerprint of the request's semantic
//! content plus the shard generation the result was computed on, weighted by
//! result size and expire after a per-entry TTL. A result from a retired
//! generation can still be written late, but no lookup against the live
//! generation will ever see it.

use crate::metrics::{CACHE_EVICTIONS_TOTAL, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, CACHE_WEIGHTED_SIZE};
use crate::search::request::SearchRequest;
use crate::search::result::SearchResult;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::Expiry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub entry_count: u64,
    /// Sum of entry costs currently held
    pub weighted_size: u64,
    pub max_weight: u64,
}

#[derive(Clone)]
struct CachedEntry {
    result: Arc<SearchResult>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CachedEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded cache of search results
pub struct ResultCache {
    cache: Cache<String, CachedEntry>,
    max_weight: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: Arc<AtomicU64>,
}

impl ResultCache {
    /// `max_entries * cost_per_entry` bounds the summed entry cost
    pub fn new(max_entries: u64, cost_per_entry: u64) -> Self {
        let max_weight = max_entries.saturating_mul(cost_per_entry.max(1));
        let evictions = Arc::new(AtomicU64::new(0));
        let listener_evictions = Arc::clone(&evictions);

        let cache = Cache::builder()
            .max_capacity(max_weight)
            .weigher(|_key: &String, entry: &CachedEntry| {
                u32::try_from(entry_cost(&entry.result)).unwrap_or(u32::MAX)
            })
            .expire_after(PerEntryTtl)
            .eviction_listener(move |_key, _entry, cause: RemovalCause| {
                if cause.was_evicted() {
                    listener_evictions.fetch_add(1, Ordering::Relaxed);
                    CACHE_EVICTIONS_TOTAL.inc();
                }
            })
            .build();

        Self {
            cache,
            max_weight,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            evictions,
        }
    }

    /// Look up a result computed on `generation`; cached copies come back
    /// with `from_cache` set
    pub async fn get(&self, request: &SearchRequest, generation: u64) -> Option<SearchResult> {
        let key = entry_key(request, generation);
        match self.cache.get(&key).await {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                CACHE_HITS_TOTAL.inc();
                debug!(key = %key, "Result cache hit");
                let mut result = entry.result.as_ref().clone();
                result.from_cache = true;
                Some(result)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                CACHE_MISSES_TOTAL.inc();
                None
            }
        }
    }

    /// Store a result computed on `generation` for `ttl`
    pub async fn put(
        &self,
        request: &SearchRequest,
        generation: u64,
        result: &SearchResult,
        ttl: Duration,
    ) {
        let mut stored = result.clone();
        stored.from_cache = false;
        let entry = CachedEntry {
            result: Arc::new(stored),
            ttl,
        };
        self.cache.insert(entry_key(request, generation), entry).await;
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop every entry
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let weighted_size = self.cache.weighted_size();
        CACHE_WEIGHTED_SIZE.set(weighted_size as f64);

        CacheStats {
            hits,
            misses,
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            entry_count: self.cache.entry_count(),
            weighted_size,
            max_weight: self.max_weight,
        }
    }

    /// Apply pending evictions so counts are current
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// Cost of caching a result
pub fn entry_cost(result: &SearchResult) -> u64 {
    1 + result.hits.len() as u64
}

fn entry_key(request: &SearchRequest, generation: u64) -> String {
    format!("{}:{}", generation, cache_key(request))
}

/// Fingerprint of the semantic content of a request
///
/// Multi-value lists are sorted and de-duplicated; `use_cache` and `timeout`
/// do not take part.
pub fn cache_key(request: &SearchRequest) -> String {
    let mut key = KeyWriter::default();

    key.text("query", &request.query);
    key.list("fields", request.fields.iter().cloned());
    key.opt("start_time", request.start_time);
    key.opt("end_time", request.end_time);
    for (field, values) in request.term_filters() {
        key.list(field, values.into_iter());
    }
    key.opt("min_bytes", request.min_bytes);
    key.opt("max_bytes", request.max_bytes);
    key.opt("min_request_time", request.min_request_time.map(f64::to_bits));
    key.opt("max_request_time", request.max_request_time.map(f64::to_bits));
    key.text("limit", &request.limit.to_string());
    key.text("offset", &request.offset.to_string());
    key.text("sort_by", request.sort_field());
    key.text("sort_order", &request.sort_order.to_string());
    key.text("include_facets", &request.include_facets.to_string());
    key.list("facet_fields", request.facet_fields.iter().cloned());
    key.opt("facet_size", request.facet_size);
    key.text("highlight", &request.highlight.to_string());
    key.text("include_stats", &request.include_stats.to_string());

    format!("{:x}", key.hasher.finalize())
}

/// Feeds labeled, length-prefixed components into the digest
#[derive(Default)]
struct KeyWriter {
    hasher: Sha256,
}

impl KeyWriter {
    fn text(&mut self, label: &str, value: &str) {
        self.hasher.update(label.as_bytes());
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value.as_bytes());
    }

    fn opt<T: std::fmt::Display>(&mut self, label: &str, value: Option<T>) {
        match value {
            Some(value) => self.text(label, &value.to_string()),
            None => self.hasher.update(label.as_bytes()),
        }
    }

    fn list(&mut self, label: &str, values: impl Iterator<Item = String>) {
        let values: BTreeSet<String> = values.collect();
        self.hasher.update(label.as_bytes());
        self.hasher.update((values.len() as u64).to_le_bytes());
        for value in &values {
            self.hasher.update((value.len() as u64).to_le_bytes());
            self.hasher.update(value.as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::request::SortOrder;
    use crate::search::result::SearchHit;
    use std::collections::BTreeMap;

    fn result_with_hits(n: usize) -> SearchResult {
        SearchResult {
            hits: (0..n)
                .map(|i| SearchHit {
                    id: format!("doc-{}", i),
                    score: 1.0,
                    fields: BTreeMap::new(),
                    highlights: BTreeMap::new(),
                    shard_id: "s0".to_string(),
                })
                .collect(),
            total_hits: n as u64,
            took_ms: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_key_ignores_list_order_and_duplicates() {
        let a = SearchRequest::new("error")
            .with_countries(vec!["US", "CN", "DE"])
            .with_status_codes(vec![500, 404]);
        let b = SearchRequest::new("error")
            .with_countries(vec!["DE", "US", "CN", "US"])
            .with_status_codes(vec![404, 500, 404]);
        assert_eq!(cache_key(&a), cache_key(&b));
        assert_eq!(cache_key(&a).len(), 64);
    }

    #[test]
    fn test_key_distinguishes_values() {
        let base = SearchRequest::new("error");
        let variants = vec![
            SearchRequest::new("errors"),
            base.clone().with_countries(vec!["US"]),
            base.clone().with_methods(vec!["US"]),
            base.clone().with_offset(10),
            base.clone().with_sort("bytes_sent", SortOrder::Asc),
            base.clone().with_request_time_range(Some(0.5), None),
            base.clone().with_facets(vec!["country"], Some(5)),
        ];
        let base_key = cache_key(&base);
        let mut keys = BTreeSet::new();
        for variant in &variants {
            let key = cache_key(variant);
            assert_ne!(key, base_key, "{:?}", variant);
            keys.insert(key);
        }
        assert_eq!(keys.len(), variants.len());
    }

    #[test]
    fn test_key_ignores_cache_and_timeout_options() {
        let base = SearchRequest::new("error");
        let tuned = base
            .clone()
            .with_cache(false)
            .with_timeout(Duration::from_millis(5));
        assert_eq!(cache_key(&base), cache_key(&tuned));
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cache = ResultCache::new(100, 50);
        let request = SearchRequest::new("GET");
        let result = result_with_hits(3);

        assert!(cache.get(&request, 1).await.is_none());
        cache.put(&request, 1, &result, Duration::from_secs(60)).await;

        let cached = cache.get(&request, 1).await.unwrap();
        assert!(cached.from_cache);
        assert_eq!(SearchResult { from_cache: false, ..cached }, result);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.inserts, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_weighted_size() {
        let cache = ResultCache::new(10, 50);
        cache
            .put(&SearchRequest::new("a"), 1, &result_with_hits(4), Duration::from_secs(60))
            .await;
        cache
            .put(&SearchRequest::new("b"), 1, &result_with_hits(0), Duration::from_secs(60))
            .await;
        cache.sync().await;

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.weighted_size, 5 + 1);
        assert_eq!(stats.max_weight, 500);
    }

    #[tokio::test]
    async fn test_per_entry_ttl() {
        let cache = ResultCache::new(100, 50);
        let short = SearchRequest::new("short");
        let long = SearchRequest::new("long");
        cache.put(&short, 1, &result_with_hits(1), Duration::from_millis(50)).await;
        cache.put(&long, 1, &result_with_hits(1), Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get(&short, 1).await.is_none());
        assert!(cache.get(&long, 1).await.is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = ResultCache::new(100, 50);
        let request = SearchRequest::new("x");
        cache.put(&request, 1, &result_with_hits(2), Duration::from_secs(60)).await;
        cache.clear().await;
        assert!(cache.get(&request, 1).await.is_none());
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[tokio::test]
    async fn test_entries_are_scoped_to_their_generation() {
        let cache = ResultCache::new(100, 50);
        let request = SearchRequest::new("x");
        cache.put(&request, 3, &result_with_hits(2), Duration::from_secs(60)).await;

        assert!(cache.get(&request, 4).await.is_none());
        assert!(cache.get(&request, 2).await.is_none());
        assert_eq!(cache.get(&request, 3).await.unwrap().hits.len(), 2);
    }
}
