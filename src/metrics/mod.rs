//! Prometheus metrics for the search engine.
//!
//! Collectors live in process-wide statics and are safe to update from any
//! thread. They only become visible through [`gather_metrics`] once
//! [`init_metrics`] has registered them.
//!
//! # Example
//! ```no_run
//! use accesslog_search::metrics::{self, SEARCHES_TOTAL};
//!
//! metrics::init_metrics().ok();
//! SEARCHES_TOTAL.with_label_values(&["success"]).inc();
//! println!("{}", metrics::gather_metrics());
//! ```

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry,
};

const NAMESPACE: &str = "accesslog_search";

lazy_static! {
    /// Registry holding every search engine collector
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Search Metrics
    // ============================================================================

    /// Total number of searches
    ///
    /// Labels: status (success, cache_hit, error, timeout)
    pub static ref SEARCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("searches_total", "Total number of searches").namespace(NAMESPACE),
        &["status"]
    ).expect("Failed to create SEARCHES_TOTAL metric");

    /// End-to-end search duration in seconds
    ///
    /// Labels: status
    pub static ref SEARCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("search_duration_seconds", "Search duration in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["status"]
    ).expect("Failed to create SEARCH_DURATION_SECONDS metric");

    /// Searches currently holding an admission permit
    pub static ref SEARCHES_ACTIVE: IntGauge = IntGauge::with_opts(
        Opts::new("searches_active", "Searches currently executing").namespace(NAMESPACE)
    ).expect("Failed to create SEARCHES_ACTIVE metric");

    /// Searches waiting for an admission permit
    pub static ref SEARCHES_QUEUED: IntGauge = IntGauge::with_opts(
        Opts::new("searches_queued", "Searches waiting for an admission permit")
            .namespace(NAMESPACE)
    ).expect("Failed to create SEARCHES_QUEUED metric");

    // ============================================================================
    // Cache Metrics
    // ============================================================================

    pub static ref CACHE_HITS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("cache_hits_total", "Result cache hits").namespace(NAMESPACE)
    ).expect("Failed to create CACHE_HITS_TOTAL metric");

    pub static ref CACHE_MISSES_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("cache_misses_total", "Result cache misses").namespace(NAMESPACE)
    ).expect("Failed to create CACHE_MISSES_TOTAL metric");

    pub static ref CACHE_EVICTIONS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("cache_evictions_total", "Result cache evictions under capacity pressure")
            .namespace(NAMESPACE)
    ).expect("Failed to create CACHE_EVICTIONS_TOTAL metric");

    /// Current weighted size of the result cache
    pub static ref CACHE_WEIGHTED_SIZE: Gauge = Gauge::with_opts(
        Opts::new("cache_weighted_size", "Weighted size of the result cache")
            .namespace(NAMESPACE)
    ).expect("Failed to create CACHE_WEIGHTED_SIZE metric");

    // ============================================================================
    // Shard Metrics
    // ============================================================================

    /// Per-shard execution time in seconds
    ///
    /// Labels: shard
    pub static ref SHARD_SEARCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("shard_search_duration_seconds", "Per-shard search duration in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["shard"]
    ).expect("Failed to create SHARD_SEARCH_DURATION_SECONDS metric");

    /// Per-shard failures
    ///
    /// Labels: shard
    pub static ref SHARD_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("shard_errors_total", "Per-shard search failures").namespace(NAMESPACE),
        &["shard"]
    ).expect("Failed to create SHARD_ERRORS_TOTAL metric");

    /// Shard swaps
    ///
    /// Labels: outcome (success, self_test_failed, rejected)
    pub static ref SHARD_SWAPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("shard_swaps_total", "Shard set replacements").namespace(NAMESPACE),
        &["outcome"]
    ).expect("Failed to create SHARD_SWAPS_TOTAL metric");

    /// Shards behind the live alias
    pub static ref SHARDS_ACTIVE: IntGauge = IntGauge::with_opts(
        Opts::new("shards_active", "Shards behind the live alias").namespace(NAMESPACE)
    ).expect("Failed to create SHARDS_ACTIVE metric");

    // ============================================================================
    // Cardinality Metrics
    // ============================================================================

    /// Cardinality computations
    ///
    /// Labels: method (facet, pagination, error), degraded (true, false)
    pub static ref CARDINALITY_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("cardinality_runs_total", "Cardinality computations").namespace(NAMESPACE),
        &["method", "degraded"]
    ).expect("Failed to create CARDINALITY_RUNS_TOTAL metric");
}

/// Register every collector with [`PROMETHEUS_REGISTRY`].
///
/// Fails with `AlreadyReg` when called twice in one process.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    // Search
    PROMETHEUS_REGISTRY.register(Box::new(SEARCHES_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SEARCH_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SEARCHES_ACTIVE.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SEARCHES_QUEUED.clone()))?;

    // Cache
    PROMETHEUS_REGISTRY.register(Box::new(CACHE_HITS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(CACHE_MISSES_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(CACHE_EVICTIONS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(CACHE_WEIGHTED_SIZE.clone()))?;

    // Shards
    PROMETHEUS_REGISTRY.register(Box::new(SHARD_SEARCH_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SHARD_ERRORS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SHARD_SWAPS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SHARDS_ACTIVE.clone()))?;

    // Cardinality
    PROMETHEUS_REGISTRY.register(Box::new(CARDINALITY_RUNS_TOTAL.clone()))?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Render all registered metrics in the Prometheus text exposition format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        // The registry is global; a second registration in the same process fails
        let first = init_metrics();
        let second = init_metrics();
        assert!(first.is_ok() || second.is_err());
    }

    #[test]
    fn test_gather_contains_search_metrics() {
        let _ = init_metrics();
        SEARCHES_TOTAL.with_label_values(&["success"]).inc();
        CACHE_HITS_TOTAL.inc();

        let output = gather_metrics();
        assert!(output.contains("accesslog_search_searches_total"));
        assert!(output.contains("accesslog_search_cache_hits_total"));
    }

    #[test]
    fn test_shard_histogram_labels() {
        SHARD_SEARCH_DURATION_SECONDS
            .with_label_values(&["shard-0"])
            .observe(0.002);
        let count = SHARD_SEARCH_DURATION_SECONDS
            .with_label_values(&["shard-0"])
            .get_sample_count();
        assert!(count >= 1);
    }
}
