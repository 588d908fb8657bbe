//! Search and per-shard statistics

use crate::search::cache::CacheStats;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of searcher activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearcherStats {
    pub running: bool,
    pub shard_count: usize,
    /// Generation of the live shard set (0 once stopped)
    pub generation: u64,

    pub total_searches: u64,
    pub successful_searches: u64,
    pub failed_searches: u64,

    /// Searches holding an admission permit
    pub active_searches: u64,
    /// Searches waiting for a permit
    pub queued_searches: u64,

    pub min_latency_ms: f64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,

    pub shards: BTreeMap<String, ShardStats>,
    pub cache: CacheStats,
}

/// Activity of one shard in the current generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardStats {
    pub searches: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
}

#[derive(Default)]
struct ShardCounters {
    searches: AtomicU64,
    errors: AtomicU64,
    total_latency_us: AtomicU64,
}

/// Per-shard counters for the live shard set
///
/// Recording takes the read lock only; `reset` (on swap) takes the write
/// lock. Reports for shards outside the current set are dropped, so
/// searches still running against a retired set do not leak into the new
/// generation's numbers.
#[derive(Default)]
pub struct ShardTracker {
    shards: RwLock<HashMap<String, ShardCounters>>,
}

impl ShardTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked set, zeroing every counter
    pub fn reset<'a>(&self, shard_ids: impl IntoIterator<Item = &'a str>) {
        let fresh = shard_ids
            .into_iter()
            .map(|id| (id.to_string(), ShardCounters::default()))
            .collect();
        *self.shards.write() = fresh;
    }

    pub fn clear(&self) {
        self.shards.write().clear();
    }

    pub fn record(&self, shard_id: &str, elapsed: Duration, ok: bool) {
        let shards = self.shards.read();
        let Some(counters) = shards.get(shard_id) else {
            return;
        };
        counters.searches.fetch_add(1, Ordering::Relaxed);
        if !ok {
            counters.errors.fetch_add(1, Ordering::Relaxed);
        }
        counters
            .total_latency_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BTreeMap<String, ShardStats> {
        self.shards
            .read()
            .iter()
            .map(|(id, counters)| {
                let searches = counters.searches.load(Ordering::Relaxed);
                let total_us = counters.total_latency_us.load(Ordering::Relaxed);
                let avg_latency_ms = if searches == 0 {
                    0.0
                } else {
                    total_us as f64 / searches as f64 / 1000.0
                };
                (
                    id.clone(),
                    ShardStats {
                        searches,
                        errors: counters.errors.load(Ordering::Relaxed),
                        avg_latency_ms,
                    },
                )
            })
            .collect()
    }
}

#[derive(Default)]
struct LatencyWindow {
    count: u64,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

/// Search-level counters
#[derive(Default)]
pub(crate) struct SearchCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    active: AtomicU64,
    queued: AtomicU64,
    latency: Mutex<LatencyWindow>,
}

impl SearchCounters {
    pub fn record(&self, elapsed: Duration, ok: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if ok {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut latency = self.latency.lock();
        if latency.count == 0 {
            latency.min_ms = ms;
            latency.max_ms = ms;
        } else {
            latency.min_ms = latency.min_ms.min(ms);
            latency.max_ms = latency.max_ms.max(ms);
        }
        latency.count += 1;
        latency.total_ms += ms;
    }

    pub fn inc_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_queued(&self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn inc_active(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Fill the search-level part of a stats snapshot
    pub fn fill(&self, stats: &mut SearcherStats) {
        stats.total_searches = self.total.load(Ordering::Relaxed);
        stats.successful_searches = self.successful.load(Ordering::Relaxed);
        stats.failed_searches = self.failed.load(Ordering::Relaxed);
        stats.active_searches = self.active.load(Ordering::Relaxed);
        stats.queued_searches = self.queued.load(Ordering::Relaxed);

        let latency = self.latency.lock();
        if latency.count > 0 {
            stats.min_latency_ms = latency.min_ms;
            stats.max_latency_ms = latency.max_ms;
            stats.avg_latency_ms = latency.total_ms / latency.count as f64;
        }
    }
}
