//! Distributed searcher: admission control, caching and hot shard swap

use crate::config::EngineConfig;
use crate::error::{Result, SearchError};
use crate::metrics::{
    SEARCHES_ACTIVE, SEARCHES_QUEUED, SEARCHES_TOTAL, SEARCH_DURATION_SECONDS, SHARDS_ACTIVE,
    SHARD_SWAPS_TOTAL,
};
use crate::search::alias::{AliasRequest, ShardAlias, SortSpec};
use crate::search::cache::ResultCache;
use crate::search::document::LogSchema;
use crate::search::query::QueryBuilder;
use crate::search::request::{SearchRequest, SCORE_SORT};
use crate::search::result::SearchResult;
use crate::search::shard::Shard;
use crate::search::stats::{SearchCounters, SearcherStats, ShardTracker};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Name of the logical alias over the live shard set
pub const ALIAS_NAME: &str = "access-logs";

/// How one request is executed once it has been validated
#[derive(Debug, Clone)]
pub(crate) struct ExecutionPlan {
    pub offset: usize,
    pub size: usize,
    pub facet_fields: Vec<String>,
    pub facet_size: usize,
    pub highlight: bool,
    pub stats: bool,
    pub fields: Vec<String>,
    pub timeout: Duration,
    pub warning: Option<String>,
}

/// Entry point for searching a set of access-log shards
///
/// Every search runs as one globally scored query over the alias snapshot
/// taken when it was admitted. At most `max_concurrency` searches execute
/// at once; the rest wait for a permit until their deadline.
pub struct DistributedSearcher {
    config: EngineConfig,
    query_builder: QueryBuilder,
    alias: RwLock<Option<Arc<ShardAlias>>>,
    /// Generation of the most recently installed alias
    generation: AtomicU64,
    running: AtomicBool,
    permits: Semaphore,
    cache: Arc<ResultCache>,
    counters: SearchCounters,
    tracker: ShardTracker,
}

impl DistributedSearcher {
    /// Create a searcher over `shards`
    pub fn new(shards: Vec<Arc<Shard>>, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let schema = LogSchema::new();
        let alias = ShardAlias::new(ALIAS_NAME, shards, schema.clone(), config.shard_timeout())?
            .with_generation(1);
        let tracker = ShardTracker::new();
        tracker.reset(alias.shard_ids());
        SHARDS_ACTIVE.set(alias.len() as i64);

        info!(
            alias = ALIAS_NAME,
            shards = alias.len(),
            documents = alias.num_docs(),
            max_concurrency = config.max_concurrency,
            "Distributed searcher started"
        );

        Ok(Self {
            query_builder: QueryBuilder::new(schema, config.max_facet_size),
            alias: RwLock::new(Some(Arc::new(alias))),
            generation: AtomicU64::new(1),
            running: AtomicBool::new(true),
            permits: Semaphore::new(config.max_concurrency),
            cache: Arc::new(ResultCache::new(config.cache_size, config.cost_per_entry_budget)),
            counters: SearchCounters::default(),
            tracker,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn schema(&self) -> &LogSchema {
        self.query_builder.schema()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of shards behind the live alias
    pub fn shard_count(&self) -> usize {
        self.alias.read().as_ref().map(|a| a.len()).unwrap_or(0)
    }

    /// Generation of the live alias; 0 once stopped
    pub fn generation(&self) -> u64 {
        self.alias.read().as_ref().map(|a| a.generation()).unwrap_or(0)
    }

    /// The live alias, for callers that need several searches over one
    /// shard generation
    pub(crate) fn snapshot(&self) -> Result<Arc<ShardAlias>> {
        if !self.is_running() {
            return Err(SearchError::NotRunning);
        }
        self.alias.read().clone().ok_or_else(|| {
            SearchError::AliasUnavailable("searcher has been stopped".to_string())
        })
    }

    /// Run a search
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        let started = Instant::now();
        if !self.is_running() {
            return Err(SearchError::NotRunning);
        }

        let outcome = self.search_inner(request).await;
        self.record(started, &outcome);
        outcome
    }

    async fn search_inner(&self, request: &SearchRequest) -> Result<SearchResult> {
        self.query_builder.validate(request)?;
        let plan = self.plan(request)?;

        let use_cache = self.config.enable_cache && request.use_cache.unwrap_or(true);
        if use_cache {
            let live = self.generation();
            if let Some(cached) = self.cache.get(request, live).await {
                debug!(
                    total_hits = cached.total_hits,
                    generation = live,
                    "Served search from cache"
                );
                return Ok(cached);
            }
        }

        // Stored under the generation it ran on, which a swap may already
        // have retired
        let (result, generation) = self.execute(request, &plan, None).await?;
        if use_cache {
            self.cache
                .put(request, generation, &result, self.config.cache_ttl())
                .await;
        }
        Ok(result)
    }

    /// Run a search in the background
    ///
    /// Exactly one of the two receivers yields a value; both close once the
    /// search has finished.
    pub fn search_async(
        self: &Arc<Self>,
        request: SearchRequest,
    ) -> (mpsc::Receiver<SearchResult>, mpsc::Receiver<SearchError>) {
        let (result_tx, result_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);
        let searcher = Arc::clone(self);

        tokio::spawn(async move {
            match searcher.search(&request).await {
                Ok(result) => {
                    let _ = result_tx.send(result).await;
                }
                Err(e) => {
                    let _ = error_tx.send(e).await;
                }
            }
        });

        (result_rx, error_rx)
    }

    /// Execute a validated plan on a pinned alias without consulting the
    /// cache, recording the outcome like a regular search
    pub(crate) async fn search_with_plan(
        &self,
        request: &SearchRequest,
        plan: &ExecutionPlan,
        alias: &Arc<ShardAlias>,
    ) -> Result<SearchResult> {
        let started = Instant::now();
        if !self.is_running() {
            return Err(SearchError::NotRunning);
        }

        let outcome = self
            .execute(request, plan, Some(Arc::clone(alias)))
            .await
            .map(|(result, _)| result);
        self.record(started, &outcome);
        outcome
    }

    /// Replace the live shard set
    ///
    /// The new alias is validated before anything changes. Searches already
    /// admitted finish on the shards they started with. The cache is cleared
    /// shortly after the swap; a failed post-swap self-test is reported as
    /// [`SearchError::SelfTestFailed`] although the new shards stay live.
    pub async fn swap_shards(&self, shards: Vec<Arc<Shard>>) -> Result<()> {
        if !self.is_running() {
            SHARD_SWAPS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(SearchError::NotRunning);
        }

        let alias = match ShardAlias::new(
            ALIAS_NAME,
            shards,
            self.schema().clone(),
            self.config.shard_timeout(),
        ) {
            Ok(alias) => alias,
            Err(e) => {
                SHARD_SWAPS_TOTAL.with_label_values(&["rejected"]).inc();
                warn!(error = %e, "Rejected shard swap");
                return Err(e);
            }
        };

        let (previous, alias) = {
            let mut live = self.alias.write();
            let Some(previous) = live.take() else {
                SHARD_SWAPS_TOTAL.with_label_values(&["rejected"]).inc();
                return Err(SearchError::AliasUnavailable(
                    "searcher has been stopped".to_string(),
                ));
            };
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let alias = Arc::new(alias.with_generation(generation));
            *live = Some(Arc::clone(&alias));
            (previous, alias)
        };

        self.tracker.reset(alias.shard_ids());
        SHARDS_ACTIVE.set(alias.len() as i64);
        info!(
            alias = ALIAS_NAME,
            previous_generation = previous.generation(),
            generation = alias.generation(),
            previous_shards = previous.len(),
            shards = alias.len(),
            documents = alias.num_docs(),
            "Swapped shard set"
        );
        drop(previous);

        let cache = Arc::clone(&self.cache);
        let grace = self.config.cache_clear_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            cache.clear().await;
            debug!("Cleared result cache after shard swap");
        });

        let self_test = SearchRequest::match_all().with_limit(1).with_cache(false);
        let plan = ExecutionPlan {
            offset: 0,
            size: 1,
            facet_fields: Vec::new(),
            facet_size: self.config.default_facet_size,
            highlight: false,
            stats: false,
            fields: Vec::new(),
            timeout: self.config.search_timeout(),
            warning: None,
        };
        match self.execute(&self_test, &plan, Some(Arc::clone(&alias))).await {
            Ok((result, _)) => {
                SHARD_SWAPS_TOTAL.with_label_values(&["success"]).inc();
                debug!(total_hits = result.total_hits, "Post-swap self-test passed");
                Ok(())
            }
            Err(e) => {
                SHARD_SWAPS_TOTAL.with_label_values(&["self_test_failed"]).inc();
                warn!(error = %e, "Post-swap self-test failed");
                Err(SearchError::SelfTestFailed(e.to_string()))
            }
        }
    }

    /// Drop every cached result
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
        info!("Result cache cleared");
    }

    pub fn stats(&self) -> SearcherStats {
        let mut stats = SearcherStats {
            running: self.is_running(),
            shard_count: self.shard_count(),
            generation: self.generation(),
            shards: self.tracker.snapshot(),
            cache: self.cache.stats(),
            ..Default::default()
        };
        self.counters.fill(&mut stats);
        stats
    }

    /// Stop serving searches. Idempotent.
    ///
    /// Waiting searches fail with [`SearchError::NotRunning`]. Shards are
    /// released, never closed.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.permits.close();
        self.alias.write().take();
        self.tracker.clear();
        self.cache.clear().await;
        SHARDS_ACTIVE.set(0);
        info!("Distributed searcher stopped");
    }

    /// Effective deadline budget: the engine timeout unless the request
    /// asks for less
    pub(crate) fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        let engine = self.config.search_timeout();
        requested.map(|t| t.min(engine)).unwrap_or(engine)
    }

    fn plan(&self, request: &SearchRequest) -> Result<ExecutionPlan> {
        let window = self.config.max_result_window;
        if request.offset >= window {
            return Err(SearchError::InvalidRequest(format!(
                "offset {} is outside the result window of {}",
                request.offset, window
            )));
        }

        // `limit` can widen the page beyond the default but never shrink it
        let size = request
            .limit
            .max(self.config.default_page_size)
            .min(window - request.offset);

        let depth = request.offset + size;
        let warning = (depth > self.config.deep_pagination_threshold).then(|| {
            format!(
                "deep pagination: offset + size = {} exceeds {}; prefer narrower filters",
                depth, self.config.deep_pagination_threshold
            )
        });

        let facet_fields = if request.include_facets && self.config.enable_facets {
            request.facet_fields.clone()
        } else {
            Vec::new()
        };

        Ok(ExecutionPlan {
            offset: request.offset,
            size,
            facet_fields,
            facet_size: request.facet_size.unwrap_or(self.config.default_facet_size),
            highlight: request.highlight && self.config.enable_highlighting,
            stats: request.include_stats,
            fields: request.fields.clone(),
            timeout: self.effective_timeout(request.timeout),
            warning,
        })
    }

    /// Run one admitted search, on `pinned` when given and otherwise on the
    /// alias that is live once a permit is held. Returns the generation the
    /// result was computed on.
    async fn execute(
        &self,
        request: &SearchRequest,
        plan: &ExecutionPlan,
        pinned: Option<Arc<ShardAlias>>,
    ) -> Result<(SearchResult, u64)> {
        let started = Instant::now();
        let deadline = started + plan.timeout;

        let query = self.query_builder.build(request)?;
        let sort = self.sort_spec(request)?;

        let _permit = {
            let _queued = InFlight::queued(&self.counters);
            match tokio::time::timeout_at(deadline, self.permits.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(SearchError::NotRunning),
                Err(_) => {
                    return Err(SearchError::Timeout(format!(
                        "no search slot became free within {}ms",
                        plan.timeout.as_millis()
                    )))
                }
            }
        };
        let _active = InFlight::active(&self.counters);

        let alias = match pinned {
            Some(alias) => alias,
            None => self.alias.read().clone().ok_or_else(|| {
                SearchError::AliasUnavailable("searcher has been stopped".to_string())
            })?,
        };

        let response = alias
            .search(
                AliasRequest {
                    query,
                    from: plan.offset,
                    size: plan.size,
                    sort,
                    facet_fields: plan.facet_fields.clone(),
                    facet_size: plan.facet_size,
                    highlight: plan.highlight,
                    stats: plan.stats,
                    fields: plan.fields.clone(),
                },
                deadline,
                &self.tracker,
            )
            .await?;

        let result = SearchResult {
            hits: response.hits,
            total_hits: response.total_hits,
            max_score: response.max_score,
            facets: response.facets,
            stats: response.stats,
            from_cache: false,
            warning: plan.warning.clone(),
            took_ms: started.elapsed().as_millis() as u64,
        };
        Ok((result, alias.generation()))
    }

    fn sort_spec(&self, request: &SearchRequest) -> Result<SortSpec> {
        let name = request.sort_field();
        if name == SCORE_SORT {
            return Ok(SortSpec::Score);
        }
        let kind = self
            .schema()
            .kind(name)
            .filter(|kind| kind.is_sortable())
            .ok_or_else(|| SearchError::InvalidRequest(format!("cannot sort by `{}`", name)))?;
        Ok(SortSpec::Field {
            name: name.to_string(),
            kind,
            order: request.sort_order,
        })
    }

    fn record(&self, started: Instant, outcome: &Result<SearchResult>) {
        let elapsed = started.elapsed();
        let status = match outcome {
            Ok(result) if result.from_cache => "cache_hit",
            Ok(_) => "success",
            Err(SearchError::Timeout(_)) => "timeout",
            Err(_) => "error",
        };
        SEARCHES_TOTAL.with_label_values(&[status]).inc();
        SEARCH_DURATION_SECONDS
            .with_label_values(&[status])
            .observe(elapsed.as_secs_f64());
        self.counters.record(elapsed, outcome.is_ok());

        match outcome {
            Ok(result) => debug!(
                total_hits = result.total_hits,
                hits = result.hits.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Search completed"
            ),
            Err(e @ (SearchError::InvalidRequest(_) | SearchError::QueryParsingFailed(_))) => {
                warn!(error = %e, code = e.error_code(), "Rejected search")
            }
            Err(e) => error!(
                error = %e,
                code = e.error_code(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Search failed"
            ),
        }
    }
}

/// Keeps the queued/active counters honest even when a search future is
/// dropped mid-flight
struct InFlight<'a> {
    counters: &'a SearchCounters,
    queued: bool,
}

impl<'a> InFlight<'a> {
    fn queued(counters: &'a SearchCounters) -> Self {
        counters.inc_queued();
        SEARCHES_QUEUED.inc();
        Self {
            counters,
            queued: true,
        }
    }

    fn active(counters: &'a SearchCounters) -> Self {
        counters.inc_active();
        SEARCHES_ACTIVE.inc();
        Self {
            counters,
            queued: false,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.queued {
            self.counters.dec_queued();
            SEARCHES_QUEUED.dec();
        } else {
            self.counters.dec_active();
            SEARCHES_ACTIVE.dec();
        }
    }
}
