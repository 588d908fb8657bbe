use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Search engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of simultaneously executing distributed queries
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Engine-wide search timeout (milliseconds)
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,

    /// Per-shard execution timeout (milliseconds)
    #[serde(default = "default_shard_timeout_ms")]
    pub shard_timeout_ms: u64,

    /// Enable the result cache
    #[serde(default = "default_true")]
    pub enable_cache: bool,

    /// Result cache size (entries)
    #[serde(default = "default_cache_size")]
    pub cache_size: u64,

    /// Result cache TTL (seconds)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Cost units budgeted per cache entry; total budget is
    /// `cache_size * cost_per_entry_budget`
    #[serde(default = "default_cost_per_entry_budget")]
    pub cost_per_entry_budget: u64,

    /// Page size used when a request leaves `limit` at zero
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Hard upper bound on `offset + size`
    #[serde(default = "default_max_result_window")]
    pub max_result_window: usize,

    /// `offset + size` above which results carry a deep-pagination warning
    #[serde(default = "default_deep_pagination_threshold")]
    pub deep_pagination_threshold: usize,

    /// Enable highlighting
    #[serde(default = "default_true")]
    pub enable_highlighting: bool,

    /// Enable faceted search
    #[serde(default = "default_true")]
    pub enable_facets: bool,

    /// Facet size used when a request leaves it unset
    #[serde(default = "default_facet_size")]
    pub default_facet_size: usize,

    /// Largest facet size a request may ask for
    #[serde(default = "default_max_facet_size")]
    pub max_facet_size: usize,

    /// Delay before the cache is cleared after a shard swap (milliseconds)
    #[serde(default = "default_cache_clear_grace_ms")]
    pub cache_clear_grace_ms: u64,

    /// Cardinality counter configuration
    #[serde(default)]
    pub cardinality: CardinalityConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            search_timeout_ms: default_search_timeout_ms(),
            shard_timeout_ms: default_shard_timeout_ms(),
            enable_cache: true,
            cache_size: default_cache_size(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cost_per_entry_budget: default_cost_per_entry_budget(),
            default_page_size: default_page_size(),
            max_result_window: default_max_result_window(),
            deep_pagination_threshold: default_deep_pagination_threshold(),
            enable_highlighting: true,
            enable_facets: true,
            default_facet_size: default_facet_size(),
            max_facet_size: default_max_facet_size(),
            cache_clear_grace_ms: default_cache_clear_grace_ms(),
            cardinality: CardinalityConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the embedded defaults, an optional file and
    /// the environment
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ACCESSLOG_SEARCH_CONFIG")
            .unwrap_or_else(|_| "config/accesslog-search.toml".to_string());

        let config: EngineConfig = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name(&config_path).required(false))
            // ACCESSLOG_SEARCH__MAX_CONCURRENCY=20, ACCESSLOG_SEARCH__CARDINALITY__PAGE_SIZE=500
            .add_source(
                config::Environment::with_prefix("ACCESSLOG_SEARCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(SearchError::InvalidConfiguration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.default_page_size == 0 || self.max_result_window == 0 {
            return Err(SearchError::InvalidConfiguration(
                "page size and result window must be positive".to_string(),
            ));
        }
        if self.default_facet_size == 0 || self.default_facet_size > self.max_facet_size {
            return Err(SearchError::InvalidConfiguration(format!(
                "default_facet_size must be within 1..={}",
                self.max_facet_size
            )));
        }
        if self.enable_cache && (self.cache_size == 0 || self.cost_per_entry_budget == 0) {
            return Err(SearchError::InvalidConfiguration(
                "cache_size and cost_per_entry_budget must be positive when caching".to_string(),
            ));
        }
        self.cardinality.validate()
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn shard_timeout(&self) -> Duration {
        Duration::from_millis(self.shard_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_clear_grace(&self) -> Duration {
        Duration::from_millis(self.cache_clear_grace_ms)
    }
}

/// Cardinality counter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardinalityConfig {
    /// Facet size requested by the large-facet pass
    #[serde(default = "default_large_facet_size")]
    pub large_facet_size: usize,

    /// Term count at which the facet pass is treated as truncated
    #[serde(default = "default_large_facet_size")]
    pub high_water_mark: usize,

    /// Documents fetched per page by the pagination fallback
    #[serde(default = "default_cardinality_page_size")]
    pub page_size: usize,

    /// Maximum pages walked by the pagination fallback
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Unique values held before the fallback gives up
    #[serde(default = "default_safety_ceiling")]
    pub safety_ceiling: usize,
}

impl Default for CardinalityConfig {
    fn default() -> Self {
        Self {
            large_facet_size: default_large_facet_size(),
            high_water_mark: default_large_facet_size(),
            page_size: default_cardinality_page_size(),
            max_pages: default_max_pages(),
            safety_ceiling: default_safety_ceiling(),
        }
    }
}

impl CardinalityConfig {
    fn validate(&self) -> Result<()> {
        if self.large_facet_size == 0 || self.page_size == 0 || self.safety_ceiling == 0 {
            return Err(SearchError::InvalidConfiguration(
                "cardinality sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

/// Builder for EngineConfig
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max;
        self
    }

    pub fn search_timeout(mut self, timeout: Duration) -> Self {
        self.config.search_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn shard_timeout(mut self, timeout: Duration) -> Self {
        self.config.shard_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn enable_cache(mut self, enabled: bool) -> Self {
        self.config.enable_cache = enabled;
        self
    }

    pub fn cache_size(mut self, size: u64) -> Self {
        self.config.cache_size = size;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn default_page_size(mut self, size: usize) -> Self {
        self.config.default_page_size = size;
        self
    }

    pub fn max_result_window(mut self, window: usize) -> Self {
        self.config.max_result_window = window;
        self
    }

    pub fn enable_highlighting(mut self, enabled: bool) -> Self {
        self.config.enable_highlighting = enabled;
        self
    }

    pub fn enable_facets(mut self, enabled: bool) -> Self {
        self.config.enable_facets = enabled;
        self
    }

    pub fn default_facet_size(mut self, size: usize) -> Self {
        self.config.default_facet_size = size;
        self
    }

    pub fn cache_clear_grace(mut self, grace: Duration) -> Self {
        self.config.cache_clear_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn cardinality(mut self, cardinality: CardinalityConfig) -> Self {
        self.config.cardinality = cardinality;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// Default value functions
fn default_max_concurrency() -> usize {
    10
}

fn default_search_timeout_ms() -> u64 {
    30_000
}

fn default_shard_timeout_ms() -> u64 {
    10_000
}

fn default_cache_size() -> u64 {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cost_per_entry_budget() -> u64 {
    50
}

fn default_page_size() -> usize {
    50
}

fn default_max_result_window() -> usize {
    10_000
}

fn default_deep_pagination_threshold() -> usize {
    1_000
}

fn default_facet_size() -> usize {
    10
}

fn default_max_facet_size() -> usize {
    1000
}

fn default_cache_clear_grace_ms() -> u64 {
    100
}

fn default_large_facet_size() -> usize {
    50_000
}

fn default_cardinality_page_size() -> usize {
    10_000
}

fn default_max_pages() -> usize {
    100
}

fn default_safety_ceiling() -> usize {
    1_000_000
}

fn default_log_level() -> String {
    "accesslog_search=info".to_string()
}

fn default_true() -> bool {
    true
}
