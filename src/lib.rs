//! Shard-aware distributed search engine for web-server access logs.
//!
//! See [`search`] for the engine itself.

pub mod config;
pub mod error;
pub mod metrics;
pub mod search;

pub use config::{CardinalityConfig, EngineConfig, EngineConfigBuilder, ObservabilityConfig};
pub use error::{Result, SearchError};
pub use search::{
    CardinalityCounter, CardinalityRequest, CardinalityResult, DistributedSearcher,
    SearchRequest, SearchResult, Shard, ShardWriter,
};
