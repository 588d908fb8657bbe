//! Distributed full-text search over access-log shards powered by Tantivy
//!
//! This module provides the search engine consumed by dashboards and
//! analytics, including:
//!
//! - **Distributed Search**: one globally scored query across every shard
//! - **Filters**: time range, paths, IPs, methods, status codes, clients, numeric ranges
//! - **Exact Facets**: per-shard term maps merged without double counting
//! - **Cardinality**: unique-value counts with a bounded pagination fallback
//! - **Result Cache**: cost-aware, per-entry TTL
//! - **Hot Swap**: replace the shard set without downtime
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │           DistributedSearcher                    │
//! ├─────────────────────────────────────────────────┤
//! │  - search()         - search_async()            │
//! │  - swap_shards()    - stats()   - stop()        │
//! │  admission semaphore · ResultCache              │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │           ShardAlias                             │
//! ├─────────────────────────────────────────────────┤
//! │  - Global BM25 statistics                        │
//! │  - Query phase: counts, top-k keys, facets       │
//! │  - Global merge, then fetch phase                │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │       Shards (Tantivy indexes)                   │
//! ├─────────────────────────────────────────────────┤
//! │  - Inverted Index (message, path)               │
//! │  - Fast Fields (status, country, timestamp...)  │
//! │  - Doc Store (stored log fields)                │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use accesslog_search::config::EngineConfig;
//! use accesslog_search::search::{DistributedSearcher, SearchRequest, Shard};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let shards = vec![
//!         Arc::new(Shard::open_in_dir("2024-01", "/var/lib/logs/2024-01")?),
//!         Arc::new(Shard::open_in_dir("2024-02", "/var/lib/logs/2024-02")?),
//!     ];
//!     let searcher = DistributedSearcher::new(shards, EngineConfig::default())?;
//!
//!     let request = SearchRequest::new("timeout")
//!         .with_status_codes(vec![502, 504])
//!         .with_facets(vec!["country"], Some(5))
//!         .with_limit(20);
//!
//!     let result = searcher.search(&request).await?;
//!     println!("Found {} matching requests", result.total_hits);
//!
//!     Ok(())
//! }
//! ```

mod alias;
mod cache;
mod cardinality;
mod collectors;
mod document;
mod facet;
mod query;
mod request;
mod result;
mod searcher;
mod shard;
mod stats;

pub use alias::ShardAlias;
pub use cache::{cache_key, entry_cost, CacheStats, ResultCache};
pub use cardinality::{CardinalityCounter, CardinalityMethod, CardinalityResult};
pub use collectors::{StatsCollector, TermCountCollector};
pub use document::{build_log_schema, FieldKind, LogDocument, LogSchema, SearchDocument};
pub use facet::{FacetMerger, FieldCounts};
pub use query::QueryBuilder;
pub use request::{CardinalityRequest, SearchRequest, SortOrder, SCORE_SORT};
pub use result::{Facet, NumericStats, ResultStats, SearchHit, SearchResult, TermCount};
pub use searcher::{DistributedSearcher, ALIAS_NAME};
pub use shard::{Shard, ShardInfo, ShardWriter};
pub use stats::{SearcherStats, ShardStats, ShardTracker};

/// Field names of the access-log schema
pub mod fields {
    pub use super::document::{
        BROWSER, BYTES_SENT, COUNTRY, DEVICE, ID, IP, LOG_PATH, MESSAGE, METHOD, OS, PATH,
        PATH_EXACT, REFERER, REQUEST_TIME, STATUS, TIMESTAMP, USER_AGENT,
    };
}
