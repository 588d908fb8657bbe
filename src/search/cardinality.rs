//! Distinct-value counting across all shards
//!
//! A single large facet pass answers most requests exactly. When the pass
//! comes back at the high-water mark (or fails) the counter pages through the
//! matching documents instead, reading only the target field, until it has
//! seen everything or holds `safety_ceiling` values.
//!
//! Every pass of one count runs on the same shard generation, so a shard
//! swap in the middle of a walk cannot mix pages from two shard sets.

use crate::config::CardinalityConfig;
use crate::error::{Result, SearchError};
use crate::metrics::CARDINALITY_RUNS_TOTAL;
use crate::search::alias::ShardAlias;
use crate::search::request::CardinalityRequest;
use crate::search::searcher::{DistributedSearcher, ExecutionPlan};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use strum_macros::{Display, EnumString};
use tracing::{debug, info, warn};
use validator::Validate;

/// Strategy that produced a cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CardinalityMethod {
    /// Single large facet pass
    Facet,
    /// Walked the matching documents page by page
    Pagination,
    /// The count failed; see `error`
    Error,
}

/// Number of distinct values of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardinalityResult {
    pub field: String,
    pub cardinality: u64,
    /// Documents matching the filters
    pub total_docs: u64,
    pub method: CardinalityMethod,
    /// The count is a lower bound
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub took_ms: u64,
}

impl CardinalityResult {
    fn failed(field: &str, error: &SearchError) -> Self {
        Self {
            field: field.to_string(),
            cardinality: 0,
            total_docs: 0,
            method: CardinalityMethod::Error,
            degraded: false,
            error: Some(error.to_string()),
            took_ms: 0,
        }
    }
}

/// Counts unique values without an unbounded facet
pub struct CardinalityCounter {
    searcher: Arc<DistributedSearcher>,
    config: CardinalityConfig,
}

impl CardinalityCounter {
    pub fn new(searcher: Arc<DistributedSearcher>) -> Self {
        let config = searcher.config().cardinality.clone();
        Self { searcher, config }
    }

    pub fn with_config(searcher: Arc<DistributedSearcher>, config: CardinalityConfig) -> Self {
        Self { searcher, config }
    }

    /// Exact count of distinct values of `request.field`
    pub async fn count(&self, request: &CardinalityRequest) -> Result<CardinalityResult> {
        let started = Instant::now();
        let field = request.field.trim();
        if field.is_empty() {
            return Err(SearchError::InvalidRequest(
                "cardinality needs a field name".to_string(),
            ));
        }
        request.validate()?;
        if !self.searcher.schema().is_facetable(field) {
            return Err(SearchError::InvalidRequest(format!(
                "field `{}` cannot be counted",
                field
            )));
        }

        let alias = self.searcher.snapshot()?;
        let mut result = match self.facet_pass(request, field, &alias).await {
            Ok(Some(result)) => result,
            Ok(None) => self.pagination_pass(request, field, &alias).await?,
            Err(e) => {
                warn!(field, error = %e, "Facet pass failed, paging through documents");
                self.pagination_pass(request, field, &alias).await?
            }
        };
        result.took_ms = started.elapsed().as_millis() as u64;

        let method = result.method.to_string();
        let degraded = if result.degraded { "true" } else { "false" };
        CARDINALITY_RUNS_TOTAL
            .with_label_values(&[method.as_str(), degraded])
            .inc();
        info!(
            field,
            cardinality = result.cardinality,
            total_docs = result.total_docs,
            method = %result.method,
            degraded = result.degraded,
            took_ms = result.took_ms,
            "Counted distinct values"
        );
        Ok(result)
    }

    /// Approximate count
    ///
    /// No sketch is maintained yet, so this answers with the exact count.
    pub async fn estimate(&self, request: &CardinalityRequest) -> Result<CardinalityResult> {
        debug!(field = %request.field, "No estimator available, counting exactly");
        self.count(request).await
    }

    /// Count several fields concurrently with the same filters
    ///
    /// Per-field failures are reported in that field's `error`.
    pub async fn batch_count(
        &self,
        fields: &[String],
        base: &CardinalityRequest,
    ) -> HashMap<String, CardinalityResult> {
        let counts = fields.iter().map(|field| async move {
            let request = base.for_field(field.clone());
            let result = match self.count(&request).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(field = %field, error = %e, "Cardinality failed");
                    CARDINALITY_RUNS_TOTAL
                        .with_label_values(&["error", "false"])
                        .inc();
                    CardinalityResult::failed(field, &e)
                }
            };
            (field.clone(), result)
        });

        futures::future::join_all(counts).await.into_iter().collect()
    }

    /// `None` when the facet came back at the high-water mark
    async fn facet_pass(
        &self,
        request: &CardinalityRequest,
        field: &str,
        alias: &Arc<ShardAlias>,
    ) -> Result<Option<CardinalityResult>> {
        let search_request = request.to_search_request();
        let plan = ExecutionPlan {
            offset: 0,
            size: 0,
            facet_fields: vec![field.to_string()],
            facet_size: self.config.large_facet_size,
            highlight: false,
            stats: false,
            fields: Vec::new(),
            timeout: self.searcher.effective_timeout(request.timeout),
            warning: None,
        };

        let result = self
            .searcher
            .search_with_plan(&search_request, &plan, alias)
            .await?;
        let terms: HashSet<&str> = result
            .facets
            .get(field)
            .map(|facet| facet.terms.iter().map(|t| t.term.as_str()).collect())
            .unwrap_or_default();

        if terms.len() >= self.config.high_water_mark {
            debug!(field, terms = terms.len(), "Facet pass hit the high-water mark");
            return Ok(None);
        }

        Ok(Some(CardinalityResult {
            field: field.to_string(),
            cardinality: terms.len() as u64,
            total_docs: result.total_hits,
            method: CardinalityMethod::Facet,
            degraded: false,
            error: None,
            took_ms: 0,
        }))
    }

    async fn pagination_pass(
        &self,
        request: &CardinalityRequest,
        field: &str,
        alias: &Arc<ShardAlias>,
    ) -> Result<CardinalityResult> {
        let search_request = request.to_search_request();
        let page_size = self.config.page_size;
        let mut plan = ExecutionPlan {
            offset: 0,
            size: page_size,
            facet_fields: Vec::new(),
            facet_size: 0,
            highlight: false,
            stats: false,
            fields: vec![field.to_string()],
            timeout: self.searcher.effective_timeout(request.timeout),
            warning: None,
        };

        let mut values: HashSet<String> = HashSet::new();
        let mut total_docs = 0;
        let mut exhausted = false;
        let mut degraded = false;

        for page in 0..self.config.max_pages {
            plan.offset = page * page_size;
            let result = self
                .searcher
                .search_with_plan(&search_request, &plan, alias)
                .await?;
            total_docs = result.total_hits;

            for hit in &result.hits {
                if let Some(value) = hit.field_str(field) {
                    values.insert(value.to_string());
                }
            }

            if values.len() >= self.config.safety_ceiling {
                warn!(
                    field,
                    unique_values = values.len(),
                    ceiling = self.config.safety_ceiling,
                    "Stopped counting at the safety ceiling; result is a lower bound"
                );
                degraded = true;
                break;
            }
            if result.hits.len() < page_size || (plan.offset + page_size) as u64 >= total_docs {
                exhausted = true;
                break;
            }
        }

        if !exhausted && !degraded {
            warn!(
                field,
                pages = self.config.max_pages,
                total_docs,
                "Ran out of pages before covering every document; result is a lower bound"
            );
            degraded = true;
        }

        Ok(CardinalityResult {
            field: field.to_string(),
            cardinality: values.len() as u64,
            total_docs,
            method: CardinalityMethod::Pagination,
            degraded,
            error: None,
            took_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::search::document::LogDocument;
    use crate::search::shard::{Shard, ShardWriter};
    use chrono::{TimeZone, Utc};

    fn shard(id: &str, ips: usize) -> Arc<Shard> {
        let mut writer = ShardWriter::in_ram(id).unwrap();
        for i in 0..ips * 2 {
            let ts = Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap();
            let ip = format!("10.0.{}.{}", ips, i % ips);
            let doc = LogDocument::new("/var/log/access.log", ip, "GET", "/", 200, ts)
                .with_id(format!("{}-{}", id, i));
            writer.add_document(&doc).unwrap();
        }
        Arc::new(writer.finish().unwrap())
    }

    #[test]
    fn test_method_labels() {
        assert_eq!(CardinalityMethod::Facet.to_string(), "facet");
        assert_eq!(CardinalityMethod::Pagination.to_string(), "pagination");
        assert_eq!(
            serde_json::to_string(&CardinalityMethod::Error).unwrap(),
            "\"error\""
        );
    }

    #[tokio::test]
    async fn test_pagination_stays_on_one_shard_generation() {
        let searcher = Arc::new(
            DistributedSearcher::new(vec![shard("old", 12)], EngineConfig::default()).unwrap(),
        );
        let counter = CardinalityCounter::with_config(
            Arc::clone(&searcher),
            CardinalityConfig {
                page_size: 5,
                ..Default::default()
            },
        );

        let pinned = searcher.snapshot().unwrap();
        searcher.swap_shards(vec![shard("new", 3)]).await.unwrap();

        let result = counter
            .pagination_pass(&CardinalityRequest::new("ip"), "ip", &pinned)
            .await
            .unwrap();
        assert_eq!(result.method, CardinalityMethod::Pagination);
        assert_eq!(result.cardinality, 12);
        assert_eq!(result.total_docs, 24);
        assert!(!result.degraded);

        let live = counter.count(&CardinalityRequest::new("ip")).await.unwrap();
        assert_eq!(live.cardinality, 3);
        assert_eq!(live.total_docs, 6);
    }

    #[test]
    fn test_failed_result() {
        let result = CardinalityResult::failed("ip", &SearchError::NoHealthyShards);
        assert_eq!(result.method, CardinalityMethod::Error);
        assert_eq!(result.cardinality, 0);
        assert!(result.error.unwrap().contains("No healthy shards"));
    }
}
