//! Distributed execution over a set of shards
//!
//! A search runs in two phases. The query phase sends the query to every
//! shard in parallel; each shard counts its matches, returns its best
//! `from + size` documents with their sort keys, and optionally complete term
//! counts and numeric stats. BM25 statistics are summed over all shards first,
//! so scores from different shards are comparable. The alias merges the sort
//! keys into one global ranking and keeps the requested page. The fetch phase
//! then loads stored fields (and snippets) from the shards holding those
//! documents.
//!
//! Both phases use the same point-in-time searchers, so a search sees one
//! consistent view of every shard.

use crate::error::{Result, SearchError};
use crate::metrics::{SHARD_ERRORS_TOTAL, SHARD_SEARCH_DURATION_SECONDS};
use crate::search::collectors::{StatsCollector, TermCountCollector};
use crate::search::document::{FieldKind, LogSchema};
use crate::search::facet::{FacetMerger, FieldCounts};
use crate::search::request::SortOrder;
use crate::search::result::{Facet, ResultStats, SearchHit};
use crate::search::shard::Shard;
use crate::search::stats::ShardTracker;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{Bm25StatisticsProvider, Query};
use tantivy::schema::{Field, Value};
use tantivy::snippet::SnippetGenerator;
use tantivy::{DocAddress, Order, Searcher, TantivyDocument, TantivyError, Term};
use tokio::time::Instant;
use tracing::debug;

/// How hits are ranked
#[derive(Debug, Clone)]
pub(crate) enum SortSpec {
    Score,
    Field {
        name: String,
        kind: FieldKind,
        order: SortOrder,
    },
}

/// One distributed query, already translated for tantivy
#[derive(Debug)]
pub(crate) struct AliasRequest {
    pub query: Box<dyn Query>,
    pub from: usize,
    /// Zero skips ranking and fetching entirely
    pub size: usize,
    pub sort: SortSpec,
    pub facet_fields: Vec<String>,
    pub facet_size: usize,
    pub highlight: bool,
    pub stats: bool,
    /// Stored fields to return (empty = all)
    pub fields: Vec<String>,
}

/// Merged outcome of a distributed query
#[derive(Debug, Default)]
pub(crate) struct AliasResponse {
    pub hits: Vec<SearchHit>,
    pub total_hits: u64,
    pub max_score: f32,
    pub facets: BTreeMap<String, Facet>,
    pub stats: Option<ResultStats>,
}

/// BM25 statistics summed over every shard of the alias
struct GlobalStatistics {
    searchers: Vec<Searcher>,
}

impl Bm25StatisticsProvider for GlobalStatistics {
    fn total_num_tokens(&self, field: Field) -> tantivy::Result<u64> {
        let mut total = 0;
        for searcher in &self.searchers {
            total += searcher.total_num_tokens(field)?;
        }
        Ok(total)
    }

    fn total_num_docs(&self) -> tantivy::Result<u64> {
        let mut total = 0;
        for searcher in &self.searchers {
            total += searcher.total_num_docs()?;
        }
        Ok(total)
    }

    fn doc_freq(&self, term: &Term) -> tantivy::Result<u64> {
        let mut total = 0;
        for searcher in &self.searchers {
            total += searcher.doc_freq(term)?;
        }
        Ok(total)
    }
}

/// A document's position in the global ranking
#[derive(Debug, Clone, Copy)]
struct RankedDoc {
    key: f64,
    score: f32,
    shard: usize,
    address: DocAddress,
}

/// Query-phase output of one shard
#[derive(Default)]
struct ShardQueryResult {
    total_hits: u64,
    top: Vec<RankedDoc>,
    facets: HashMap<String, FieldCounts>,
    stats: Option<ResultStats>,
}

/// Immutable view over a set of shards with a common schema
///
/// Each alias installed by a searcher carries a generation number that
/// grows with every swap; results are only comparable within one
/// generation.
pub struct ShardAlias {
    name: String,
    generation: u64,
    shards: Vec<Arc<Shard>>,
    schema: LogSchema,
    shard_timeout: Duration,
}

impl ShardAlias {
    /// Build an alias, rejecting shards with a foreign schema or a
    /// duplicate ID
    pub fn new(
        name: impl Into<String>,
        shards: Vec<Arc<Shard>>,
        schema: LogSchema,
        shard_timeout: Duration,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for shard in &shards {
            if !seen.insert(shard.id().to_string()) {
                return Err(SearchError::InvalidConfiguration(format!(
                    "duplicate shard id `{}`",
                    shard.id()
                )));
            }
            if let Err(SearchError::SchemaMismatch(reason)) = schema.check_compatible(&shard.schema())
            {
                return Err(SearchError::SchemaMismatch(format!(
                    "shard `{}`: {}",
                    shard.id(),
                    reason
                )));
            }
        }

        Ok(Self {
            name: name.into(),
            generation: 0,
            shards,
            schema,
            shard_timeout,
        })
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn shards(&self) -> &[Arc<Shard>] {
        &self.shards
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = &str> {
        self.shards.iter().map(|s| s.id())
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Total live documents across shards
    pub fn num_docs(&self) -> u64 {
        self.shards.iter().map(|s| s.num_docs()).sum()
    }

    /// Run a globally scored query across all shards
    ///
    /// Any shard failure fails the whole search. The fan-out stops waiting
    /// at `deadline`; work already handed to the blocking pool is left to
    /// finish on its own.
    pub(crate) async fn search(
        &self,
        request: AliasRequest,
        deadline: Instant,
        tracker: &ShardTracker,
    ) -> Result<AliasResponse> {
        if self.shards.is_empty() {
            return Err(SearchError::NoHealthyShards);
        }

        let searchers: Vec<Searcher> = self.shards.iter().map(|s| s.searcher()).collect();
        let statistics = Arc::new(GlobalStatistics {
            searchers: searchers.clone(),
        });
        let request = Arc::new(request);

        let execution = self.execute(&searchers, statistics, request, tracker);
        match tokio::time::timeout_at(deadline, execution).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout(format!(
                "distributed search on alias `{}` exceeded its deadline",
                self.name
            ))),
        }
    }

    async fn execute(
        &self,
        searchers: &[Searcher],
        statistics: Arc<GlobalStatistics>,
        request: Arc<AliasRequest>,
        tracker: &ShardTracker,
    ) -> Result<AliasResponse> {
        // Query phase
        let query_tasks = self.shards.iter().zip(searchers).enumerate().map(
            |(ordinal, (shard, searcher))| {
                let searcher = searcher.clone();
                let statistics = Arc::clone(&statistics);
                let request = Arc::clone(&request);
                self.run_on_shard(shard.id(), tracker, move || {
                    query_shard(ordinal, &searcher, statistics.as_ref(), &request)
                })
            },
        );
        let shard_results = futures::future::join_all(query_tasks)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        let mut response = AliasResponse::default();
        let mut ranked = Vec::new();
        let mut facet_counts: HashMap<String, FieldCounts> = HashMap::new();
        let mut stats: Option<ResultStats> = None;

        for result in shard_results {
            response.total_hits += result.total_hits;
            ranked.extend(result.top);
            for (field, counts) in result.facets {
                facet_counts.entry(field).or_default().merge(counts);
            }
            if let Some(shard_stats) = result.stats {
                stats.get_or_insert_with(ResultStats::default).merge(&shard_stats);
            }
        }

        let merger = FacetMerger::new(request.facet_size);
        for field in &request.facet_fields {
            let counts = facet_counts.remove(field).unwrap_or_default();
            response
                .facets
                .insert(field.clone(), merger.from_counts(field, counts));
        }
        response.stats = stats;

        sort_ranked(&mut ranked, &request.sort);
        if matches!(request.sort, SortSpec::Score) {
            response.max_score = ranked.first().map(|doc| doc.score).unwrap_or(0.0);
        }

        let page: Vec<RankedDoc> = ranked
            .into_iter()
            .skip(request.from)
            .take(request.size)
            .collect();
        if page.is_empty() {
            return Ok(response);
        }

        // Fetch phase, one task per shard that owns a hit on the page
        let mut by_shard: BTreeMap<usize, Vec<(usize, RankedDoc)>> = BTreeMap::new();
        for (position, doc) in page.iter().enumerate() {
            by_shard.entry(doc.shard).or_default().push((position, *doc));
        }

        let fetch_tasks = by_shard.into_iter().map(|(ordinal, docs)| {
            let shard = &self.shards[ordinal];
            let searcher = searchers[ordinal].clone();
            let schema = self.schema.clone();
            let request = Arc::clone(&request);
            let shard_id = shard.id().to_string();
            self.run_on_shard(shard.id(), tracker, move || {
                fetch_hits(&shard_id, &searcher, &schema, &request, docs)
            })
        });
        let fetched = futures::future::join_all(fetch_tasks)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        let mut slots: Vec<Option<SearchHit>> = vec![None; page.len()];
        for (position, hit) in fetched.into_iter().flatten() {
            slots[position] = Some(hit);
        }
        response.hits = slots.into_iter().flatten().collect();

        Ok(response)
    }

    /// Run blocking shard work on the blocking pool under the shard timeout
    async fn run_on_shard<T, F>(&self, shard_id: &str, tracker: &ShardTracker, work: F) -> Result<T>
    where
        F: FnOnce() -> tantivy::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let started = Instant::now();
        let outcome =
            match tokio::time::timeout(self.shard_timeout, tokio::task::spawn_blocking(work)).await
            {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(e))) => Err(e.to_string()),
                Ok(Err(e)) => Err(format!("shard task failed: {}", e)),
                Err(_) => Err(format!(
                    "no response within {}ms",
                    self.shard_timeout.as_millis()
                )),
            };

        let elapsed = started.elapsed();
        tracker.record(shard_id, elapsed, outcome.is_ok());
        SHARD_SEARCH_DURATION_SECONDS
            .with_label_values(&[shard_id])
            .observe(elapsed.as_secs_f64());
        debug!(
            alias = %self.name,
            shard = shard_id,
            elapsed_ms = elapsed.as_millis() as u64,
            ok = outcome.is_ok(),
            "Shard task finished"
        );

        outcome.map_err(|message| {
            SHARD_ERRORS_TOTAL.with_label_values(&[shard_id]).inc();
            SearchError::ShardFailed {
                shard_id: shard_id.to_string(),
                message,
            }
        })
    }
}

impl std::fmt::Debug for ShardAlias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardAlias")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("shards", &self.shards)
            .finish()
    }
}

fn query_shard(
    ordinal: usize,
    searcher: &Searcher,
    statistics: &GlobalStatistics,
    request: &AliasRequest,
) -> tantivy::Result<ShardQueryResult> {
    let query = request.query.as_ref();
    let mut result = ShardQueryResult {
        total_hits: searcher.search(query, &Count)? as u64,
        ..Default::default()
    };

    let limit = request.from + request.size;
    if request.size > 0 && result.total_hits > 0 {
        result.top = match &request.sort {
            SortSpec::Score => searcher
                .search_with_statistics_provider(query, &TopDocs::with_limit(limit), statistics)?
                .into_iter()
                .map(|(score, address)| RankedDoc {
                    key: score as f64,
                    score,
                    shard: ordinal,
                    address,
                })
                .collect(),
            SortSpec::Field { name, kind, order } => {
                let order = match order {
                    SortOrder::Asc => Order::Asc,
                    SortOrder::Desc => Order::Desc,
                };
                let top_docs = TopDocs::with_limit(limit);
                let keyed: Vec<(f64, DocAddress)> = match kind {
                    FieldKind::I64 => searcher
                        .search(query, &top_docs.order_by_fast_field::<i64>(name, order))?
                        .into_iter()
                        .map(|(value, address)| (value as f64, address))
                        .collect(),
                    FieldKind::U64 => searcher
                        .search(query, &top_docs.order_by_fast_field::<u64>(name, order))?
                        .into_iter()
                        .map(|(value, address)| (value as f64, address))
                        .collect(),
                    FieldKind::F64 => searcher
                        .search(query, &top_docs.order_by_fast_field::<f64>(name, order))?,
                    FieldKind::Text | FieldKind::Exact => {
                        return Err(TantivyError::InvalidArgument(format!(
                            "field `{}` is not sortable",
                            name
                        )))
                    }
                };
                keyed
                    .into_iter()
                    .map(|(key, address)| RankedDoc {
                        key,
                        score: 0.0,
                        shard: ordinal,
                        address,
                    })
                    .collect()
            }
        };
    }

    if !request.facet_fields.is_empty() {
        let collector = TermCountCollector::new(request.facet_fields.clone());
        result.facets = searcher.search(query, &collector)?;
    }
    if request.stats {
        result.stats = Some(searcher.search(query, &StatsCollector)?);
    }

    Ok(result)
}

/// Global order: sort key, then shard, then address, so pages are stable
fn sort_ranked(ranked: &mut [RankedDoc], sort: &SortSpec) {
    let ascending = matches!(
        sort,
        SortSpec::Field {
            order: SortOrder::Asc,
            ..
        }
    );
    ranked.sort_by(|a, b| {
        let by_key = if ascending {
            a.key.total_cmp(&b.key)
        } else {
            b.key.total_cmp(&a.key)
        };
        by_key
            .then_with(|| a.shard.cmp(&b.shard))
            .then_with(|| a.address.segment_ord.cmp(&b.address.segment_ord))
            .then_with(|| a.address.doc_id.cmp(&b.address.doc_id))
    });
}

fn fetch_hits(
    shard_id: &str,
    searcher: &Searcher,
    schema: &LogSchema,
    request: &AliasRequest,
    docs: Vec<(usize, RankedDoc)>,
) -> tantivy::Result<Vec<(usize, SearchHit)>> {
    let mut generators = Vec::new();
    if request.highlight {
        for field in schema.text_fields() {
            let name = schema.schema().get_field_name(field).to_string();
            generators.push((name, SnippetGenerator::create(searcher, request.query.as_ref(), field)?));
        }
    }

    let mut hits = Vec::with_capacity(docs.len());
    for (position, ranked) in docs {
        let doc: TantivyDocument = searcher.doc(ranked.address)?;

        let id = doc
            .get_first(schema.id)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let mut highlights = BTreeMap::new();
        for (name, generator) in &generators {
            let snippet = generator.snippet_from_doc(&doc);
            if !snippet.is_empty() {
                highlights.insert(name.clone(), vec![snippet.to_html()]);
            }
        }

        hits.push((
            position,
            SearchHit {
                id,
                score: ranked.score,
                fields: schema.to_json_fields(&doc, &request.fields),
                highlights,
                shard_id: shard_id.to_string(),
            },
        ));
    }
    Ok(hits)
}
