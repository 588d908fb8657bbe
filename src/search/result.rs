//! Search result types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single search result hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Document ID
    pub id: String,

    /// BM25 score under global statistics; 0 when sorted by a field
    pub score: f32,

    /// Requested stored fields
    pub fields: BTreeMap<String, serde_json::Value>,

    /// HTML snippets per text field (if highlighting enabled)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub highlights: BTreeMap<String, Vec<String>>,

    /// Shard the document was read from
    pub shard_id: String,
}

impl SearchHit {
    /// String value of a returned field
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }
}

/// One term and its document count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCount {
    pub term: String,
    pub count: u64,
}

impl TermCount {
    pub fn new(term: impl Into<String>, count: u64) -> Self {
        Self {
            term: term.into(),
            count,
        }
    }
}

/// Distinct-term histogram over one field of the matched set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    pub field: String,

    /// Number of distinct terms observed, including those folded into `other`
    pub total: u64,

    /// Matched documents without a value
    pub missing: u64,

    /// Summed counts of terms cut by the size cap
    pub other: u64,

    /// Sorted by count desc, then term asc
    pub terms: Vec<TermCount>,
}

impl Facet {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..Default::default()
        }
    }

    /// Count for a term, if it survived truncation
    pub fn count_of(&self, term: &str) -> Option<u64> {
        self.terms.iter().find(|t| t.term == term).map(|t| t.count)
    }
}

/// count/sum/min/max/avg over one numeric field
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl NumericStats {
    pub fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.avg = self.sum / self.count as f64;
    }

    /// Combine with stats computed over a disjoint document set
    pub fn merge(&mut self, other: &NumericStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count += other.count;
        self.sum += other.sum;
        self.avg = self.sum / self.count as f64;
    }
}

/// Byte and latency aggregates over the matched set
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultStats {
    pub bytes_sent: NumericStats,
    /// Seconds
    pub request_time: NumericStats,
}

impl ResultStats {
    pub fn merge(&mut self, other: &ResultStats) {
        self.bytes_sent.merge(&other.bytes_sent);
        self.request_time.merge(&other.request_time);
    }
}

/// Search response with results and metadata
///
/// Treated as read-only once built; cached copies are handed out by value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Hits of the requested page, in sort order
    pub hits: Vec<SearchHit>,

    /// Total number of matches across all shards
    pub total_hits: u64,

    pub max_score: f32,

    /// Facets keyed by field
    pub facets: BTreeMap<String, Facet>,

    pub stats: Option<ResultStats>,

    /// Served from the result cache
    pub from_cache: bool,

    /// Non-fatal notice (deep pagination)
    pub warning: Option<String>,

    /// Execution time in milliseconds
    pub took_ms: u64,
}
