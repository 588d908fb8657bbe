//! Custom tantivy collectors for facets and result statistics

use crate::search::document::{BYTES_SENT, REQUEST_TIME};
use crate::search::facet::FieldCounts;
use crate::search::result::ResultStats;
use std::collections::HashMap;
use tantivy::collector::{Collector, SegmentCollector};
use tantivy::columnar::{Column, StrColumn};
use tantivy::{DocId, Score, SegmentOrdinal, SegmentReader};

/// Counts every term of the given string fast fields over the matched set
///
/// Unlike a top-k collector, the fruit holds complete counts so that merging
/// across shards stays exact.
pub struct TermCountCollector {
    fields: Vec<String>,
}

impl TermCountCollector {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

/// Per-segment term ordinal counts for one field
pub struct FieldTally {
    field: String,
    column: Option<StrColumn>,
    ords: HashMap<u64, u64>,
    missing: u64,
}

pub struct TermCountSegmentCollector {
    tallies: Vec<FieldTally>,
}

impl Collector for TermCountCollector {
    type Fruit = HashMap<String, FieldCounts>;
    type Child = TermCountSegmentCollector;

    fn for_segment(
        &self,
        _segment_local_id: SegmentOrdinal,
        segment: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        let fast_fields = segment.fast_fields();
        let mut tallies = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            tallies.push(FieldTally {
                field: field.clone(),
                // None when no document of the segment has a value
                column: fast_fields.str(field)?,
                ords: HashMap::new(),
                missing: 0,
            });
        }
        Ok(TermCountSegmentCollector { tallies })
    }

    fn requires_scoring(&self) -> bool {
        false
    }

    fn merge_fruits(&self, segment_fruits: Vec<Vec<FieldTally>>) -> tantivy::Result<Self::Fruit> {
        let mut merged: HashMap<String, FieldCounts> = self
            .fields
            .iter()
            .map(|field| (field.clone(), FieldCounts::default()))
            .collect();

        // Ordinals are segment-local; resolve them before merging
        let mut term = String::new();
        for tallies in segment_fruits {
            for tally in tallies {
                let counts = merged.entry(tally.field).or_default();
                counts.missing += tally.missing;
                let Some(column) = tally.column else {
                    continue;
                };
                for (ord, count) in tally.ords {
                    term.clear();
                    if column.ord_to_str(ord, &mut term)? {
                        counts.add(&term, count);
                    }
                }
            }
        }
        Ok(merged)
    }
}

impl SegmentCollector for TermCountSegmentCollector {
    type Fruit = Vec<FieldTally>;

    fn collect(&mut self, doc: DocId, _score: Score) {
        for tally in &mut self.tallies {
            let Some(column) = &tally.column else {
                tally.missing += 1;
                continue;
            };
            let mut seen = false;
            for ord in column.term_ords(doc) {
                *tally.ords.entry(ord).or_insert(0) += 1;
                seen = true;
            }
            if !seen {
                tally.missing += 1;
            }
        }
    }

    fn harvest(self) -> Self::Fruit {
        self.tallies
    }
}

/// Aggregates `bytes_sent` and `request_time` over the matched set
pub struct StatsCollector;

pub struct StatsSegmentCollector {
    bytes_sent: Column<u64>,
    request_time: Column<f64>,
    stats: ResultStats,
}

impl Collector for StatsCollector {
    type Fruit = ResultStats;
    type Child = StatsSegmentCollector;

    fn for_segment(
        &self,
        _segment_local_id: SegmentOrdinal,
        segment: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        let fast_fields = segment.fast_fields();
        Ok(StatsSegmentCollector {
            bytes_sent: fast_fields.u64(BYTES_SENT)?,
            request_time: fast_fields.f64(REQUEST_TIME)?,
            stats: ResultStats::default(),
        })
    }

    fn requires_scoring(&self) -> bool {
        false
    }

    fn merge_fruits(&self, segment_fruits: Vec<ResultStats>) -> tantivy::Result<ResultStats> {
        let mut merged = ResultStats::default();
        for stats in &segment_fruits {
            merged.merge(stats);
        }
        Ok(merged)
    }
}

impl SegmentCollector for StatsSegmentCollector {
    type Fruit = ResultStats;

    fn collect(&mut self, doc: DocId, _score: Score) {
        if let Some(bytes) = self.bytes_sent.first(doc) {
            self.stats.bytes_sent.record(bytes as f64);
        }
        if let Some(seconds) = self.request_time.first(doc) {
            self.stats.request_time.record(seconds);
        }
    }

    fn harvest(self) -> ResultStats {
        self.stats
    }
}
