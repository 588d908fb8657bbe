//! Cross-shard facet merging
//!
//! Facets from different shards describe overlapping term sets, so their
//! `total` fields cannot be added: a term present in two shards would be
//! counted twice. Every merge here rebuilds the term map and takes `total`
//! from the number of distinct keys it ends up with.

use crate::search::result::{Facet, TermCount};
use std::collections::HashMap;

/// Complete term counts for one field, as collected from one shard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldCounts {
    pub counts: HashMap<String, u64>,
    pub missing: u64,
}

impl FieldCounts {
    pub fn add(&mut self, term: &str, count: u64) {
        *self.counts.entry(term.to_string()).or_insert(0) += count;
    }

    /// Fold counts from a disjoint document set into this one
    pub fn merge(&mut self, other: FieldCounts) {
        for (term, count) in other.counts {
            *self.counts.entry(term).or_insert(0) += count;
        }
        self.missing += other.missing;
    }
}

/// Merges facets for one field and applies the size cap
#[derive(Debug, Clone, Copy)]
pub struct FacetMerger {
    size: usize,
}

impl FacetMerger {
    /// `size` is the number of terms kept after merging
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Merge two facets over the same field
    pub fn merge(&self, a: &Facet, b: &Facet) -> Facet {
        let mut counts: HashMap<String, u64> = HashMap::with_capacity(a.terms.len() + b.terms.len());
        for term in a.terms.iter().chain(b.terms.iter()) {
            *counts.entry(term.term.clone()).or_insert(0) += term.count;
        }

        let field = if a.field.is_empty() { &b.field } else { &a.field };
        let mut merged = self.rank(field, counts);
        merged.missing = a.missing + b.missing;
        merged.other += a.other + b.other;
        merged
    }

    /// Merge any number of facets; `None` for an empty input
    pub fn merge_all<'a>(&self, facets: impl IntoIterator<Item = &'a Facet>) -> Option<Facet> {
        let mut iter = facets.into_iter();
        let first = iter.next()?;
        let seed = self.merge(first, &Facet::new(first.field.clone()));
        Some(iter.fold(seed, |acc, facet| self.merge(&acc, facet)))
    }

    /// Build a facet from complete term counts
    pub fn from_counts(&self, field: &str, counts: FieldCounts) -> Facet {
        let mut facet = self.rank(field, counts.counts);
        facet.missing = counts.missing;
        facet
    }

    /// Sort by count desc / term asc, keep `size` terms and fold the rest
    /// into `other`. `total` is the number of distinct keys.
    fn rank(&self, field: &str, counts: HashMap<String, u64>) -> Facet {
        let total = counts.len() as u64;

        let mut terms: Vec<TermCount> = counts
            .into_iter()
            .map(|(term, count)| TermCount { term, count })
            .collect();
        terms.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));

        let other = if terms.len() > self.size {
            terms.drain(self.size..).map(|t| t.count).sum()
        } else {
            0
        };

        Facet {
            field: field.to_string(),
            total,
            missing: 0,
            other,
            terms,
        }
    }
}
