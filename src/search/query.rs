//! Request validation and tantivy query construction

use crate::error::{Result, SearchError};
use crate::search::document::{LogSchema, BYTES_SENT, REQUEST_TIME, TIMESTAMP};
use crate::search::request::{SearchRequest, SCORE_SORT};
use std::ops::Bound;
use tantivy::query::{
    AllQuery, BooleanQuery, ConstScoreQuery, Occur, Query, QueryParser, RangeQuery, TermQuery,
};
use tantivy::schema::IndexRecordOption;
use tantivy::tokenizer::TokenizerManager;
use tantivy::Term;
use validator::Validate;

/// Turns a [`SearchRequest`] into a tantivy query tree
///
/// Pure: holds only the schema and limits, performs no I/O and can be
/// shared between threads.
#[derive(Clone)]
pub struct QueryBuilder {
    schema: LogSchema,
    max_facet_size: usize,
}

impl QueryBuilder {
    /// Create a new query builder
    pub fn new(schema: LogSchema, max_facet_size: usize) -> Self {
        Self {
            schema,
            max_facet_size,
        }
    }

    pub fn schema(&self) -> &LogSchema {
        &self.schema
    }

    /// Reject requests that cannot be executed
    pub fn validate(&self, request: &SearchRequest) -> Result<()> {
        request.validate()?;

        if let Some(size) = request.facet_size {
            if size > self.max_facet_size {
                return Err(SearchError::InvalidRequest(format!(
                    "facet_size {} exceeds the maximum of {}",
                    size, self.max_facet_size
                )));
            }
        }

        let sort_field = request.sort_field();
        if sort_field != SCORE_SORT && !self.schema.is_sortable(sort_field) {
            return Err(SearchError::InvalidRequest(format!(
                "cannot sort by `{}`",
                sort_field
            )));
        }

        for field in &request.facet_fields {
            if !self.schema.is_facetable(field) {
                return Err(SearchError::InvalidRequest(format!(
                    "field `{}` cannot be faceted",
                    field
                )));
            }
        }

        let stored = self.schema.stored_field_names();
        if let Some(unknown) = request
            .fields
            .iter()
            .find(|f| !stored.iter().any(|name| *name == f.as_str()))
        {
            return Err(SearchError::InvalidRequest(format!(
                "unknown field `{}`",
                unknown
            )));
        }

        check_range("time", request.start_time, request.end_time)?;
        check_range("bytes", request.min_bytes, request.max_bytes)?;
        for bound in [request.min_request_time, request.max_request_time]
            .into_iter()
            .flatten()
        {
            if bound.is_nan() {
                return Err(SearchError::InvalidRequest(
                    "request time bounds must be numbers".to_string(),
                ));
            }
        }
        check_range(
            "request time",
            request.min_request_time,
            request.max_request_time,
        )?;

        Ok(())
    }

    /// Build the conjunction of the free-text clause and every active filter
    pub fn build(&self, request: &SearchRequest) -> Result<Box<dyn Query>> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        // Main text query (message, path)
        let text = request.query.trim();
        if !text.is_empty() {
            let parser = QueryParser::new(
                self.schema.schema().clone(),
                self.schema.text_fields(),
                TokenizerManager::default(),
            );
            clauses.push((Occur::Must, parser.parse_query(text)?));
        }

        // Time range
        if request.start_time.is_some() || request.end_time.is_some() {
            let range = RangeQuery::new_i64_bounds(
                TIMESTAMP.to_string(),
                included(request.start_time),
                included(request.end_time),
            );
            clauses.push((Occur::Must, filter(Box::new(range))));
        }

        // Multi-value term filters
        for (field_name, values) in request.term_filters() {
            let Some(field) = self.schema.field(field_name) else {
                continue;
            };
            let alternatives: Vec<(Occur, Box<dyn Query>)> = values
                .iter()
                .filter(|v| !v.is_empty())
                .map(|value| {
                    let term = Term::from_field_text(field, value);
                    let query: Box<dyn Query> =
                        Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                    (Occur::Should, query)
                })
                .collect();
            if !alternatives.is_empty() {
                let any_of = BooleanQuery::new(alternatives);
                clauses.push((Occur::Must, filter(Box::new(any_of))));
            }
        }

        // Numeric ranges
        if request.min_bytes.is_some() || request.max_bytes.is_some() {
            let range = RangeQuery::new_u64_bounds(
                BYTES_SENT.to_string(),
                included(request.min_bytes),
                included(request.max_bytes),
            );
            clauses.push((Occur::Must, filter(Box::new(range))));
        }
        if request.min_request_time.is_some() || request.max_request_time.is_some() {
            let range = RangeQuery::new_f64_bounds(
                REQUEST_TIME.to_string(),
                included(request.min_request_time),
                included(request.max_request_time),
            );
            clauses.push((Occur::Must, filter(Box::new(range))));
        }

        match clauses.len() {
            0 => Ok(Box::new(AllQuery)),
            1 => Ok(clauses.remove(0).1),
            _ => Ok(Box::new(BooleanQuery::new(clauses))),
        }
    }
}

/// Filters match or not; only the text clause contributes to relevance
fn filter(query: Box<dyn Query>) -> Box<dyn Query> {
    Box::new(ConstScoreQuery::new(query, 0.0))
}

fn included<T>(bound: Option<T>) -> Bound<T> {
    bound.map(Bound::Included).unwrap_or(Bound::Unbounded)
}

fn check_range<T: PartialOrd + std::fmt::Display>(
    name: &str,
    min: Option<T>,
    max: Option<T>,
) -> Result<()> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(SearchError::InvalidRequest(format!(
                "{} range is inverted ({} > {})",
                name, min, max
            )));
        }
    }
    Ok(())
}
