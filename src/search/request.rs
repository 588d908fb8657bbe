//! Search and cardinality request types

use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use strum::{Display, EnumString};
use validator::Validate;

/// Sort field that orders hits by relevance
pub const SCORE_SORT: &str = "_score";

/// Sort direction
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Parse an externally supplied sort order, rejecting anything but
    /// `asc` and `desc`
    pub fn parse(value: &str) -> Result<Self> {
        SortOrder::from_str(value.trim()).map_err(|_| {
            SearchError::InvalidRequest(format!(
                "sort order must be `asc` or `desc`, got `{}`",
                value
            ))
        })
    }
}

/// One distributed search
///
/// Multi-value filters match when the field equals any of the listed
/// values; different filters must all match.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SearchRequest {
    /// Free text over `message` and `path`; empty matches everything
    #[validate(length(max = 4096))]
    pub query: String,

    /// Stored fields to return per hit (empty = all)
    pub fields: Vec<String>,

    /// Inclusive Unix seconds
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,

    pub log_paths: Vec<String>,
    pub ip_addresses: Vec<String>,
    pub methods: Vec<String>,
    pub status_codes: Vec<u16>,
    pub paths: Vec<String>,
    pub user_agents: Vec<String>,
    pub referers: Vec<String>,
    pub countries: Vec<String>,
    pub browsers: Vec<String>,
    pub operating_systems: Vec<String>,
    pub devices: Vec<String>,

    pub min_bytes: Option<u64>,
    pub max_bytes: Option<u64>,
    /// Seconds
    pub min_request_time: Option<f64>,
    pub max_request_time: Option<f64>,

    /// Page size; zero selects the engine default
    pub limit: usize,
    pub offset: usize,

    /// Field to order by (`_score` for relevance); empty selects `timestamp`
    pub sort_by: String,
    pub sort_order: SortOrder,

    pub include_facets: bool,
    pub facet_fields: Vec<String>,
    #[validate(range(min = 1))]
    pub facet_size: Option<usize>,

    pub highlight: bool,
    pub include_stats: bool,

    /// `None` defers to the engine setting
    pub use_cache: Option<bool>,
    /// `None` defers to the engine timeout; a longer value never extends it
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl SearchRequest {
    /// Create a request for the given free-text query
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Match-all request
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Effective sort field
    pub fn sort_field(&self) -> &str {
        if self.sort_by.is_empty() {
            crate::search::document::TIMESTAMP
        } else {
            &self.sort_by
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_fields(mut self, fields: Vec<impl Into<String>>) -> Self {
        self.fields = into_strings(fields);
        self
    }

    /// Restrict to an inclusive time range (Unix seconds)
    pub fn with_time_range(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn with_log_paths(mut self, log_paths: Vec<impl Into<String>>) -> Self {
        self.log_paths = into_strings(log_paths);
        self
    }

    pub fn with_ip_addresses(mut self, ips: Vec<impl Into<String>>) -> Self {
        self.ip_addresses = into_strings(ips);
        self
    }

    pub fn with_methods(mut self, methods: Vec<impl Into<String>>) -> Self {
        self.methods = into_strings(methods);
        self
    }

    pub fn with_status_codes(mut self, status_codes: Vec<u16>) -> Self {
        self.status_codes = status_codes;
        self
    }

    pub fn with_paths(mut self, paths: Vec<impl Into<String>>) -> Self {
        self.paths = into_strings(paths);
        self
    }

    pub fn with_user_agents(mut self, user_agents: Vec<impl Into<String>>) -> Self {
        self.user_agents = into_strings(user_agents);
        self
    }

    pub fn with_referers(mut self, referers: Vec<impl Into<String>>) -> Self {
        self.referers = into_strings(referers);
        self
    }

    pub fn with_countries(mut self, countries: Vec<impl Into<String>>) -> Self {
        self.countries = into_strings(countries);
        self
    }

    pub fn with_browsers(mut self, browsers: Vec<impl Into<String>>) -> Self {
        self.browsers = into_strings(browsers);
        self
    }

    pub fn with_operating_systems(mut self, systems: Vec<impl Into<String>>) -> Self {
        self.operating_systems = into_strings(systems);
        self
    }

    pub fn with_devices(mut self, devices: Vec<impl Into<String>>) -> Self {
        self.devices = into_strings(devices);
        self
    }

    pub fn with_bytes_range(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.min_bytes = min;
        self.max_bytes = max;
        self
    }

    pub fn with_request_time_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_request_time = min;
        self.max_request_time = max;
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = field.into();
        self.sort_order = order;
        self
    }

    /// Request facets on the given fields
    pub fn with_facets(mut self, fields: Vec<impl Into<String>>, size: Option<usize>) -> Self {
        self.include_facets = true;
        self.facet_fields = into_strings(fields);
        self.facet_size = size;
        self
    }

    pub fn with_highlight(mut self, highlight: bool) -> Self {
        self.highlight = highlight;
        self
    }

    pub fn with_stats(mut self, include_stats: bool) -> Self {
        self.include_stats = include_stats;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = Some(use_cache);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Multi-value filters paired with the exact-match field they apply to.
    /// Status codes are rendered as decimal strings.
    pub fn term_filters(&self) -> Vec<(&'static str, Vec<String>)> {
        use crate::search::document::*;

        vec![
            (LOG_PATH, self.log_paths.clone()),
            (IP, self.ip_addresses.clone()),
            (METHOD, self.methods.clone()),
            (STATUS, self.status_codes.iter().map(u16::to_string).collect()),
            (PATH_EXACT, self.paths.clone()),
            (USER_AGENT, self.user_agents.clone()),
            (REFERER, self.referers.clone()),
            (COUNTRY, self.countries.clone()),
            (BROWSER, self.browsers.clone()),
            (OS, self.operating_systems.clone()),
            (DEVICE, self.devices.clone()),
        ]
    }
}

/// Unique-value count over one field
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CardinalityRequest {
    #[validate(length(min = 1, max = 255))]
    pub field: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub log_paths: Vec<String>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl CardinalityRequest {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..Default::default()
        }
    }

    pub fn with_time_range(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn with_log_paths(mut self, log_paths: Vec<impl Into<String>>) -> Self {
        self.log_paths = into_strings(log_paths);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Same filters, different field
    pub fn for_field(&self, field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..self.clone()
        }
    }

    /// Match-all search carrying this request's filters, never cached
    pub(crate) fn to_search_request(&self) -> SearchRequest {
        let mut request = SearchRequest::match_all()
            .with_time_range(self.start_time, self.end_time)
            .with_log_paths(self.log_paths.clone())
            .with_cache(false);
        request.timeout = self.timeout;
        request
    }
}

fn into_strings(values: Vec<impl Into<String>>) -> Vec<String> {
    values.into_iter().map(Into::into).collect()
}
