use thiserror::Error;

/// Errors produced by the search engine
#[derive(Error, Debug)]
pub enum SearchError {
    /// The engine has been stopped
    #[error("Searcher is not running")]
    NotRunning,

    /// Caller supplied an invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Admission or execution exceeded the effective deadline
    #[error("Search timeout: {0}")]
    Timeout(String),

    /// The alias holds no shards
    #[error("No healthy shards available")]
    NoHealthyShards,

    /// No alias is installed (engine stopped or never initialized)
    #[error("Shard alias unavailable: {0}")]
    AliasUnavailable(String),

    /// A shard failed while executing its part of a distributed query
    #[error("Shard {shard_id} failed: {message}")]
    ShardFailed { shard_id: String, message: String },

    /// Shard schema does not match the engine schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The swap took effect but the post-swap self-test failed
    #[error("Post-swap self-test failed: {0}")]
    SelfTestFailed(String),

    /// Query parsing failed
    #[error("Query parsing failed: {0}")]
    QueryParsingFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tantivy error
    #[error("Tantivy error: {0}")]
    Tantivy(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            SearchError::NotRunning => "NOT_RUNNING",
            SearchError::InvalidRequest(_) => "INVALID_REQUEST",
            SearchError::Timeout(_) => "TIMEOUT",
            SearchError::NoHealthyShards => "NO_HEALTHY_SHARDS",
            SearchError::AliasUnavailable(_) => "ALIAS_UNAVAILABLE",
            SearchError::ShardFailed { .. } => "SHARD_FAILED",
            SearchError::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            SearchError::SelfTestFailed(_) => "SELF_TEST_FAILED",
            SearchError::QueryParsingFailed(_) => "QUERY_PARSING_FAILED",
            SearchError::InvalidConfiguration(_) => "CONFIGURATION_ERROR",
            SearchError::Io(_) => "IO_ERROR",
            SearchError::Tantivy(_) => "TANTIVY_ERROR",
            SearchError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    ///
    /// The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SearchError::Timeout(_)
                | SearchError::NoHealthyShards
                | SearchError::ShardFailed { .. }
                | SearchError::Tantivy(_)
        )
    }
}

impl From<tantivy::TantivyError> for SearchError {
    fn from(err: tantivy::TantivyError) -> Self {
        SearchError::Tantivy(err.to_string())
    }
}

impl From<tantivy::query::QueryParserError> for SearchError {
    fn from(err: tantivy::query::QueryParserError) -> Self {
        SearchError::QueryParsingFailed(err.to_string())
    }
}

impl From<validator::ValidationErrors> for SearchError {
    fn from(err: validator::ValidationErrors) -> Self {
        SearchError::InvalidRequest(err.to_string())
    }
}

impl From<config::ConfigError> for SearchError {
    fn from(err: config::ConfigError) -> Self {
        SearchError::InvalidConfiguration(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SearchError {
    fn from(err: tokio::task::JoinError) -> Self {
        SearchError::Internal(format!("search task failed: {}", err))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SearchError>;
