use accesslog_search::config::EngineConfig;
use accesslog_search::metrics;
use accesslog_search::search::{
    CardinalityCounter, CardinalityRequest, DistributedSearcher, SearchRequest, Shard, SortOrder,
};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "accesslog-search")]
#[command(about = "Search access-log shards", long_about = None)]
#[command(version)]
struct Cli {
    /// Shard directories; the directory name becomes the shard ID
    #[arg(short, long = "shard", global = true)]
    shards: Vec<PathBuf>,

    /// Emit JSON logs
    #[arg(long, global = true, env = "ACCESSLOG_SEARCH_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Filters {
    /// Start of the time range (Unix seconds, inclusive)
    #[arg(long)]
    from: Option<i64>,

    /// End of the time range (Unix seconds, inclusive)
    #[arg(long)]
    to: Option<i64>,

    /// Only lines from these log files
    #[arg(long = "log-path")]
    log_paths: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a search and print the result
    Search {
        /// Free-text query (empty matches everything)
        #[arg(default_value = "")]
        query: String,

        #[command(flatten)]
        filters: Filters,

        #[arg(long = "status")]
        status_codes: Vec<u16>,

        #[arg(long = "method")]
        methods: Vec<String>,

        #[arg(long = "country")]
        countries: Vec<String>,

        #[arg(long = "ip")]
        ip_addresses: Vec<String>,

        /// Page size; never below the configured default page size
        #[arg(short, long, default_value = "0")]
        limit: usize,

        #[arg(short, long, default_value = "0")]
        offset: usize,

        /// Sort field, or `_score` for relevance
        #[arg(long, default_value = "timestamp")]
        sort: String,

        /// asc or desc
        #[arg(long, default_value = "desc")]
        order: String,

        /// Fields to facet on
        #[arg(long = "facet")]
        facets: Vec<String>,

        #[arg(long)]
        facet_size: Option<usize>,

        #[arg(long)]
        highlight: bool,

        /// Include bytes/request-time statistics
        #[arg(long)]
        stats: bool,

        /// Timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Count distinct values of one or more fields
    Count {
        /// Fields to count
        #[arg(required = true)]
        fields: Vec<String>,

        #[command(flatten)]
        filters: Filters,
    },

    /// Print Prometheus metrics after a searcher has been opened
    Metrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = EngineConfig::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        EngineConfig::default()
    });
    init_tracing(&config, cli.json_logs);

    if config.observability.prometheus_enabled {
        if let Err(e) = metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    let searcher = Arc::new(open_searcher(&cli.shards, config)?);

    match cli.command {
        Commands::Search {
            query,
            filters,
            status_codes,
            methods,
            countries,
            ip_addresses,
            limit,
            offset,
            sort,
            order,
            facets,
            facet_size,
            highlight,
            stats,
            timeout_ms,
        } => {
            let mut request = SearchRequest::new(query)
                .with_time_range(filters.from, filters.to)
                .with_log_paths(filters.log_paths)
                .with_status_codes(status_codes)
                .with_methods(methods)
                .with_countries(countries)
                .with_ip_addresses(ip_addresses)
                .with_limit(limit)
                .with_offset(offset)
                .with_sort(sort, SortOrder::parse(&order)?)
                .with_highlight(highlight)
                .with_stats(stats);
            if !facets.is_empty() {
                request = request.with_facets(facets, facet_size);
            }
            if let Some(ms) = timeout_ms {
                request = request.with_timeout(Duration::from_millis(ms));
            }

            let result = searcher.search(&request).await.context("search failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Count { fields, filters } => {
            let counter = CardinalityCounter::new(Arc::clone(&searcher));
            let base = CardinalityRequest::default()
                .with_time_range(filters.from, filters.to)
                .with_log_paths(filters.log_paths);

            if let [field] = fields.as_slice() {
                let result = counter
                    .count(&base.for_field(field.clone()))
                    .await
                    .context("cardinality failed")?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let results = counter.batch_count(&fields, &base).await;
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
        }

        Commands::Metrics => {
            println!("{}", serde_json::to_string_pretty(&searcher.stats())?);
            print!("{}", metrics::gather_metrics());
        }
    }

    searcher.stop().await;
    Ok(())
}

fn init_tracing(config: &EngineConfig, json_logs: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.observability.log_level.clone().into());

    // Logs go to stderr so stdout stays parseable
    if json_logs || config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn open_searcher(paths: &[PathBuf], config: EngineConfig) -> anyhow::Result<DistributedSearcher> {
    let mut shards = Vec::with_capacity(paths.len());
    for path in paths {
        let id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let shard = Shard::open_in_dir(id, path)
            .with_context(|| format!("failed to open shard at {}", path.display()))?;
        tracing::info!(shard = shard.id(), documents = shard.num_docs(), "Opened shard");
        shards.push(Arc::new(shard));
    }

    Ok(DistributedSearcher::new(shards, config)?)
}
