//! Prometheus exposition of engine metrics

mod common;

use accesslog_search::metrics;
use accesslog_search::search::*;
use common::*;

async fn exercise_engine() {
    let (_, shards) = sample_corpus();
    let searcher = searcher_over(shards);
    searcher.search(&SearchRequest::new("timeout")).await.unwrap();
    searcher.search(&SearchRequest::new("timeout")).await.unwrap();
    let _ = searcher
        .search(&SearchRequest::match_all().with_sort("ip", SortOrder::Asc))
        .await;

    let counter = CardinalityCounter::new(searcher.clone());
    counter.count(&CardinalityRequest::new("country")).await.unwrap();

    let (_, replacement) = sample_corpus();
    searcher.swap_shards(replacement).await.unwrap();
}

#[tokio::test]
async fn test_engine_metrics_are_exposed() {
    let _ = metrics::init_metrics();
    exercise_engine().await;

    let output = metrics::gather_metrics();
    let parsed = parse_prometheus_output(&output);

    for name in [
        "accesslog_search_searches_total",
        "accesslog_search_search_duration_seconds",
        "accesslog_search_cache_hits_total",
        "accesslog_search_shard_search_duration_seconds",
        "accesslog_search_shard_swaps_total",
        "accesslog_search_cardinality_runs_total",
    ] {
        assert!(parsed.contains_key(name), "missing {}", name);
    }

    let searches = &parsed["accesslog_search_searches_total"];
    let statuses: Vec<String> = searches
        .iter()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| extract_labels(line).remove("status"))
        .collect();
    assert!(statuses.iter().any(|s| s == "success"));
    assert!(statuses.iter().any(|s| s == "cache_hit"));
    assert!(statuses.iter().any(|s| s == "error"));

    let swaps = parsed["accesslog_search_shard_swaps_total"]
        .iter()
        .find(|line| line.contains("outcome=\"success\""))
        .and_then(|line| extract_metric_value(line))
        .unwrap();
    assert!(swaps >= 1.0);
}

#[tokio::test]
async fn test_exposition_format_and_naming() {
    let _ = metrics::init_metrics();
    exercise_engine().await;

    let output = metrics::gather_metrics();
    validate_exposition_format(&output).unwrap();

    for line in output.lines().filter(|l| l.starts_with("# TYPE")) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let (name, kind) = (parts[2], parts[3]);
        assert!(is_valid_metric_name(name), "{}", name);
        assert!(name.starts_with("accesslog_search_"), "{}", name);
        if kind == "counter" {
            assert!(name.ends_with("_total"), "{}", name);
        }
    }
}
