//! Result cache behavior as seen through the searcher

mod common;

use accesslog_search::config::EngineConfigBuilder;
use accesslog_search::search::*;
use common::*;
use std::sync::Arc;

#[tokio::test]
async fn test_repeated_search_is_served_from_cache() {
    let (_, shards) = sample_corpus();
    let searcher = searcher_over(shards);
    let request = SearchRequest::new("timeout").with_facets(vec!["country"], None);

    let first = searcher.search(&request).await.unwrap();
    let second = searcher.search(&request).await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(
        SearchResult {
            from_cache: false,
            ..second
        },
        first
    );

    let stats = searcher.stats();
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.cache.inserts, 1);
    assert_eq!(stats.successful_searches, 2);
}

#[tokio::test]
async fn test_reordered_filters_share_an_entry() {
    let (_, shards) = sample_corpus();
    let searcher = searcher_over(shards);

    let a = SearchRequest::match_all()
        .with_countries(vec!["US", "DE"])
        .with_status_codes(vec![200, 404]);
    let b = SearchRequest::match_all()
        .with_status_codes(vec![404, 200, 404])
        .with_countries(vec!["DE", "US"]);

    let first = searcher.search(&a).await.unwrap();
    let second = searcher.search(&b).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.total_hits, first.total_hits);

    let different = searcher
        .search(&SearchRequest::match_all().with_countries(vec!["US"]))
        .await
        .unwrap();
    assert!(!different.from_cache);
}

#[tokio::test]
async fn test_cache_bypass() {
    let (_, shards) = sample_corpus();
    let searcher = searcher_over(shards);
    let request = SearchRequest::new("timeout");

    let bypassed = searcher
        .search(&request.clone().with_cache(false))
        .await
        .unwrap();
    assert!(!bypassed.from_cache);

    // a bypassing search neither reads nor fills the cache
    let normal = searcher.search(&request).await.unwrap();
    assert!(!normal.from_cache);
    assert_eq!(searcher.stats().cache.inserts, 1);

    let again = searcher
        .search(&request.clone().with_cache(false))
        .await
        .unwrap();
    assert!(!again.from_cache);
}

#[tokio::test]
async fn test_clear_cache() {
    let (_, shards) = sample_corpus();
    let searcher = searcher_over(shards);
    let request = SearchRequest::match_all().with_limit(5);

    searcher.search(&request).await.unwrap();
    assert!(searcher.search(&request).await.unwrap().from_cache);

    searcher.clear_cache().await;
    assert!(!searcher.search(&request).await.unwrap().from_cache);
}

#[tokio::test]
async fn test_disabled_cache() {
    let (_, shards) = sample_corpus();
    let config = EngineConfigBuilder::new().enable_cache(false).build();
    let searcher = Arc::new(DistributedSearcher::new(shards, config).unwrap());
    let request = SearchRequest::match_all();

    searcher.search(&request).await.unwrap();
    let second = searcher.search(&request).await.unwrap();
    assert!(!second.from_cache);
    assert_eq!(searcher.stats().cache.inserts, 0);
}

#[tokio::test]
async fn test_entry_cost_tracks_page_size() {
    let (_, shards) = sample_corpus();
    let searcher = searcher_over(shards);

    let result = searcher
        .search(&SearchRequest::match_all().with_limit(70))
        .await
        .unwrap();
    assert_eq!(result.hits.len(), 70);
    assert_eq!(entry_cost(&result), 71);

    let default_page = searcher
        .search(&SearchRequest::match_all().with_limit(7))
        .await
        .unwrap();
    assert_eq!(entry_cost(&default_page), 51);
}
