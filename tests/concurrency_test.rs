//! Admission control and concurrent use of one searcher

mod common;

use accesslog_search::config::EngineConfigBuilder;
use accesslog_search::search::*;
use accesslog_search::SearchError;
use common::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn heavy_request() -> SearchRequest {
    SearchRequest::match_all()
        .with_facets(vec!["country", "status", "method", "path_exact"], None)
        .with_stats(true)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_more_callers_than_permits_all_succeed() {
    let (_, shards) = sample_corpus();
    let config = EngineConfigBuilder::new()
        .max_concurrency(2)
        .enable_cache(false)
        .search_timeout(Duration::from_secs(30))
        .build();
    let searcher = Arc::new(DistributedSearcher::new(shards, config).unwrap());

    let done = Arc::new(AtomicBool::new(false));
    let peak = Arc::new(AtomicU64::new(0));
    let sampler = {
        let searcher = Arc::clone(&searcher);
        let done = Arc::clone(&done);
        let peak = Arc::clone(&peak);
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                peak.fetch_max(searcher.stats().active_searches, Ordering::SeqCst);
                tokio::task::yield_now().await;
            }
        })
    };

    let mut handles = Vec::new();
    for i in 0..32 {
        let searcher = Arc::clone(&searcher);
        handles.push(tokio::spawn(async move {
            let request = if i % 2 == 0 {
                SearchRequest::new("timeout").with_facets(vec!["country"], None)
            } else {
                SearchRequest::match_all().with_offset(i).with_limit(5)
            };
            searcher.search(&request).await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_ok(), "{:?}", result.err());
    }
    done.store(true, Ordering::SeqCst);
    sampler.await.unwrap();
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "active searches peaked at {}", peak);

    let stats = searcher.stats();
    assert_eq!(stats.total_searches, 32);
    assert_eq!(stats.successful_searches, 32);
    assert_eq!(stats.failed_searches, 0);
    assert_eq!(stats.active_searches, 0);
    assert_eq!(stats.queued_searches, 0);
    assert!(stats.max_latency_ms >= stats.min_latency_ms);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_search_exceeding_deadline_times_out() {
    let config = EngineConfigBuilder::new()
        .enable_cache(false)
        .search_timeout(Duration::from_millis(1))
        .shard_timeout(Duration::from_secs(30))
        .build();
    let searcher = DistributedSearcher::new(vec![large_shard("big", 30_000)], config).unwrap();

    let result = searcher.search(&heavy_request()).await;
    assert!(matches!(result, Err(SearchError::Timeout(_))), "{:?}", result);

    let stats = searcher.stats();
    assert_eq!(stats.failed_searches, 1);
    assert_eq!(stats.active_searches, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiting_for_a_permit_counts_against_the_deadline() {
    let config = EngineConfigBuilder::new()
        .max_concurrency(1)
        .enable_cache(false)
        .search_timeout(Duration::from_secs(60))
        .shard_timeout(Duration::from_secs(60))
        .build();
    let searcher = Arc::new(
        DistributedSearcher::new(vec![large_shard("big", 30_000)], config).unwrap(),
    );

    // keep the only permit busy for several heavy searches in a row
    let holders: Vec<_> = (0..4)
        .map(|_| {
            let searcher = Arc::clone(&searcher);
            tokio::spawn(async move { searcher.search(&heavy_request()).await })
        })
        .collect();
    tokio::time::timeout(Duration::from_secs(5), async {
        while searcher.stats().active_searches == 0 {
            tokio::time::sleep(Duration::from_micros(100)).await;
        }
    })
    .await
    .unwrap();

    let result = searcher
        .search(&SearchRequest::match_all().with_timeout(Duration::from_millis(1)))
        .await;
    match result {
        Err(SearchError::Timeout(message)) => {
            assert!(message.contains("search slot"), "{}", message)
        }
        other => panic!("expected a timeout, got {:?}", other),
    }

    for holder in holders {
        assert!(holder.await.unwrap().is_ok());
    }
    let stats = searcher.stats();
    assert_eq!(stats.active_searches, 0);
    assert_eq!(stats.queued_searches, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_async_searches() {
    let (_, shards) = sample_corpus();
    let searcher = searcher_over(shards);

    let receivers: Vec<_> = (0..10)
        .map(|i| searcher.search_async(SearchRequest::match_all().with_offset(i)))
        .collect();

    for (mut results, mut errors) in receivers {
        let result = results.recv().await.unwrap();
        assert_eq!(result.total_hits, 100);
        assert!(errors.recv().await.is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_during_load() {
    let (_, shards) = sample_corpus();
    let config = EngineConfigBuilder::new()
        .max_concurrency(1)
        .enable_cache(false)
        .build();
    let searcher = Arc::new(DistributedSearcher::new(shards, config).unwrap());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let searcher = Arc::clone(&searcher);
            tokio::spawn(async move { searcher.search(&SearchRequest::new("timeout")).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(1)).await;
    searcher.stop().await;

    for handle in handles {
        match handle.await.unwrap() {
            Ok(result) => assert!(result.total_hits > 0),
            Err(SearchError::NotRunning) | Err(SearchError::AliasUnavailable(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert!(!searcher.is_running());
    assert_eq!(searcher.stats().queued_searches, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shard_stats_accumulate() {
    let (_, shards) = sample_corpus();
    let searcher = searcher_over(shards);

    for offset in 0..5 {
        searcher
            .search(&SearchRequest::match_all().with_offset(offset).with_limit(3))
            .await
            .unwrap();
    }

    let stats = searcher.stats();
    assert_eq!(stats.shards.len(), 3);
    for shard in stats.shards.values() {
        // one query phase per search, plus fetches for shards on the page
        assert!(shard.searches >= 5);
        assert_eq!(shard.errors, 0);
    }
}
