// Facet merging and faceted search benchmarks
use accesslog_search::config::EngineConfigBuilder;
use accesslog_search::search::*;
use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;

const COUNTRIES: [&str; 6] = ["US", "DE", "FR", "JP", "BR", "IN"];
const METHODS: [&str; 4] = ["GET", "POST", "PUT", "DELETE"];

fn shard_facet(shard: usize, terms: usize) -> Facet {
    let mut facet = Facet::new("path_exact");
    facet.terms = (0..terms)
        .map(|i| TermCount::new(format!("/api/{}", (i * 7 + shard) % (terms * 2)), (i % 50) as u64 + 1))
        .collect();
    facet.total = terms as u64;
    facet
}

fn shard_counts(shard: usize, terms: usize) -> FieldCounts {
    let mut counts = FieldCounts::default();
    for i in 0..terms {
        counts.add(&format!("/api/{}", (i * 7 + shard) % (terms * 2)), (i % 50) as u64 + 1);
    }
    counts.missing = shard as u64;
    counts
}

fn build_shard(shard: usize, docs: usize) -> Arc<Shard> {
    let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let documents: Vec<LogDocument> = (0..docs)
        .map(|i| {
            LogDocument::new(
                "/var/log/nginx/access.log",
                format!("10.{}.{}.{}", shard, i % 250, i % 13),
                METHODS[i % METHODS.len()],
                format!("/api/items/{}", i % 97),
                [200, 200, 301, 404, 500][i % 5],
                base + chrono::Duration::seconds(i as i64),
            )
            .with_id(format!("s{}-{}", shard, i))
            .with_bytes_sent(512 + i as u64)
            .with_country(COUNTRIES[(i + shard) % COUNTRIES.len()])
        })
        .collect();

    let mut writer = ShardWriter::in_ram(format!("shard-{}", shard)).unwrap();
    writer.add_documents(&documents).unwrap();
    Arc::new(writer.finish().unwrap())
}

fn facet_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("facet_merge");

    for terms in [100, 1_000, 10_000] {
        let facets: Vec<Facet> = (0..8).map(|s| shard_facet(s, terms)).collect();
        let merger = FacetMerger::new(10);

        group.throughput(Throughput::Elements((terms * facets.len()) as u64));
        group.bench_with_input(BenchmarkId::new("merge_all", terms), &facets, |b, facets| {
            b.iter(|| black_box(merger.merge_all(facets.iter())));
        });
    }

    group.finish();
}

fn facet_from_counts(c: &mut Criterion) {
    let mut group = c.benchmark_group("facet_from_counts");

    for terms in [100, 1_000, 10_000] {
        let merger = FacetMerger::new(10);
        group.bench_with_input(BenchmarkId::from_parameter(terms), &terms, |b, &terms| {
            b.iter_batched(
                || (0..8).map(|s| shard_counts(s, terms)).collect::<Vec<_>>(),
                |shards| {
                    let mut combined = FieldCounts::default();
                    for counts in shards {
                        combined.merge(counts);
                    }
                    black_box(merger.from_counts("path_exact", combined))
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn faceted_search(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let shards: Vec<Arc<Shard>> = (0..4).map(|s| build_shard(s, 2_000)).collect();
    let config = EngineConfigBuilder::new().enable_cache(false).build();
    let searcher = Arc::new(DistributedSearcher::new(shards, config).unwrap());

    let request = SearchRequest::match_all()
        .with_limit(20)
        .with_facets(vec!["country", "method", "status", "path_exact"], Some(10));

    c.bench_function("faceted_search_4_shards", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(searcher.search(&request).await.unwrap());
        });
    });

    let filtered = request.clone().with_status_codes(vec![404, 500]);
    c.bench_function("faceted_search_filtered", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(searcher.search(&filtered).await.unwrap());
        });
    });

    let cached = Arc::new(
        DistributedSearcher::new(
            (0..4).map(|s| build_shard(s, 2_000)).collect(),
            EngineConfigBuilder::new().build(),
        )
        .unwrap(),
    );
    c.bench_function("faceted_search_cached", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(cached.search(&request).await.unwrap());
        });
    });
}

criterion_group!(benches, facet_merge, facet_from_counts, faceted_search);
criterion_main!(benches);
