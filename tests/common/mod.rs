//! Common test utilities: access-log shard fixtures and Prometheus output
//! helpers.

#![allow(dead_code)]

use accesslog_search::config::{EngineConfig, EngineConfigBuilder};
use accesslog_search::search::{DistributedSearcher, LogDocument, Shard, ShardWriter};
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// First timestamp used by the fixtures (2023-11-14T22:13:20Z)
pub const BASE_TS: i64 = 1_700_000_000;

const METHODS: [&str; 3] = ["GET", "POST", "DELETE"];
const STATUSES: [u16; 4] = [200, 200, 404, 500];
const COUNTRIES: [&str; 3] = ["US", "DE", "CN"];

/// One access-log line at `BASE_TS + offset`
pub fn log_line(id: &str, offset: i64, method: &str, path: &str, status: u16) -> LogDocument {
    let ts = Utc.timestamp_opt(BASE_TS + offset, 0).unwrap();
    LogDocument::new("/var/log/nginx/access.log", "10.0.0.1", method, path, status, ts)
        .with_id(id)
}

/// Deterministic traffic for shard `shard` holding `n` lines
///
/// Timestamps are unique across shards as long as `n <= 1000`.
pub fn traffic(shard: usize, n: usize) -> Vec<LogDocument> {
    (0..n)
        .map(|i| {
            let offset = (i * 10 + shard) as i64;
            let status = STATUSES[i % STATUSES.len()];
            let mut doc = log_line(
                &format!("s{}-{}", shard, i),
                offset,
                METHODS[i % METHODS.len()],
                &format!("/api/items/{}", i % 5),
                status,
            )
            .with_bytes_sent(100 * (i as u64 + 1))
            .with_request_time(0.01 * (i as f64 + 1.0))
            .with_country(COUNTRIES[(i + shard) % COUNTRIES.len()]);
            doc.ip = format!("10.0.{}.{}", shard, i % 7);
            if status == 500 {
                let message = format!(
                    "upstream timeout while reading response header from {}",
                    doc.path
                );
                doc = doc.with_message(message);
            }
            if shard == 1 {
                doc.log_path = "/var/log/nginx/api.log".to_string();
            }
            doc
        })
        .collect()
}

/// Build an in-memory shard from documents
pub fn build_shard(id: &str, docs: &[LogDocument]) -> Arc<Shard> {
    let mut writer = ShardWriter::in_ram(id).unwrap();
    writer.add_documents(docs).unwrap();
    Arc::new(writer.finish().unwrap())
}

/// One shard of `n` traffic lines, large enough that a faceted search over
/// it takes measurable time
pub fn large_shard(id: &str, n: usize) -> Arc<Shard> {
    build_shard(id, &traffic(0, n))
}

/// Shard whose `path_exact` histogram is exactly `counts`
pub fn path_shard(id: &str, counts: &[(&str, usize)]) -> Arc<Shard> {
    let mut docs = Vec::new();
    let mut offset = 0;
    for (path, count) in counts {
        for n in 0..*count {
            docs.push(log_line(&format!("{}-{}-{}", id, path, n), offset, "GET", path, 200));
            offset += 1;
        }
    }
    build_shard(id, &docs)
}

/// Three shards of sample traffic together with their documents
pub fn sample_corpus() -> (Vec<Vec<LogDocument>>, Vec<Arc<Shard>>) {
    let sizes = [40, 25, 35];
    let docs: Vec<Vec<LogDocument>> = sizes
        .iter()
        .enumerate()
        .map(|(shard, n)| traffic(shard, *n))
        .collect();
    let shards = docs
        .iter()
        .enumerate()
        .map(|(shard, docs)| build_shard(&format!("shard-{}", shard), docs))
        .collect();
    (docs, shards)
}

pub fn test_config() -> EngineConfig {
    EngineConfigBuilder::new()
        .max_concurrency(4)
        .search_timeout(Duration::from_secs(10))
        .shard_timeout(Duration::from_secs(5))
        .cache_clear_grace(Duration::from_millis(20))
        .build()
}

pub fn searcher_over(shards: Vec<Arc<Shard>>) -> Arc<DistributedSearcher> {
    Arc::new(DistributedSearcher::new(shards, test_config()).unwrap())
}

// ----------------------------------------------------------------------------
// Prometheus output helpers
// ----------------------------------------------------------------------------

/// Parse Prometheus exposition format into metric name -> lines
pub fn parse_prometheus_output(output: &str) -> HashMap<String, Vec<String>> {
    let mut metrics = HashMap::new();
    let mut current_metric = String::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("# HELP") || line.starts_with("# TYPE") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                current_metric = parts[2].to_string();
                metrics
                    .entry(current_metric.clone())
                    .or_insert_with(Vec::new)
                    .push(line.to_string());
            }
        } else if !line.starts_with('#') && !current_metric.is_empty() {
            metrics
                .entry(current_metric.clone())
                .or_insert_with(Vec::new)
                .push(line.to_string());
        }
    }

    metrics
}

/// Metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*` and not start with `__`
pub fn is_valid_metric_name(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() && first != '_' && first != ':' {
        return false;
    }
    if name.starts_with("__") {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Value of a sample line: `metric{label="v"} 42` -> 42
pub fn extract_metric_value(line: &str) -> Option<f64> {
    line.split_whitespace().last()?.parse::<f64>().ok()
}

/// Labels of a sample line
pub fn extract_labels(line: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    if let (Some(start), Some(end)) = (line.find('{'), line.find('}')) {
        for pair in line[start + 1..end].split(',') {
            if let Some((key, value)) = pair.split_once('=') {
                labels.insert(
                    key.trim().to_string(),
                    value.trim().trim_matches('"').to_string(),
                );
            }
        }
    }
    labels
}

/// Check that HELP lines are followed by TYPE lines of a known type
pub fn validate_exposition_format(output: &str) -> Result<(), String> {
    let lines: Vec<&str> = output.lines().collect();

    for (i, line) in lines.iter().enumerate() {
        let line = line.trim();
        if line.starts_with("# HELP") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return Err(format!("Line {}: Invalid HELP format", i + 1));
            }
            let next = lines.get(i + 1).map(|l| l.trim()).unwrap_or_default();
            if !next.starts_with(&format!("# TYPE {}", parts[2])) {
                return Err(format!(
                    "Line {}: HELP not followed by TYPE for metric {}",
                    i + 1,
                    parts[2]
                ));
            }
        }

        if line.starts_with("# TYPE") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let valid_types = ["counter", "gauge", "histogram", "summary", "untyped"];
            if parts.len() < 4 || !valid_types.contains(&parts[3]) {
                return Err(format!("Line {}: Invalid TYPE line", i + 1));
            }
        }
    }

    Ok(())
}
