//! Per-query metrics aggregation.
//!
//! [`MetricsCollector`] accumulates one [`QueryMetrics`] entry per
//! completed query (answered or failed) and derives summary statistics.
//! The collector is shared behind an `Arc` and guarded by a single mutex,
//! so concurrent callers stay safe while the common single-writer path
//! pays only a lock per query.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::models::QueryMetrics;

/// Aggregate statistics across all recorded queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total_queries: usize,
    pub total_tokens: u64,
    pub total_errors: usize,
    pub avg_latency: f64,
    pub avg_tokens_per_query: f64,
    /// Percentage of queries that recorded an error.
    pub error_rate: f64,
}

#[derive(Default)]
struct Inner {
    queries: Vec<QueryMetrics>,
    total_tokens: u64,
    total_errors: usize,
}

/// Process-wide accumulator of query statistics.
#[derive(Default)]
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one query's metrics. Called exactly once per query.
    pub fn record_query(&self, metrics: QueryMetrics) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.total_tokens += metrics.tokens_used as u64;
        if metrics.error.is_some() {
            inner.total_errors += 1;
        }
        inner.queries.push(metrics);
    }

    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.lock().expect("metrics lock poisoned");

        if inner.queries.is_empty() {
            return MetricsSummary {
                total_queries: 0,
                total_tokens: 0,
                total_errors: 0,
                avg_latency: 0.0,
                avg_tokens_per_query: 0.0,
                error_rate: 0.0,
            };
        }

        let n = inner.queries.len();
        let total_time: f64 = inner.queries.iter().map(|q| q.total_time).sum();

        MetricsSummary {
            total_queries: n,
            total_tokens: inner.total_tokens,
            total_errors: inner.total_errors,
            avg_latency: round2(total_time / n as f64),
            avg_tokens_per_query: round2(inner.total_tokens as f64 / n as f64),
            error_rate: round2(inner.total_errors as f64 / n as f64 * 100.0),
        }
    }

    /// The `n` most recent query entries, oldest first.
    pub fn recent_queries(&self, n: usize) -> Vec<QueryMetrics> {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        let skip = inner.queries.len().saturating_sub(n);
        inner.queries[skip..].to_vec()
    }

    /// Serialize the full metrics log as `{summary, queries}` JSON.
    pub fn to_json(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Export<'a> {
            summary: MetricsSummary,
            queries: &'a [QueryMetrics],
        }

        let summary = self.summary();
        let inner = self.inner.lock().expect("metrics lock poisoned");
        let export = Export {
            summary,
            queries: &inner.queries,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Write the metrics export document to a file.
    pub fn export_to_file(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        Ok(())
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(tokens: u32, total_time: f64, error: Option<&str>) -> QueryMetrics {
        let mut m = QueryMetrics::new("test question");
        m.tokens_used = tokens;
        m.total_time = total_time;
        m.error = error.map(str::to_string);
        m
    }

    #[test]
    fn empty_summary_is_all_zeros() {
        let collector = MetricsCollector::new();
        let summary = collector.summary();
        assert_eq!(summary.total_queries, 0);
        assert_eq!(summary.total_tokens, 0);
        assert_eq!(summary.total_errors, 0);
        assert_eq!(summary.avg_latency, 0.0);
        assert_eq!(summary.avg_tokens_per_query, 0.0);
        assert_eq!(summary.error_rate, 0.0);
    }

    #[test]
    fn summary_aggregates_tokens_and_latency() {
        let collector = MetricsCollector::new();
        collector.record_query(metrics(100, 1.0, None));
        collector.record_query(metrics(300, 3.0, None));

        let summary = collector.summary();
        assert_eq!(summary.total_queries, 2);
        assert_eq!(summary.total_tokens, 400);
        assert_eq!(summary.avg_latency, 2.0);
        assert_eq!(summary.avg_tokens_per_query, 200.0);
        assert_eq!(summary.error_rate, 0.0);
    }

    #[test]
    fn error_rate_is_a_percentage() {
        let collector = MetricsCollector::new();
        collector.record_query(metrics(0, 0.5, Some("boom")));
        collector.record_query(metrics(50, 1.5, None));

        let summary = collector.summary();
        assert_eq!(summary.total_errors, 1);
        assert_eq!(summary.error_rate, 50.0);
    }

    #[test]
    fn recent_queries_returns_tail() {
        let collector = MetricsCollector::new();
        for i in 0..5 {
            collector.record_query(metrics(i, 0.0, None));
        }
        let recent = collector.recent_queries(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].tokens_used, 3);
        assert_eq!(recent[1].tokens_used, 4);
    }

    #[test]
    fn export_has_summary_and_queries() {
        let collector = MetricsCollector::new();
        collector.record_query(metrics(42, 1.2, None));

        let json = collector.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["total_queries"], 1);
        assert_eq!(value["queries"].as_array().unwrap().len(), 1);
        assert_eq!(value["queries"][0]["tokens_used"], 42);
    }
}
