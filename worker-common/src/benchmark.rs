//! Benchmark report types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::OutcomeKind;

/// Latency distribution over successful runs, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
}

impl LatencySummary {
    /// Summarize a set of latency samples. Empty input yields all zeros.
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let sum: f64 = sorted.iter().sum();
        Self {
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            mean_ms: sum / sorted.len() as f64,
        }
    }
}

/// Nearest-rank percentile over an already sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * p / 100.0).ceil() as usize)
        .saturating_sub(1)
        .min(sorted.len() - 1);
    sorted[idx]
}

/// Aggregated result of a benchmark run against one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub route: String,
    /// Number of concurrent workers that were actually spawned.
    pub workers: usize,
    pub total_runs: usize,
    pub successes: usize,
    pub failures: usize,
    /// Failure counts keyed by outcome kind.
    #[serde(default)]
    pub failures_by_kind: BTreeMap<OutcomeKind, usize>,
    /// Fraction of runs that succeeded (0.0 to 1.0).
    pub success_rate: f64,
    pub latency: LatencySummary,
    /// Wall-clock duration of the whole benchmark.
    pub duration_ms: f64,
    /// Completed runs per second of wall-clock time.
    pub throughput_rps: f64,
}

impl BenchmarkReport {
    /// Build a report from per-run outcomes.
    ///
    /// `outcomes` holds one `(kind, latency_ms)` entry per run; only successful
    /// runs contribute to the latency summary.
    pub fn from_outcomes(
        route: impl Into<String>,
        workers: usize,
        outcomes: &[(OutcomeKind, f64)],
        duration_ms: f64,
    ) -> Self {
        let mut failures_by_kind = BTreeMap::new();
        let mut latencies = Vec::with_capacity(outcomes.len());

        for (kind, latency_ms) in outcomes {
            if kind.is_success() {
                latencies.push(*latency_ms);
            } else {
                *failures_by_kind.entry(*kind).or_insert(0) += 1;
            }
        }

        let total_runs = outcomes.len();
        let successes = latencies.len();
        let failures = total_runs - successes;
        let success_rate = if total_runs == 0 {
            0.0
        } else {
            successes as f64 / total_runs as f64
        };
        let throughput_rps = if duration_ms > 0.0 {
            total_runs as f64 / (duration_ms / 1000.0)
        } else {
            0.0
        };

        Self {
            route: route.into(),
            workers,
            total_runs,
            successes,
            failures,
            failures_by_kind,
            success_rate,
            latency: LatencySummary::from_samples(&latencies),
            duration_ms,
            throughput_rps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_summary_empty() {
        let summary = LatencySummary::from_samples(&[]);
        assert_eq!(summary, LatencySummary::default());
    }

    #[test]
    fn test_latency_summary_percentiles() {
        let samples: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let summary = LatencySummary::from_samples(&samples);

        assert_eq!(summary.min_ms, 1.0);
        assert_eq!(summary.max_ms, 100.0);
        assert_eq!(summary.p50_ms, 50.0);
        assert_eq!(summary.p95_ms, 95.0);
        assert_eq!(summary.p99_ms, 99.0);
        assert!((summary.mean_ms - 50.5).abs() < 1e-9);
    }

    #[test]
    fn test_latency_summary_eight_runs() {
        let samples: Vec<f64> = (1..=8).map(|i| i as f64).collect();
        let summary = LatencySummary::from_samples(&samples);

        assert_eq!(summary.p50_ms, 4.0);
        assert_eq!(summary.p95_ms, 8.0);
        assert_eq!(summary.p99_ms, 8.0);
    }

    #[test]
    fn test_latency_summary_single_sample() {
        let summary = LatencySummary::from_samples(&[42.0]);
        assert_eq!(summary.p50_ms, 42.0);
        assert_eq!(summary.p99_ms, 42.0);
    }

    #[test]
    fn test_latency_summary_unsorted_input() {
        let summary = LatencySummary::from_samples(&[30.0, 10.0, 20.0]);
        assert_eq!(summary.min_ms, 10.0);
        assert_eq!(summary.p50_ms, 20.0);
        assert_eq!(summary.max_ms, 30.0);
    }

    #[test]
    fn test_report_counts() {
        let outcomes = vec![
            (OutcomeKind::Success, 10.0),
            (OutcomeKind::Success, 30.0),
            (OutcomeKind::NotReady, 0.1),
            (OutcomeKind::TransportFailure, 5000.0),
            (OutcomeKind::NotReady, 0.2),
        ];
        let report = BenchmarkReport::from_outcomes("/generate", 2, &outcomes, 1000.0);

        assert_eq!(report.total_runs, 5);
        assert_eq!(report.successes, 2);
        assert_eq!(report.failures, 3);
        assert_eq!(report.failures_by_kind[&OutcomeKind::NotReady], 2);
        assert_eq!(report.failures_by_kind[&OutcomeKind::TransportFailure], 1);
        assert!((report.success_rate - 0.4).abs() < 1e-9);
        // Failed runs never leak into the latency distribution.
        assert_eq!(report.latency.max_ms, 30.0);
        assert!((report.throughput_rps - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_report_serializes_failure_kinds_as_strings() {
        let outcomes = vec![(OutcomeKind::QueueTimeout, 1.0)];
        let report = BenchmarkReport::from_outcomes("/v1/completions", 1, &outcomes, 0.0);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failures_by_kind"]["queue_timeout"], 1);
        assert_eq!(json["throughput_rps"], 0.0);
    }
}
