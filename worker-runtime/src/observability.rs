//! Observability sink for request outcomes and readiness transitions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::Serialize;
use worker_common::{OutcomeKind, Readiness, ReadinessState};

/// Narrow interface the core reports into.
pub trait ObservabilitySink: Send + Sync {
    /// Called once per finished (or rejected) request.
    fn record(&self, route: &str, latency_ms: f64, outcome: OutcomeKind);

    /// Called on every readiness status change.
    fn record_readiness_transition(&self, state: &ReadinessState);

    /// Per-route counters, for sinks that keep them.
    fn route_stats(&self) -> BTreeMap<String, RouteStats> {
        BTreeMap::new()
    }
}

/// Per-route counters kept by [`TracingSink`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteStats {
    pub requests: u64,
    pub outcomes: BTreeMap<OutcomeKind, u64>,
    /// Mean latency of successful requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
    #[serde(skip)]
    success_latency_total_ms: f64,
}

impl RouteStats {
    fn add(&mut self, latency_ms: f64, outcome: OutcomeKind) {
        self.requests += 1;
        *self.outcomes.entry(outcome).or_insert(0) += 1;

        if outcome.is_success() {
            self.success_latency_total_ms += latency_ms;
            let successes = self.outcomes[&OutcomeKind::Success] as f64;
            self.avg_latency_ms = Some(self.success_latency_total_ms / successes);
        }
    }

    pub fn count(&self, outcome: OutcomeKind) -> u64 {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }
}

/// Default sink: structured `tracing` events plus in-memory per-route counters.
#[derive(Debug, Default)]
pub struct TracingSink {
    stats: Mutex<HashMap<String, RouteStats>>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the counters for every configured route seen so far.
    pub fn stats(&self) -> BTreeMap<String, RouteStats> {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl ObservabilitySink for TracingSink {
    fn record(&self, route: &str, latency_ms: f64, outcome: OutcomeKind) {
        if outcome.is_success() {
            tracing::info!(route = %route, latency_ms = latency_ms, outcome = %outcome, "Request completed");
        } else if outcome.is_rejection() {
            tracing::info!(route = %route, latency_ms = latency_ms, outcome = %outcome, "Request rejected");
        } else {
            tracing::warn!(route = %route, latency_ms = latency_ms, outcome = %outcome, "Request failed");
        }

        // Arbitrary client paths must not grow the table.
        if outcome == OutcomeKind::UnknownRoute {
            return;
        }

        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats
            .entry(route.to_string())
            .or_default()
            .add(latency_ms, outcome);
    }

    fn record_readiness_transition(&self, state: &ReadinessState) {
        let line = state.last_line.as_deref().unwrap_or("");
        match state.status {
            Readiness::Errored => tracing::error!(
                status = %state.status,
                monitor_lost = state.monitor_lost,
                at = %state.changed_at,
                line = %line,
                "Model readiness changed"
            ),
            _ => tracing::info!(
                status = %state.status,
                at = %state.changed_at,
                line = %line,
                "Model readiness changed"
            ),
        }
    }

    fn route_stats(&self) -> BTreeMap<String, RouteStats> {
        self.stats()
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ObservabilitySink for NoopSink {
    fn record(&self, _route: &str, _latency_ms: f64, _outcome: OutcomeKind) {}

    fn record_readiness_transition(&self, _state: &ReadinessState) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_sink_counts_outcomes() {
        let sink = TracingSink::new();
        sink.record("/generate", 10.0, OutcomeKind::Success);
        sink.record("/generate", 30.0, OutcomeKind::Success);
        sink.record("/generate", 0.0, OutcomeKind::NotReady);
        sink.record("/v1/completions", 5.0, OutcomeKind::TransportFailure);

        let stats = sink.stats();
        let generate = &stats["/generate"];
        assert_eq!(generate.requests, 3);
        assert_eq!(generate.count(OutcomeKind::Success), 2);
        assert_eq!(generate.count(OutcomeKind::NotReady), 1);
        assert_eq!(generate.avg_latency_ms, Some(20.0));

        let completions = &stats["/v1/completions"];
        assert_eq!(completions.requests, 1);
        assert_eq!(completions.avg_latency_ms, None);
    }

    #[test]
    fn test_unknown_routes_are_not_counted() {
        let sink = TracingSink::new();
        sink.record("/../../etc/passwd", 0.0, OutcomeKind::UnknownRoute);
        assert!(sink.stats().is_empty());
        assert!(NoopSink.route_stats().is_empty());
    }

    #[test]
    fn test_route_stats_json() {
        let mut stats = RouteStats::default();
        stats.add(12.0, OutcomeKind::Success);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["requests"], 1);
        assert_eq!(json["outcomes"]["success"], 1);
        assert_eq!(json["avg_latency_ms"], 12.0);
        assert!(json.get("success_latency_total_ms").is_none());
    }
}
