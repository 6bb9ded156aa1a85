//! Synthetic load generation against configured routes.
//!
//! A run spawns `min(concurrency, runs)` workers on the current task. Workers
//! claim run indices from a shared counter until every run is taken, so the
//! total number of recorded outcomes always equals `runs`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::future::join_all;
use worker_common::{BenchmarkReport, OutcomeKind};

use crate::admission::AdmissionController;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::observability::ObservabilitySink;
use crate::routes::{BenchmarkSpec, RouteRegistry};

/// Drives benchmark payloads through admission and dispatch.
pub struct BenchmarkHarness {
    registry: Arc<RouteRegistry>,
    admission: Arc<AdmissionController>,
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn ObservabilitySink>,
}

impl BenchmarkHarness {
    pub fn new(
        registry: Arc<RouteRegistry>,
        admission: Arc<AdmissionController>,
        dispatcher: Arc<Dispatcher>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Self {
        Self {
            registry,
            admission,
            dispatcher,
            sink,
        }
    }

    /// Run the benchmark configured for `route` and summarize it.
    pub async fn run(&self, route: &str) -> Result<BenchmarkReport> {
        let spec = self
            .registry
            .lookup(route)
            .ok_or_else(|| Error::UnknownRoute(route.to_string()))?;
        let benchmark = spec
            .benchmark_spec()
            .ok_or_else(|| Error::NoBenchmark(route.to_string()))?;

        let workers = if benchmark.runs == 0 {
            0
        } else {
            benchmark.concurrency.clamp(1, benchmark.runs)
        };

        tracing::info!(
            route = %route,
            runs = benchmark.runs,
            workers = workers,
            "Starting benchmark"
        );

        let next_run = AtomicUsize::new(0);
        let outcomes = Mutex::new(Vec::with_capacity(benchmark.runs));
        let start = Instant::now();

        join_all((0..workers).map(|_| self.worker(route, benchmark, &next_run, &outcomes))).await;

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        let outcomes = outcomes.into_inner().unwrap_or_else(|e| e.into_inner());
        let report = BenchmarkReport::from_outcomes(route, workers, &outcomes, duration_ms);

        tracing::info!(
            route = %route,
            successes = report.successes,
            failures = report.failures,
            p50_ms = report.latency.p50_ms,
            p99_ms = report.latency.p99_ms,
            throughput_rps = report.throughput_rps,
            "Benchmark finished"
        );

        Ok(report)
    }

    async fn worker(
        &self,
        route: &str,
        benchmark: &BenchmarkSpec,
        next_run: &AtomicUsize,
        outcomes: &Mutex<Vec<(OutcomeKind, f64)>>,
    ) {
        while next_run.fetch_add(1, Ordering::Relaxed) < benchmark.runs {
            let outcome = self.run_once(route, benchmark).await;
            outcomes
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(outcome);
        }
    }

    async fn run_once(&self, route: &str, benchmark: &BenchmarkSpec) -> (OutcomeKind, f64) {
        let payload = benchmark.generator.generate();
        let start = Instant::now();

        let kind = match self.admission.try_admit(route, &payload).await {
            Ok(token) => match self.dispatcher.dispatch(route, payload, token).await {
                Ok(_) => OutcomeKind::Success,
                Err(e) => {
                    tracing::debug!(route = %route, "Benchmark run failed: {}", e);
                    e.outcome_kind().unwrap_or(OutcomeKind::TransportFailure)
                }
            },
            Err(rejection) => {
                let kind = rejection.kind();
                // The dispatcher never saw this run, so report it here.
                self.sink
                    .record(route, start.elapsed().as_secs_f64() * 1000.0, kind);
                kind
            }
        };

        (kind, start.elapsed().as_secs_f64() * 1000.0)
    }
}
