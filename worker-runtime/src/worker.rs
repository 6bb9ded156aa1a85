//! The worker runtime: wires readiness, admission, dispatch and benchmarks
//! together from a single configuration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;
use worker_common::{BenchmarkReport, CapacitySnapshot, ReadinessState};

use crate::admission::AdmissionController;
use crate::benchmark::BenchmarkHarness;
use crate::config::Config;
use crate::dispatch::{Dispatcher, HttpBackend, ModelBackend};
use crate::error::Result;
use crate::observability::{ObservabilitySink, RouteStats, TracingSink};
use crate::readiness::{LogRules, LogTail, ReadinessMonitor};
use crate::routes::RouteRegistry;

/// A model worker serving the configured routes.
pub struct Worker {
    config: Config,
    registry: Arc<RouteRegistry>,
    readiness: Arc<ReadinessMonitor>,
    admission: Arc<AdmissionController>,
    dispatcher: Arc<Dispatcher>,
    harness: BenchmarkHarness,
    sink: Arc<dyn ObservabilitySink>,
}

impl Worker {
    /// Build a worker that forwards to the configured model server over HTTP
    /// and reports through a [`TracingSink`].
    pub fn new(config: &Config) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(&config.model_server)?);
        tracing::info!("Forwarding requests to model server at {}", backend.base_url());
        Self::with_backend(config, backend, Arc::new(TracingSink::new()))
    }

    /// Build a worker around a custom backend and sink.
    ///
    /// Fails only if the handler list declares a route twice.
    pub fn with_backend(
        config: &Config,
        backend: Arc<dyn ModelBackend>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Result<Self> {
        let registry = Arc::new(RouteRegistry::new(config.handler_specs())?);
        let readiness = Arc::new(ReadinessMonitor::new(
            LogRules::from_config(&config.log_actions),
            sink.clone(),
        ));
        let admission = Arc::new(AdmissionController::new(&registry, readiness.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            backend,
            sink.clone(),
            config.defaults.clone(),
        ));
        let harness = BenchmarkHarness::new(
            registry.clone(),
            admission.clone(),
            dispatcher.clone(),
            sink.clone(),
        );

        tracing::info!(
            routes = registry.len(),
            benchmarks = registry.benchmark_routes().len(),
            "Worker configured"
        );

        Ok(Self {
            config: config.clone(),
            registry,
            readiness,
            admission,
            dispatcher,
            harness,
            sink,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    /// Monitor fed by the log tailer; embedding applications may feed it
    /// directly instead.
    pub fn readiness_monitor(&self) -> &Arc<ReadinessMonitor> {
        &self.readiness
    }

    pub fn readiness(&self) -> ReadinessState {
        self.readiness.current()
    }

    /// Capacity of every route, sorted by route.
    pub fn capacity(&self) -> Vec<(String, CapacitySnapshot)> {
        self.admission.snapshot()
    }

    pub fn route_stats(&self) -> BTreeMap<String, RouteStats> {
        self.sink.route_stats()
    }

    /// Admit `payload` on `route` and forward it to the model server.
    pub async fn handle(&self, route: &str, payload: Value) -> Result<Value> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("request", id = %request_id, route = %route);

        async move {
            let start = Instant::now();
            let token = match self.admission.try_admit(route, &payload).await {
                Ok(token) => token,
                Err(rejection) => {
                    self.sink.record(
                        route,
                        start.elapsed().as_secs_f64() * 1000.0,
                        rejection.kind(),
                    );
                    return Err(rejection.into());
                }
            };

            tracing::debug!(
                cost = token.cost(),
                waited_ms = token.waited().as_millis() as u64,
                "Request admitted"
            );

            self.dispatcher.dispatch(route, payload, token).await
        }
        .instrument(span)
        .await
    }

    /// Run the benchmark configured for `route`.
    pub async fn benchmark(&self, route: &str) -> Result<BenchmarkReport> {
        self.harness.run(route).await
    }

    /// Wait until the model is ready, failing on a model error or timeout.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        self.readiness.wait_until_ready(timeout).await
    }

    /// Start following the model log file.
    pub fn spawn_log_tail(&self) -> JoinHandle<()> {
        let tail = LogTail::new(
            &self.config.model_log.path,
            self.config.model_log.poll_interval(),
        );
        tracing::info!("Following model log {}", tail.path().display());
        tokio::spawn(tail.run(self.readiness.clone()))
    }

    /// When `benchmark.on_ready` is set, run every configured benchmark once
    /// the model first becomes ready.
    pub fn spawn_benchmark_on_ready(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.benchmark.on_ready {
            return None;
        }

        let worker = self.clone();
        Some(tokio::spawn(async move {
            let timeout = Duration::from_secs(worker.config.benchmark.ready_timeout_secs);
            if let Err(e) = worker.wait_until_ready(timeout).await {
                tracing::warn!("Skipping startup benchmarks: {}", e);
                return;
            }

            for route in worker.registry.benchmark_routes() {
                match worker.benchmark(&route).await {
                    Ok(report) => match serde_json::to_string(&report) {
                        Ok(json) => tracing::info!(route = %route, report = %json, "Startup benchmark"),
                        Err(e) => tracing::warn!("Failed to serialize benchmark report: {}", e),
                    },
                    Err(e) => tracing::warn!(route = %route, "Startup benchmark failed: {}", e),
                }
            }
        }))
    }
}
