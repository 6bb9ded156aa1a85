//! Route registry and handler specifications.
//!
//! Each configured route maps to a [`HandlerSpec`] describing how requests to
//! it are admitted and, optionally, how to benchmark it. The registry is built
//! once at startup and never mutated afterwards, so lookups need no locking.

mod generator;
mod workload;

pub use generator::{random_text, BenchmarkGenerator, PayloadGenerator};
pub use workload::{WorkloadCalculator, WorkloadStrategy};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{Error, Result};

const DEFAULT_MAX_QUEUE_TIME: Duration = Duration::from_secs(60);

/// Synthetic load settings for a route.
#[derive(Debug, Clone)]
pub struct BenchmarkSpec {
    pub generator: BenchmarkGenerator,
    /// Total number of runs across all workers.
    pub runs: usize,
    /// Number of concurrent workers (capped at `runs`).
    pub concurrency: usize,
}

/// How requests to a single route are handled.
#[derive(Debug, Clone)]
pub struct HandlerSpec {
    route: String,
    allow_parallel: bool,
    max_queue_time: Duration,
    workload: WorkloadCalculator,
    benchmark: Option<BenchmarkSpec>,
}

impl HandlerSpec {
    /// A parallel route with a 60s queue limit and `max_tokens` as its cost.
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            allow_parallel: true,
            max_queue_time: DEFAULT_MAX_QUEUE_TIME,
            workload: WorkloadCalculator::default(),
            benchmark: None,
        }
    }

    pub fn with_parallel(mut self, allow_parallel: bool) -> Self {
        self.allow_parallel = allow_parallel;
        self
    }

    pub fn with_max_queue_time(mut self, max_queue_time: Duration) -> Self {
        self.max_queue_time = max_queue_time;
        self
    }

    pub fn with_workload(mut self, workload: WorkloadCalculator) -> Self {
        self.workload = workload;
        self
    }

    pub fn with_benchmark(mut self, benchmark: BenchmarkSpec) -> Self {
        self.benchmark = Some(benchmark);
        self
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn is_parallel(&self) -> bool {
        self.allow_parallel
    }

    pub fn max_queue_time(&self) -> Duration {
        self.max_queue_time
    }

    pub fn workload(&self) -> &WorkloadCalculator {
        &self.workload
    }

    /// Workload cost of a payload on this route (always >= 0).
    pub fn cost(&self, payload: &Value) -> f64 {
        self.workload.cost(payload)
    }

    pub fn benchmark_spec(&self) -> Option<&BenchmarkSpec> {
        self.benchmark.as_ref()
    }
}

/// Immutable registry of all configured routes.
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    handlers: HashMap<String, Arc<HandlerSpec>>,
    /// Routes in configuration order.
    order: Vec<String>,
}

impl RouteRegistry {
    /// Build the registry, failing if two handlers declare the same route.
    pub fn new(specs: impl IntoIterator<Item = HandlerSpec>) -> Result<Self> {
        let mut handlers = HashMap::new();
        let mut order = Vec::new();

        for spec in specs {
            let route = spec.route.clone();
            if handlers.contains_key(&route) {
                return Err(Error::DuplicateRoute(route));
            }
            order.push(route.clone());
            handlers.insert(route, Arc::new(spec));
        }

        Ok(Self { handlers, order })
    }

    pub fn lookup(&self, route: &str) -> Option<Arc<HandlerSpec>> {
        self.handlers.get(route).cloned()
    }

    /// All handlers, in configuration order.
    pub fn routes(&self) -> impl Iterator<Item = &Arc<HandlerSpec>> + '_ {
        self.order.iter().filter_map(|route| self.handlers.get(route))
    }

    /// Routes that declare a benchmark generator.
    pub fn benchmark_routes(&self) -> Vec<String> {
        self.routes()
            .filter(|spec| spec.benchmark_spec().is_some())
            .map(|spec| spec.route().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
