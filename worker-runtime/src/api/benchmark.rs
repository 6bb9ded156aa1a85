//! On-demand benchmark endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use worker_common::BenchmarkReport;

use crate::error::Result;
use crate::worker::Worker;

#[derive(Debug, Deserialize)]
pub struct BenchmarkRequest {
    pub route: String,
}

/// POST /benchmark - run the benchmark configured for a route.
pub async fn run_benchmark(
    State(worker): State<Arc<Worker>>,
    Json(request): Json<BenchmarkRequest>,
) -> Result<Json<BenchmarkReport>> {
    tracing::info!("Benchmark requested for {}", request.route);
    let report = worker.benchmark(&request.route).await?;
    Ok(Json(report))
}
