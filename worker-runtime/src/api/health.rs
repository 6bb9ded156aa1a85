//! Health check endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use worker_common::{CapacitySnapshot, ReadinessState};

use crate::observability::RouteStats;
use crate::worker::Worker;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub readiness: ReadinessState,
    pub routes: BTreeMap<String, RouteHealth>,
}

#[derive(Debug, Serialize)]
pub struct RouteHealth {
    pub capacity: CapacitySnapshot,
    pub stats: RouteStats,
}

/// GET /health - readiness, capacity and outcome counters.
///
/// Returns 200 only while the model is ready, so load balancers can use it
/// directly.
pub async fn health(State(worker): State<Arc<Worker>>) -> (StatusCode, Json<HealthResponse>) {
    let readiness = worker.readiness();
    let mut stats = worker.route_stats();

    let routes = worker
        .capacity()
        .into_iter()
        .map(|(route, capacity)| {
            let stats = stats.remove(&route).unwrap_or_default();
            (route, RouteHealth { capacity, stats })
        })
        .collect();

    let status = if readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(HealthResponse { readiness, routes }))
}
