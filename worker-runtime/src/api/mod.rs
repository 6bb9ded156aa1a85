//! HTTP front for the worker.

pub mod benchmark;
pub mod forward;
pub mod health;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::logging::request_logger;
use crate::worker::Worker;

/// Build the worker router.
///
/// `/health` and `/benchmark` are served by the worker itself; every other
/// path is treated as a model route and forwarded.
pub fn router(worker: Arc<Worker>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/benchmark", post(benchmark::run_benchmark))
        .fallback(forward::forward)
        .layer(middleware::from_fn(request_logger))
        .layer(CorsLayer::permissive())
        .with_state(worker)
}
