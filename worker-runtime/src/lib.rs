//! Model worker runtime.
//!
//! Sits in front of a local model server: follows its log to decide whether
//! the model is ready, admits requests per route according to configured
//! capacity rules, forwards them, and runs synthetic benchmarks.

pub mod admission;
pub mod api;
pub mod benchmark;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod observability;
pub mod readiness;
pub mod routes;
pub mod worker;

pub use admission::{AdmissionController, AdmissionToken, Rejection};
pub use config::Config;
pub use dispatch::{Dispatcher, HttpBackend, ModelBackend};
pub use error::{Error, Result};
pub use observability::{NoopSink, ObservabilitySink, TracingSink};
pub use readiness::ReadinessMonitor;
pub use routes::{HandlerSpec, RouteRegistry};
pub use worker::Worker;
