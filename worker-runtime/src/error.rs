//! Error types for the model worker.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use worker_common::{OutcomeKind, Readiness};

/// Error types for admission, dispatch, benchmarks and route setup.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Model is not ready (state: {0})")]
    NotReady(Readiness),

    #[error("Request waited {0:?} in queue without being admitted")]
    QueueTimeout(Duration),

    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error("Model server transport failure: {0}")]
    TransportFailure(String),

    #[error("Model server returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Route has no benchmark configured: {0}")]
    NoBenchmark(String),

    #[error("Duplicate route in handler configuration: {0}")]
    DuplicateRoute(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Outcome kind reported to the observability sink, when the error is a
    /// per-request outcome.
    pub fn outcome_kind(&self) -> Option<OutcomeKind> {
        match self {
            Error::NotReady(_) => Some(OutcomeKind::NotReady),
            Error::QueueTimeout(_) => Some(OutcomeKind::QueueTimeout),
            Error::UnknownRoute(_) => Some(OutcomeKind::UnknownRoute),
            Error::TransportFailure(_) => Some(OutcomeKind::TransportFailure),
            Error::Upstream { .. } => Some(OutcomeKind::UpstreamError),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::TransportFailure(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::NotReady(_) => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
            Error::QueueTimeout(_) => (StatusCode::TOO_MANY_REQUESTS, "queue_timeout"),
            Error::UnknownRoute(_) => (StatusCode::NOT_FOUND, "unknown_route"),
            Error::TransportFailure(_) => (StatusCode::BAD_GATEWAY, "transport_failure"),
            Error::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            Error::NoBenchmark(_) => (StatusCode::BAD_REQUEST, "no_benchmark"),
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Error::DuplicateRoute(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
