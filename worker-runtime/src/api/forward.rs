//! Forwarding of configured model routes.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::worker::Worker;

/// POST <route> - admit the JSON body and forward it to the model server.
pub async fn forward(
    State(worker): State<Arc<Worker>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    match forward_json(&worker, uri.path(), &body).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn forward_json(worker: &Worker, route: &str, body: &[u8]) -> Result<Value> {
    // Unknown paths are rejected before looking at the body.
    if worker.registry().lookup(route).is_none() {
        return worker.handle(route, Value::Null).await;
    }

    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidRequest(format!("body is not valid JSON: {}", e)))?;
    if !payload.is_object() {
        return Err(Error::InvalidRequest("body must be a JSON object".to_string()));
    }

    worker.handle(route, payload).await
}
