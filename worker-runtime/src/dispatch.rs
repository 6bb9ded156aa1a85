//! Forwarding admitted requests to the model server.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use worker_common::OutcomeKind;

use crate::admission::AdmissionToken;
use crate::config::{ModelServerConfig, PayloadDefaults};
use crate::error::{Error, Result};
use crate::observability::ObservabilitySink;

/// Something that can execute a request against the model.
///
/// The default implementation is [`HttpBackend`]; tests and embedding
/// applications can provide their own.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send `payload` to `route` and return the response body.
    async fn forward(&self, route: &str, payload: &Value) -> Result<Value>;
}

/// Talks to the model server over HTTP.
pub struct HttpBackend {
    http_client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &ModelServerConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ModelBackend for HttpBackend {
    async fn forward(&self, route: &str, payload: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, route);
        tracing::debug!("Forwarding request to model server: {}", url);

        let response = self.http_client.post(&url).json(payload).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream { status, body });
        }

        Ok(response.json().await?)
    }
}

/// Runs admitted requests against a [`ModelBackend`].
pub struct Dispatcher {
    backend: Arc<dyn ModelBackend>,
    sink: Arc<dyn ObservabilitySink>,
    defaults: PayloadDefaults,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        sink: Arc<dyn ObservabilitySink>,
        defaults: PayloadDefaults,
    ) -> Self {
        Self {
            backend,
            sink,
            defaults,
        }
    }

    /// Forward one admitted request. The token is released when the model
    /// call finishes, whatever its outcome. Failures are returned, not retried.
    pub async fn dispatch(&self, route: &str, payload: Value, token: AdmissionToken) -> Result<Value> {
        let payload = self.fill_defaults(payload);
        let start = Instant::now();

        let result = self.backend.forward(route, &payload).await;
        token.release();

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let outcome = match &result {
            Ok(_) => OutcomeKind::Success,
            Err(e) => e.outcome_kind().unwrap_or(OutcomeKind::TransportFailure),
        };
        self.sink.record(route, latency_ms, outcome);

        result
    }

    fn fill_defaults(&self, mut payload: Value) -> Value {
        if let (Some(model), Some(object)) = (&self.defaults.model, payload.as_object_mut()) {
            object
                .entry("model")
                .or_insert_with(|| Value::String(model.clone()));
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionController;
    use crate::config::LogActionConfig;
    use crate::observability::TracingSink;
    use crate::readiness::{LogRules, ReadinessMonitor};
    use crate::routes::{HandlerSpec, RouteRegistry};
    use serde_json::json;
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Backend that echoes payloads and remembers them.
    #[derive(Default)]
    struct EchoBackend {
        seen: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl ModelBackend for EchoBackend {
        async fn forward(&self, _route: &str, payload: &Value) -> Result<Value> {
            self.seen.lock().unwrap().push(payload.clone());
            Ok(json!({"echo": payload}))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl ModelBackend for FailingBackend {
        async fn forward(&self, _route: &str, _payload: &Value) -> Result<Value> {
            Err(Error::TransportFailure("connection refused".to_string()))
        }
    }

    fn ready_controller() -> AdmissionController {
        let registry = RouteRegistry::new([HandlerSpec::new("/generate").with_parallel(false)]).unwrap();
        let monitor = Arc::new(ReadinessMonitor::new(
            LogRules::from_config(&LogActionConfig::default()),
            Arc::new(crate::observability::NoopSink),
        ));
        monitor.observe("Application startup complete.");
        AdmissionController::new(&registry, monitor)
    }

    fn server_config(server: &MockServer) -> ModelServerConfig {
        let address = server.address();
        ModelServerConfig {
            url: format!("http://{}", address.ip()),
            port: address.port(),
            request_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_dispatch_fills_model_and_releases() {
        let controller = ready_controller();
        let backend = Arc::new(EchoBackend::default());
        let sink = Arc::new(TracingSink::new());
        let dispatcher = Dispatcher::new(
            backend.clone(),
            sink.clone(),
            PayloadDefaults {
                model: Some("llama".to_string()),
            },
        );

        let payload = json!({"prompt": "hi", "max_tokens": 4});
        let token = controller.try_admit("/generate", &payload).await.unwrap();
        let response = dispatcher.dispatch("/generate", payload, token).await.unwrap();

        assert_eq!(response["echo"]["model"], "llama");
        assert_eq!(controller.capacity("/generate").unwrap().in_flight, 0);

        let stats = sink.stats();
        assert_eq!(stats["/generate"].count(OutcomeKind::Success), 1);
    }

    #[tokio::test]
    async fn test_dispatch_keeps_explicit_model() {
        let controller = ready_controller();
        let backend = Arc::new(EchoBackend::default());
        let dispatcher = Dispatcher::new(
            backend.clone(),
            Arc::new(crate::observability::NoopSink),
            PayloadDefaults {
                model: Some("llama".to_string()),
            },
        );

        let payload = json!({"model": "mistral"});
        let token = controller.try_admit("/generate", &payload).await.unwrap();
        dispatcher.dispatch("/generate", payload, token).await.unwrap();

        assert_eq!(backend.seen.lock().unwrap()[0]["model"], "mistral");
    }

    #[tokio::test]
    async fn test_dispatch_failure_releases_and_records() {
        let controller = ready_controller();
        let sink = Arc::new(TracingSink::new());
        let dispatcher = Dispatcher::new(Arc::new(FailingBackend), sink.clone(), PayloadDefaults::default());

        let token = controller.try_admit("/generate", &json!({})).await.unwrap();
        let result = dispatcher.dispatch("/generate", json!({}), token).await;

        assert!(matches!(result, Err(Error::TransportFailure(_))));
        assert_eq!(controller.capacity("/generate").unwrap().in_flight, 0);
        assert_eq!(
            sink.stats()["/generate"].count(OutcomeKind::TransportFailure),
            1
        );

        // The route is free again for the next caller
        let token = controller.try_admit("/generate", &json!({})).await.unwrap();
        token.release();
    }

    #[tokio::test]
    async fn test_http_backend_forwards_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/completions"))
            .and(body_json(json!({"model": "m", "prompt": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": [{"text": "world"}]})))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&server_config(&server)).unwrap();
        let response = backend
            .forward("/v1/completions", &json!({"model": "m", "prompt": "hello"}))
            .await
            .unwrap();

        assert_eq!(response["choices"][0]["text"], "world");
    }

    #[tokio::test]
    async fn test_http_backend_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("CUDA error"))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&server_config(&server)).unwrap();
        let result = backend.forward("/generate", &json!({})).await;

        match result {
            Err(Error::Upstream { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "CUDA error");
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[test]
    fn test_http_backend_base_url_includes_port() {
        let backend = HttpBackend::new(&ModelServerConfig {
            url: "http://127.0.0.1/".to_string(),
            port: 18000,
            request_timeout_secs: 1,
        })
        .unwrap();
        assert_eq!(backend.base_url(), "http://127.0.0.1:18000");
    }

    #[tokio::test]
    async fn test_http_backend_transport_failure() {
        let backend = HttpBackend::new(&ModelServerConfig {
            url: "http://127.0.0.1".to_string(),
            // Nothing listens on the discard port
            port: 9,
            request_timeout_secs: 1,
        })
        .unwrap();

        let result = backend.forward("/generate", &json!({})).await;
        assert!(matches!(result, Err(Error::TransportFailure(_))));
    }
}
