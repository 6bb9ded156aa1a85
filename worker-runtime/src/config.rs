//! Configuration for the model worker.

use std::time::Duration;

use config::{Config as ConfigLoader, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use config::builder::DefaultState;
use serde::Deserialize;

use crate::routes::{BenchmarkGenerator, BenchmarkSpec, HandlerSpec, WorkloadCalculator};

/// Main configuration structure for the worker.
///
/// Built once at startup and passed by reference into [`crate::Worker::new`].
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub model_server: ModelServerConfig,
    #[serde(default)]
    pub model_log: ModelLogConfig,
    #[serde(default)]
    pub log_actions: LogActionConfig,
    #[serde(default)]
    pub defaults: PayloadDefaults,
    #[serde(default)]
    pub benchmark: BenchmarkRunConfig,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where the model server listens.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelServerConfig {
    #[serde(default = "default_model_server_url")]
    pub url: String,
    #[serde(default = "default_model_server_port")]
    pub port: u16,
    /// Transport timeout for a single forwarded request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl ModelServerConfig {
    /// Base URL without a trailing slash, e.g. `http://127.0.0.1:18000`.
    pub fn base_url(&self) -> String {
        format!("{}:{}", self.url.trim_end_matches('/'), self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ModelServerConfig {
    fn default() -> Self {
        Self {
            url: default_model_server_url(),
            port: default_model_server_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Log file written by the model server.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelLogConfig {
    #[serde(default = "default_model_log_path")]
    pub path: String,
    /// How often to look for new lines once the end of the file is reached.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl ModelLogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ModelLogConfig {
    fn default() -> Self {
        Self {
            path: default_model_log_path(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

/// Substring patterns used to classify model log lines.
#[derive(Debug, Clone, Deserialize)]
pub struct LogActionConfig {
    /// Lines that mean the model finished loading.
    #[serde(default = "default_on_load")]
    pub on_load: Vec<String>,
    /// Lines that mean the model process failed.
    #[serde(default = "default_on_error")]
    pub on_error: Vec<String>,
    /// Lines worth forwarding to our own log.
    #[serde(default = "default_on_info")]
    pub on_info: Vec<String>,
}

impl Default for LogActionConfig {
    fn default() -> Self {
        Self {
            on_load: default_on_load(),
            on_error: default_on_error(),
            on_info: default_on_info(),
        }
    }
}

/// Values filled into payloads when the caller leaves them out.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PayloadDefaults {
    /// Model identifier, usually taken from the `MODEL_NAME` environment variable.
    #[serde(default)]
    pub model: Option<String>,
}

impl PayloadDefaults {
    /// Model name used by benchmark generators.
    pub fn model_or_fallback(&self) -> &str {
        self.model.as_deref().unwrap_or(FALLBACK_MODEL)
    }
}

const FALLBACK_MODEL: &str = "test-model";

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkRunConfig {
    /// Run every configured benchmark once the model first becomes ready.
    #[serde(default)]
    pub on_ready: bool,
    /// How long `model-worker bench` and the `on_ready` startup benchmarks
    /// wait for readiness before giving up.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

impl Default for BenchmarkRunConfig {
    fn default() -> Self {
        Self {
            on_ready: false,
            ready_timeout_secs: default_ready_timeout(),
        }
    }
}

/// One `[[handlers]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerConfig {
    pub route: String,
    #[serde(default = "default_true")]
    pub allow_parallel: bool,
    /// Longest time a request may wait for admission, in seconds.
    #[serde(default = "default_max_queue_time")]
    pub max_queue_time_secs: f64,
    #[serde(default)]
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub benchmark: Option<BenchmarkConfig>,
}

/// Built-in workload strategies that can be expressed in a config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkloadConfig {
    Constant {
        value: f64,
    },
    Field {
        field: String,
        #[serde(default)]
        default: f64,
    },
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        WorkloadConfig::Field {
            field: "max_tokens".to_string(),
            default: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkConfig {
    pub generator: GeneratorConfig,
    #[serde(default = "default_benchmark_runs")]
    pub runs: usize,
    #[serde(default = "default_benchmark_concurrency")]
    pub concurrency: usize,
}

/// Built-in benchmark payload generators.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneratorConfig {
    Completions {
        #[serde(default = "default_completion_words")]
        words: usize,
        #[serde(default = "default_benchmark_max_tokens")]
        max_tokens: u32,
        #[serde(default = "default_temperature")]
        temperature: f64,
    },
    Chat {
        #[serde(default = "default_chat_words")]
        words: usize,
        #[serde(default = "default_benchmark_max_tokens")]
        max_tokens: u32,
        #[serde(default = "default_temperature")]
        temperature: f64,
    },
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_model_server_url() -> String {
    "http://127.0.0.1".to_string()
}
fn default_model_server_port() -> u16 {
    18000
}
fn default_request_timeout() -> u64 {
    300
}
fn default_model_log_path() -> String {
    "/var/log/model/server.log".to_string()
}
fn default_poll_interval() -> u64 {
    100
}
fn default_on_load() -> Vec<String> {
    vec![
        "Application startup complete.".to_string(),
        "Model loaded successfully".to_string(),
    ]
}
fn default_on_error() -> Vec<String> {
    vec![
        "INFO exited:".to_string(),
        "RuntimeError: Engine".to_string(),
        "Traceback (most recent call last):".to_string(),
        "ERROR:".to_string(),
    ]
}
fn default_on_info() -> Vec<String> {
    vec![r#""message":"Download"#.to_string(), "INFO:".to_string()]
}
fn default_ready_timeout() -> u64 {
    1800
}
fn default_true() -> bool {
    true
}
fn default_max_queue_time() -> f64 {
    60.0
}
fn default_benchmark_runs() -> usize {
    8
}
fn default_benchmark_concurrency() -> usize {
    10
}
fn default_completion_words() -> usize {
    250
}
fn default_chat_words() -> usize {
    200
}
fn default_benchmark_max_tokens() -> u32 {
    500
}
fn default_temperature() -> f64 {
    0.7
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (WORKER__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. `MODEL_NAME` for `defaults.model`
    /// 4. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("WORKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parse configuration from a TOML document on top of the built-in defaults.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let mut builder = ConfigLoader::builder()
            .set_default("api.host", default_host())?
            .set_default("api.port", default_port() as i64)?;
        if let Ok(model) = std::env::var("MODEL_NAME") {
            builder = builder.set_default("defaults.model", model)?;
        }
        Ok(builder)
    }

    /// Turn the `[[handlers]]` entries into immutable handler specs.
    pub fn handler_specs(&self) -> Vec<HandlerSpec> {
        self.handlers
            .iter()
            .map(|handler| handler.to_spec(&self.defaults))
            .collect()
    }
}

impl HandlerConfig {
    fn to_spec(&self, defaults: &PayloadDefaults) -> HandlerSpec {
        let workload = match &self.workload {
            WorkloadConfig::Constant { value } => WorkloadCalculator::Constant(*value),
            WorkloadConfig::Field { field, default } => WorkloadCalculator::Field {
                field: field.clone(),
                default: *default,
            },
        };

        // Negative and NaN clamp to zero; values too large for a Duration wait forever.
        let secs = self.max_queue_time_secs.max(0.0);
        let max_queue_time = Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
            Duration::MAX
        } else {
            Duration::ZERO
        });

        let mut spec = HandlerSpec::new(&self.route)
            .with_parallel(self.allow_parallel)
            .with_max_queue_time(max_queue_time)
            .with_workload(workload);

        if let Some(ref benchmark) = self.benchmark {
            let model = defaults.model_or_fallback().to_string();
            let generator = match benchmark.generator {
                GeneratorConfig::Completions {
                    words,
                    max_tokens,
                    temperature,
                } => BenchmarkGenerator::Completions {
                    model,
                    words,
                    max_tokens,
                    temperature,
                },
                GeneratorConfig::Chat {
                    words,
                    max_tokens,
                    temperature,
                } => BenchmarkGenerator::Chat {
                    model,
                    words,
                    max_tokens,
                    temperature,
                },
            };
            spec = spec.with_benchmark(BenchmarkSpec {
                generator,
                runs: benchmark.runs,
                concurrency: benchmark.concurrency,
            });
        }

        spec
    }
}
