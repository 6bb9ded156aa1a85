//! Model worker - admission control and readiness tracking in front of a
//! local model server.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use worker_runtime::{api, Config, Worker};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    println!("model-worker {}", VERSION);
}

fn print_usage() {
    println!("Usage: model-worker [bench <route>] [--version]");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        print_version();
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().map_err(|e| {
        format!(
            "Failed to load configuration: {}. \
             Check config.toml and WORKER__SECTION__KEY environment variables.",
            e
        )
    })?;

    let worker = Arc::new(Worker::new(&config)?);
    let log_tail = worker.spawn_log_tail();

    match args.first().map(String::as_str) {
        Some("bench") => {
            let route = args.get(1).ok_or("bench requires a route, e.g. `model-worker bench /v1/completions`")?;
            let result = run_bench(&worker, &config, route).await;
            log_tail.abort();
            result
        }
        Some(other) => {
            print_usage();
            Err(format!("Unknown command: {}", other).into())
        }
        None => serve(worker, &config).await,
    }
}

async fn serve(worker: Arc<Worker>, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting model-worker {}", VERSION);

    if worker.spawn_benchmark_on_ready().is_some() {
        tracing::info!("Benchmarks will run once the model is ready");
    }

    let app = api::router(worker);

    let addr = format!("{}:{}", config.api.host, config.api.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_bench(worker: &Worker, config: &Config, route: &str) -> Result<(), Box<dyn std::error::Error>> {
    let timeout = Duration::from_secs(config.benchmark.ready_timeout_secs);
    tracing::info!("Waiting up to {:?} for the model to become ready", timeout);
    worker.wait_until_ready(timeout).await?;

    let report = worker.benchmark(route).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
