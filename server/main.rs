/// ferrite-food classification server
///
/// Loads the trained model once and serves it over a synchronous tiny_http
/// server, one thread per request.
///
/// Run with:
///   cargo run --bin serve --release -- pipeline.json
///
/// Endpoints:
///   POST /predict: image upload (raw image/* or multipart), returns
///                   {"class": .., "confidence": ..}
///   GET  /health : service status
///   POST /reload : re-read the model artifacts from disk

mod routes;

use std::sync::Arc;

use anyhow::Context;
use tiny_http::Server;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ferrite_food::inference::InferenceService;
use ferrite_food::PipelineConfig;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::load(&path).with_context(|| format!("loading configuration {}", path))?,
        None => PipelineConfig::default(),
    };

    let service = Arc::new(InferenceService::start(
        config.artifacts.clone(),
        config.service.fallback_classes.clone(),
    ));

    let addr = config.service.bind.as_str();
    let server = Server::http(addr).map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;
    info!(addr, status = ?service.status(), "listening");

    // Each request runs on its own thread; the service is shared read-only
    // apart from the atomic context swap on reload.
    for request in server.incoming_requests() {
        let service = Arc::clone(&service);
        std::thread::spawn(move || {
            routes::dispatch(request, service);
        });
    }
    Ok(())
}
