//! Engram Server
//!
//! HTTP surface for the adaptive memory engine: one route per engine
//! operation, principal scoping via header, request timeout and
//! concurrency limits at the edge, and the background learning scheduler
//! running alongside the listener.

mod config;
mod providers;
mod routes;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engram_core::{EmbeddingProvider, LearningScheduler, MemoryEngine, Store};

use crate::config::ServerConfig;
use crate::providers::{HttpClassifier, HttpEmbedder, HttpValidator};

#[derive(Debug, Parser)]
#[command(name = "engram-server", version, about = "Adaptive memory service for AI agents")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address override
    #[arg(long)]
    bind: Option<String>,

    /// Database path override
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_ref())?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(db) = args.db {
        config.db_path = Some(db);
    }

    init_logging(config.log_json);
    info!(version = engram_core::VERSION, "engram server starting");

    let store = Arc::new(Store::open(config.db_path.clone())?);
    info!("store ready");

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbedder::new(
        config.embedding.url.clone(),
        config.embedding.dimensions,
    ));

    let mut engine = MemoryEngine::new(store, embedder, config.engine.clone());
    if let Some(classifier) = &config.classifier {
        engine = engine.with_classifier(Arc::new(HttpClassifier::new(classifier.url.clone())));
        info!(url = %classifier.url, "auto-save classifier configured");
    }
    if let Some(validator) = &config.validator {
        engine = engine.with_validator(Arc::new(HttpValidator::new(validator.url.clone())));
        info!(url = %validator.url, "identity validator configured");
    }
    let engine = Arc::new(engine);

    let scheduler = LearningScheduler::spawn(Arc::clone(&engine));
    if scheduler.is_some() {
        info!(
            interval_hours = config.engine.scheduler.interval_hours,
            "background scheduler running"
        );
    }

    let timeout = Duration::from_secs(config.engine.upstream.request_timeout_seconds.max(1));
    let app = routes::router(Arc::clone(&engine))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrency))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!(bind = %config.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    info!("engram server stopped");
    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!(error = %e, "failed to listen for shutdown signal"),
    }
}
