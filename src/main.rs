// gencache - probation-aware response cache for LLM generation calls
// Author: kelexine (https://github.com/kelexine)

use anyhow::Result;
use clap::Parser;
use gencache::cache::{store, CachedModel, ResponseCache};
use gencache::cli::Args;
use gencache::config::AppConfig;
use gencache::metrics::MetricsCollector;
use gencache::server::create_router;
use gencache::upstream::HttpModel;
use gencache::utils::logging;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Phase 1: Load configuration
    let config = match &args.config {
        Some(path) => AppConfig::load_from(path, true)?,
        None => AppConfig::load()?,
    };

    if args.check_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting gencache v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Backing store and metrics
    let kv = store::from_config(&config.store)?;
    if let Err(e) = kv.ping().await {
        // Requests are still served uncached until the store comes back
        warn!("{} store not reachable at startup: {}", kv.name(), e);
    }
    let metrics = Arc::new(MetricsCollector::new(config.cache.enable_metrics)?);
    let cache = Arc::new(ResponseCache::new(
        kv.clone(),
        config.cache.clone(),
        metrics,
    ));

    // Phase 4: Upstream model behind the cache
    let upstream = HttpModel::new(&config.upstream)?;
    info!("Upstream: {}", upstream.base_url());
    let model = CachedModel::new(upstream, cache);

    // Phase 5: Build and start HTTP server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let app = create_router(config, model);

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Phase 6: Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    kv.close().await;
    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
