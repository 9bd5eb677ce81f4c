//! Server wiring for Pulse.
//!
//! Builds the configured engine, runs the presence sweeper and serves the
//! status endpoint until shutdown.

use crate::app::Application;
use crate::config::{Backend, Config, EngineSection};
use crate::metrics;
use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tenvis_pulse_engine::{Engine, LocalEngine, MemoryStore, SharedEngine};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// URL that selects the in-process shared store.
const MEMORY_STORE_URL: &str = "memory://";

/// Build the engine described by `section`.
///
/// # Errors
///
/// Returns an error if the shared store cannot be reached or was not compiled
/// in.
pub async fn build_engine(section: &EngineSection) -> Result<Arc<dyn Engine>> {
    let config = section.engine_config();
    let engine: Arc<dyn Engine> = match section.backend {
        Backend::Local => Arc::new(LocalEngine::with_config(config)),
        Backend::Shared if section.redis_url == MEMORY_STORE_URL => {
            Arc::new(SharedEngine::new(MemoryStore::new(), config))
        }
        Backend::Shared => connect_shared(&section.redis_url, config).await?,
    };
    Ok(engine)
}

#[cfg(feature = "redis")]
async fn connect_shared(
    url: &str,
    config: tenvis_pulse_engine::EngineConfig,
) -> Result<Arc<dyn Engine>> {
    let store = tenvis_pulse_engine::RedisStore::connect(url)
        .await
        .with_context(|| format!("Failed to connect to shared store at {url}"))?;
    Ok(Arc::new(SharedEngine::new(store, config)))
}

#[cfg(not(feature = "redis"))]
async fn connect_shared(
    url: &str,
    _config: tenvis_pulse_engine::EngineConfig,
) -> Result<Arc<dyn Engine>> {
    anyhow::bail!("Shared store {url} requires the `redis` feature")
}

/// Periodically evict expired presence entries.
pub fn spawn_sweeper(engine: Arc<dyn Engine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match engine.sweep().await {
                Ok(0) => {}
                Ok(removed) => {
                    debug!(removed, "Presence sweep");
                    metrics::record_swept(removed);
                }
                Err(e) => warn!(error = %e, "Presence sweep failed"),
            }
        }
    })
}

/// Run the server.
///
/// # Errors
///
/// Returns an error if the engine cannot be built or the server fails to
/// start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let engine = build_engine(&config.engine).await?;
    info!(backend = engine.name(), "Engine ready");

    let sweeper = spawn_sweeper(engine.clone(), config.engine.sweep_interval());
    let app = Arc::new(Application::new(engine, &config.namespaces));

    let router = Router::new()
        .route("/health", get(health_handler))
        .with_state(app);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Pulse server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Pulse server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(app): State<Arc<Application>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "engine": app.engine().name(),
        "clients": app.client_count(),
    }))
}
