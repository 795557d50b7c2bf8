//! Montage API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use montage_api::{create_router, metrics, ApiConfig, AppState};
use montage_store::{MemoryStatusStore, RedisStatusStore, StatusStore, StoreBackend, StoreConfig};
use montage_worker::{JobOrchestrator, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    if let Err(e) = run().await {
        error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

/// Colored output for dev, JSON for production.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "montage=info".parse::<Directive>() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    info!("Starting montage-api");

    let config = ApiConfig::from_env();
    let worker_config = WorkerConfig::from_env();
    let store_config = StoreConfig::from_env().with_record_ttl(worker_config.record_ttl());
    info!(?config, "API config");

    let record_ttl = store_config.record_ttl;
    let redis = match store_config.backend {
        StoreBackend::Redis => {
            let store = Arc::new(
                RedisStatusStore::new(store_config).context("invalid Redis configuration")?,
            );
            store.init().await.context("failed to connect to Redis")?;
            Some(store)
        }
        StoreBackend::Memory => {
            warn!("Using in-memory status store; task records will not survive a restart");
            None
        }
    };
    let store: Arc<dyn StatusStore> = match &redis {
        Some(redis) => Arc::clone(redis) as Arc<dyn StatusStore>,
        None => Arc::new(MemoryStatusStore::new(record_ttl)),
    };

    let orchestrator = JobOrchestrator::new(worker_config.clone(), store)
        .context("failed to create job orchestrator")?;

    let recovered = orchestrator.recover_orphans().await;
    if recovered > 0 {
        warn!(recovered, "Marked interrupted tasks as failed");
    }
    orchestrator.spawn_sweeper();

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid bind address")?;

    let state = AppState::new(config, orchestrator.clone());
    let app = create_router(state, metrics_handle);

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if !orchestrator.shutdown(worker_config.shutdown_timeout).await {
        warn!("Shutdown timeout reached with tasks still running");
    }
    if let Some(redis) = redis {
        redis.close().await;
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
