//! WaveHub Server — Real-Time Channel Messaging Engine
//!
//! Main entry point that wires the engine and cluster crates together
//! and runs until a shutdown signal arrives.

use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use wavehub_cluster::{ClusterCoordinator, RedisClientFactory};
use wavehub_core::config::AppConfig;
use wavehub_core::error::AppError;
use wavehub_core::types::EndpointId;
use wavehub_engine::manager::ClientFactory;
use wavehub_engine::{LobbyEngine, ManagerFactory};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from file and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("WAVEHUB_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting WaveHub v{}", env!("CARGO_PKG_VERSION"));

    let endpoint_id = EndpointId::from(config.engine.endpoint_id.as_str());

    // ── Step 1: Cluster coordinator (distributed mode only) ──────
    let coordinator = if config.cluster.enabled {
        tracing::info!("Cluster mode enabled, starting coordinator...");
        let coordinator = ClusterCoordinator::start(config.cluster.clone()).await?;
        tracing::info!(instance = %coordinator.instance_id(), "Cluster coordinator started");
        Some(coordinator)
    } else {
        tracing::info!("Cluster mode disabled, channels run in-process");
        None
    };

    // ── Step 2: Lobby engine ─────────────────────────────────────
    let client_factory: Option<Arc<dyn ClientFactory>> = coordinator.as_ref().map(|coordinator| {
        Arc::new(RedisClientFactory::new(
            Arc::clone(coordinator),
            endpoint_id.clone(),
        )) as Arc<dyn ClientFactory>
    });
    let lobby = Arc::new(LobbyEngine::new(ManagerFactory::new(client_factory)));
    tracing::info!(endpoint = %endpoint_id, "Lobby engine ready");

    // ── Step 3: Graceful shutdown ────────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown...");

    for channel_id in lobby.channel_ids() {
        if let Err(e) = lobby.destroy_channel(&channel_id, "server_shutdown").await {
            tracing::warn!(channel = %channel_id, error = %e, "Channel teardown failed");
        }
    }

    if let Some(coordinator) = coordinator {
        coordinator.shutdown().await;
    }

    tracing::info!("WaveHub server shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
