//! Proxy Supervisor - Entry point.

use anyhow::{Context, Result};
use frpc_client::FrpcConnector;
use proxy_supervisor::{
    api::{create_router, AppState},
    config::Config,
    registry::{ProxyRegistry, Store},
    supervisor::Supervisor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Proxy Supervisor");

    // Initialize storage
    let store = if config.store.persist {
        Store::file(config.store.dir.clone())
    } else {
        info!("Persistence disabled, using in-memory storage");
        Store::memory()
    };
    let registry = Arc::new(ProxyRegistry::new(store));

    tokio::fs::create_dir_all(&config.frpc.work_dir)
        .await
        .with_context(|| format!("Failed to create work dir {:?}", config.frpc.work_dir))?;

    let connector = FrpcConnector::new(config.frpc.binary.clone(), config.frpc.work_dir.clone())
        .with_admin_timeout(config.supervisor.status_timeout);

    let supervisor = Supervisor::new(
        registry,
        Arc::new(connector),
        config.supervisor_settings(),
    );

    // Nothing runs yet, so stored runtime status is stale
    match supervisor.reset_runtime_status().await {
        Ok(reset) => info!(
            proxies = supervisor.registry().count().await.unwrap_or_default(),
            reset,
            "Loaded proxy registry"
        ),
        Err(e) => warn!("Failed to reset proxy runtime status: {}", e),
    }

    let app = create_router(AppState::new(supervisor.clone()));

    // Bind to address
    let addr = SocketAddr::new(
        config
            .server
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address {}", config.server.listen_addr))?,
        config.server.port,
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on {}", addr);

    // Run server
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if supervisor.target().await.is_some() {
        if let Err(e) = supervisor.disconnect().await {
            warn!("Failed to close tunnel session: {}", e);
        }
    }

    info!("Proxy Supervisor stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
