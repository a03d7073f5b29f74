//! ipcd - connection-oriented IPC protocol server daemon.

use ipcd::config::Config;
use ipcd::network::Server;
use ipcd::protocol::{EchoProtocol, Protocol};
use ipcd::registry::{AuditListener, ConnectionRegistry};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ipcd.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    // The runtime is sized from configuration, so it is built by hand rather
    // than through the tokio::main macro.
    let workers = config.effective_workers();
    info!(
        service = %config.service.name,
        addr = %config.listen.address,
        workers,
        "Starting ipcd"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    // Lifecycle listeners and protocols are fixed for the server lifetime.
    let registry = Arc::new(ConnectionRegistry::new(vec![Arc::new(AuditListener)]));
    let protocols: Vec<Arc<dyn Protocol>> = vec![Arc::new(EchoProtocol)];

    let handle = Server::start(&config, Arc::clone(&registry), protocols).await?;

    {
        let registry = Arc::clone(&registry);
        let name = handle.service_name().to_string();
        handle.on_dispose(Box::new(move || {
            info!(service = %name, sessions = registry.len(), "Final session count");
            Ok(())
        }));
    }

    info!(
        service = %handle.service_name(),
        addr = %handle.local_addr(),
        "Server started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    handle.stop().await;
    handle.dispose();

    Ok(())
}
