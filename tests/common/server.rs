//! Test server management.
//!
//! Starts an in-process ipcd server on an ephemeral port for integration
//! testing.

use ipcd::config::Config;
use ipcd::network::{Server, ServerHandle};
use ipcd::protocol::Protocol;
use ipcd::registry::{ConnectionRegistry, LifecycleListener};
use std::net::SocketAddr;
use std::sync::Arc;

/// A running in-process test server.
pub struct TestServer {
    handle: ServerHandle,
    registry: Arc<ConnectionRegistry>,
}

impl TestServer {
    /// Start a server with the given protocols and a 1 second drain timeout.
    pub async fn start(protocols: Vec<Arc<dyn Protocol>>) -> anyhow::Result<Self> {
        Self::start_with(protocols, Vec::new(), 1000).await
    }

    /// Start a server with full control over listeners and drain timeout.
    pub async fn start_with(
        protocols: Vec<Arc<dyn Protocol>>,
        listeners: Vec<Arc<dyn LifecycleListener>>,
        shutdown_timeout_ms: u64,
    ) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(&format!(
            r#"
            [service]
            name = "ipcd-test"

            [listen]
            address = "127.0.0.1:0"

            [transport]
            max_frame_length = 65536

            [shutdown]
            timeout = {shutdown_timeout_ms}
            unit = "milliseconds"
        "#
        ))?;

        let registry = Arc::new(ConnectionRegistry::new(listeners));
        let handle = Server::start(&config, Arc::clone(&registry), protocols).await?;
        Ok(Self { handle, registry })
    }

    pub fn address(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn open_connections(&self) -> usize {
        self.handle.open_connections()
    }

    /// Drain and release the server.
    pub async fn shutdown(&self) -> bool {
        let drained = self.handle.stop().await;
        self.handle.dispose();
        drained
    }
}
