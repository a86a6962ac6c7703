//! Lock HTTP server

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use lockctl_core::config::Config;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::registry::{BleLocator, LockRegistry, Lookup};

pub struct LockServer {
    config: Config,
    listen_addr: SocketAddr,
}

impl LockServer {
    pub fn new(config: Config) -> Self {
        let listen_addr = config.server.listen_addr;
        Self { config, listen_addr }
    }

    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Locate every configured lock in the background and serve until
    /// Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let locator = BleLocator::new(self.config.timeouts.scan());
        let registry = Arc::new(LockRegistry::new(&self.config, locator));
        registry.locate_all();

        let state = AppState::new(&self.config, Arc::clone(&registry));
        let app = create_router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;
        info!("HTTP server listening on {}", self.listen_addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        for name in registry.names() {
            if let Lookup::Ready(managed) = registry.lookup(name) {
                managed.lock.disconnect().await;
            }
        }
        info!("server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
