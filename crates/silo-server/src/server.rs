use std::sync::Arc;

use silo_store::Store;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::session::Session;

/// Silo repository server.
///
/// Owns its configuration and store; there is no process-global state. Each
/// accepted connection gets its own [`Session`] task.
pub struct Server {
    config: ServerConfig,
    store: Arc<dyn Store>,
}

impl Server {
    pub fn new(config: ServerConfig, store: Arc<dyn Store>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn serve(self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!("silo server listening on {}", self.config.bind_addr);
        self.serve_on(listener).await
    }

    /// Serve on an already-bound listener (useful for tests binding port 0).
    pub async fn serve_on(self, listener: TcpListener) -> ServerResult<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "connection accepted");
            let store = Arc::clone(&self.store);
            let lock_ttl = self.config.lock_ttl();
            tokio::spawn(async move {
                match Session::new(stream, store, lock_ttl).run().await {
                    Ok(()) => debug!(%peer, "session closed"),
                    Err(e) => warn!(%peer, "session failed: {e}"),
                }
            });
        }
    }
}
