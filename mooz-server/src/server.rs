use crate::config::ServerConfig;
use crate::relay::MemoryRelay;
use crate::signaling::router;
use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// A bound, not yet running relay server.
pub struct RelayServer {
    listener: TcpListener,
    app: Router,
    relay: MemoryRelay,
}

impl RelayServer {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.addr)
            .await
            .with_context(|| format!("Failed to bind relay on {}", config.addr))?;

        let relay = MemoryRelay::new();

        // Browser clients are served from other origins.
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = router(relay.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http());

        Ok(Self {
            listener,
            app,
            relay,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The store behind this server, for in-process clients.
    pub fn relay(&self) -> MemoryRelay {
        self.relay.clone()
    }

    pub async fn run(self) -> Result<()> {
        info!("Relay listening on http://{}", self.local_addr()?);
        axum::serve(self.listener, self.app)
            .await
            .context("Relay server stopped")?;
        Ok(())
    }
}

pub async fn serve(config: ServerConfig) -> Result<()> {
    RelayServer::bind(config).await?.run().await
}
