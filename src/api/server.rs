//! HTTP server

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};
use crate::{Orchestrator, Result};

/// HTTP API Server
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    pub fn new(orchestrator: Arc<Orchestrator>, addr: SocketAddr) -> Self {
        let state: AppState = orchestrator;

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let router = Router::new()
            .route("/healthz", get(handlers::health))
            .route("/api/v1/execute/:kernel", post(handlers::execute))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(state);

        Self { router, addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind the configured address and serve until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener, token).await
    }

    /// Serve on an already bound listener until `token` is cancelled.
    pub async fn serve(self, listener: TcpListener, token: CancellationToken) -> Result<()> {
        tracing::info!("Starting API server on {}", listener.local_addr()?);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(token.cancelled_owned())
            .await?;

        tracing::info!("API server stopped");
        Ok(())
    }
}
