//! Process supervision
//!
//! Runs the pool manager and the HTTP server side by side under one
//! cancellation token and gives both a bounded grace period to stop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::api::Server;
use crate::{Error, Orchestrator, Result};

/// Run until SIGINT or SIGTERM, or until either component exits.
pub async fn run(manager: Arc<Orchestrator>, server: Server, shutdown_timeout: Duration) -> Result<()> {
    run_until(manager, server, shutdown_timeout, shutdown_signal()).await
}

/// Run until `shutdown` resolves, or until either component exits.
pub async fn run_until(
    manager: Arc<Orchestrator>,
    server: Server,
    shutdown_timeout: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let token = CancellationToken::new();
    let mut tasks = JoinSet::new();

    tasks.spawn({
        let token = token.clone();
        async move { manager.run(token).await }
    });
    tasks.spawn(server.run(token.clone()));

    let mut errors = Vec::new();

    tokio::select! {
        _ = shutdown => tracing::info!("Shutdown signal received"),
        Some(joined) = tasks.join_next() => {
            tracing::warn!("Component stopped, shutting down");
            record(joined, &mut errors);
        }
    }

    token.cancel();

    let drained = tokio::time::timeout(shutdown_timeout, async {
        while let Some(joined) = tasks.join_next().await {
            record(joined, &mut errors);
        }
    })
    .await;

    if drained.is_err() {
        tracing::error!(timeout = ?shutdown_timeout, "Shutdown grace period elapsed");
        tasks.abort_all();
        return Err(Error::ShutdownTimeout);
    }

    tracing::info!("Shutdown complete");
    Error::combine(errors)
}

fn record(joined: std::result::Result<Result<()>, JoinError>, errors: &mut Vec<Error>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Component failed");
            errors.push(e);
        }
        Err(e) => {
            tracing::error!(error = %e, "Component panicked");
            errors.push(Error::Io(std::io::Error::other(e)));
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
