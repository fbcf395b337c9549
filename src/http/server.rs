//! HTTP server startup logic.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::sync::oneshot;

use crate::config::{AppConfig, ConfigError, SHUTDOWN_GRACE_SECS};

use super::shutdown;

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind server: {0}")]
    Bind(#[from] std::io::Error),

    #[error("Invalid listen address: {0}")]
    Address(#[from] ConfigError),
}

/// Start the HTTP server based on configuration.
///
/// This function blocks until a shutdown signal arrives and in-flight
/// requests have drained, or the grace period ran out.
pub async fn start_server(app: Router, config: &AppConfig) -> Result<(), ServerError> {
    let addr = config.http.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Starting HTTP server");

    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown::shutdown_signal().await;
        let _ = signalled_tx.send(());
    })
    .into_future();
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => return result.map_err(ServerError::from),
        _ = signalled_rx => {}
    }

    tracing::info!(
        grace_secs = SHUTDOWN_GRACE_SECS,
        "Graceful shutdown initiated, waiting for connections to close"
    );
    match tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), serve).await {
        Ok(result) => result?,
        Err(_) => tracing::warn!("Grace period elapsed with connections still open"),
    }
    Ok(())
}
