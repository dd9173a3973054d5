//! HTTP surface: handoff commands and the provider webhook.

pub mod routes;
pub mod webhook;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::orchestrator::engine::AutomationEngine;
use crate::{AppError, Result};

/// Serve the HTTP surface until the token is cancelled.
///
/// # Errors
///
/// Returns `AppError::Http` if the server fails to bind or serve.
pub async fn serve(engine: Arc<AutomationEngine>, port: u16, cancel: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Http(format!("failed to bind {bind}: {err}")))?;
    info!(%bind, "http server listening");

    axum::serve(listener, routes::router(engine))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|err| AppError::Http(format!("server failed: {err}")))
}
