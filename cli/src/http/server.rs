//! HTTP server lifecycle.

use std::net::SocketAddr;

use axum::middleware;
use tokio::signal;

use crate::http::{
    middleware::{create_middleware_stack, create_trace_layer, request_logger},
    routes::create_router,
    AppState,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

/// Serves the API until Ctrl+C, SIGTERM or `POST /api/v1/shutdown`, then
/// stops the dispatcher.
pub async fn start_server(
    config: ServerConfig,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve(listener, state).await
}

pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(state.clone())
        .layer(middleware::from_fn(request_logger))
        .layer(create_trace_layer())
        .layer(create_middleware_stack());

    tracing::info!(
        target: "codebox.http",
        addr = %listener.local_addr()?,
        session_id = %state.session_id,
        "HTTP server listening"
    );

    let mut shutdown_rx = state.shutdown_tx.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    tracing::info!(target: "codebox.http", "received Ctrl+C");
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!(target: "codebox.http", "shutdown requested over HTTP");
                }
                _ = wait_for_sigterm() => {
                    tracing::info!(target: "codebox.http", "received SIGTERM");
                }
            }
        })
        .await?;

    state.dispatcher.shutdown();
    state.dispatcher.stopped().await;
    tracing::info!(target: "codebox.http", "server shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(target: "codebox.http", error = %e, "cannot listen for SIGTERM");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
