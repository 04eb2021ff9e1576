//! `codebox serve`

use std::time::Duration;

use codebox_core::api::AppContext;
use codebox_plugins::Services;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::commands::cli::ServeArgs;
use crate::error::CliError;
use crate::http::{server, AppState};

const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn handle_serve(
    args: ServeArgs,
    ctx: &AppContext,
    services: &Services,
) -> Result<(), CliError> {
    let cfg = &ctx.cfg().http_server;
    let config = server::ServerConfig {
        host: args.host.unwrap_or_else(|| cfg.host.clone()),
        port: args.port.unwrap_or(cfg.port),
    };
    let session_id = args
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let (dispatcher, events) = ctx.start_dispatcher();
    let (shutdown_tx, _) = broadcast::channel(1);
    let state = AppState::new(
        session_id.clone(),
        dispatcher,
        services.clone(),
        cfg.retained_jobs,
        shutdown_tx,
    );
    let pump = state.spawn_event_pump(events, ctx.events_out());

    tracing::info!(
        target: "codebox.http",
        host = %config.host,
        port = config.port,
        session_id = %session_id,
        "starting HTTP server"
    );
    server::start_server(config, state)
        .await
        .map_err(|e| CliError::Server(e.to_string()))?;

    // the dispatcher has stopped, so the pump drains and exits
    match tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(target: "codebox.http", error = %e, "event pump panicked"),
        Err(_) => tracing::warn!(target: "codebox.http", "event pump did not drain in time"),
    }
    Ok(())
}
