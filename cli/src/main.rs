use clap::Parser;

mod commands;
mod error;
mod http;
mod logging;

use codebox_core::api::AppContext;
use codebox_core::config;
use codebox_plugins::Services;
use commands::cli;
use error::CliError;

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let args = cli::Args::parse();

    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(path) = &args.events_out {
        cfg.events_out.enabled = true;
        cfg.events_out.path = path.clone();
    }
    if let Some(timeout_ms) = args.command.timeout_override() {
        cfg.dispatcher.timeout_ms = timeout_ms;
    }
    config::validate(&cfg)?;

    let guard = logging::init_tracing(&cfg.logging)?;
    let ctx = AppContext::new(cfg).await?;
    let services = Services::from_config(ctx.cfg())?;

    let exit = dispatch(args.command, &ctx, &services).await;
    ctx.flush_events_out().await;
    drop(guard);

    let code = exit?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn dispatch(cmd: cli::Commands, ctx: &AppContext, services: &Services) -> Result<i32, CliError> {
    match cmd {
        cli::Commands::Run(args) => commands::run::handle_run(args, ctx, services).await,
        cli::Commands::Batch(args) => commands::batch::handle_batch(args, ctx).await,
        cli::Commands::Serve(args) => {
            commands::http_server::handle_serve(args, ctx, services).await?;
            Ok(0)
        }
    }
}
