use codebox_core::api::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::error::CliError;

/// Installs the global subscriber. Logs go to stderr, or to a daily rolling
/// file when `logging.file` is set; stdout stays reserved for job output.
/// Keep the returned guard alive until exit so buffered lines get written.
pub fn init_tracing(cfg: &LoggingConfig) -> Result<Option<WorkerGuard>, CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .map_err(|e| CliError::Logging(format!("invalid log level `{}`: {e}", cfg.level)))?;

    if !cfg.file {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    }

    let dir = shellexpand::tilde(&cfg.directory).to_string();
    std::fs::create_dir_all(&dir)
        .map_err(|e| CliError::Logging(format!("cannot create log directory {dir}: {e}")))?;
    let appender = tracing_appender::rolling::daily(&dir, "codebox.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}
