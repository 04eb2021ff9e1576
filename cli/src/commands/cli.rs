use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Run Python snippets one at a time in a disposable interpreter")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file. Defaults to ./codebox.toml, then ~/.codebox/config.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Mirror every dispatch event as JSON lines to PATH (or `stdout:`).
    #[arg(long, global = true)]
    pub events_out: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Python file to run.
    #[arg(group = "input")]
    pub file: Option<PathBuf>,

    /// Inline source instead of a file.
    #[arg(long, group = "input")]
    pub code: Option<String>,

    /// Wall-clock limit for the job.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Ask the configured explainer about a failure.
    #[arg(long, default_value_t = false)]
    pub explain: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct BatchArgs {
    /// Files to submit, executed in the given order.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    /// Overrides `http_server.host`.
    #[arg(long)]
    pub host: Option<String>,

    /// Overrides `http_server.port`.
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub session_id: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run one snippet and stream its output.
    Run(RunArgs),
    /// Run several files back to back.
    Batch(BatchArgs),
    /// Serve the HTTP API.
    Serve(ServeArgs),
}

impl Commands {
    pub fn timeout_override(&self) -> Option<u64> {
        match self {
            Commands::Run(a) => a.timeout_ms,
            Commands::Batch(a) => a.timeout_ms,
            Commands::Serve(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_inline_code() {
        let args = Args::try_parse_from(["codebox", "run", "--code", "print(1)", "--timeout-ms", "500"])
            .unwrap();
        let Commands::Run(run) = &args.command else {
            panic!("expected run");
        };
        assert_eq!(run.code.as_deref(), Some("print(1)"));
        assert_eq!(args.command.timeout_override(), Some(500));
    }

    #[test]
    fn file_and_code_conflict() {
        assert!(Args::try_parse_from(["codebox", "run", "a.py", "--code", "x"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "codebox", "serve", "--port", "9000", "--events-out", "stdout:",
        ])
        .unwrap();
        assert_eq!(args.events_out.as_deref(), Some("stdout:"));
        assert!(matches!(args.command, Commands::Serve(ServeArgs { port: Some(9000), .. })));
    }
}
