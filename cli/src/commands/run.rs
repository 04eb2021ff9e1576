use std::io::Write;

use codebox_core::api::{
    explain_or_fallback, AppContext, DispatchEventKind, DispatchEvents, ExplainRequest,
    Explanation, JobId, StreamKind, TerminalRecord,
};
use codebox_plugins::Services;

use super::cli::RunArgs;
use super::{describe, exit_code};
use crate::error::CliError;

pub async fn handle_run(args: RunArgs, ctx: &AppContext, services: &Services) -> Result<i32, CliError> {
    let source = read_source(&args).await?;
    let (dispatcher, mut events) = ctx.start_dispatcher();

    let id = dispatcher.submit(source.clone());
    let mut out = std::io::stdout();
    let mut err = std::io::stderr();
    let record = follow_job(ctx, &mut events, &id, &mut out, &mut err).await;

    dispatcher.shutdown();
    dispatcher.stopped().await;
    let record = record?;

    let _ = writeln!(err, "{}", describe(&record));
    if args.explain {
        if let Some(detail) = record.error() {
            match &services.explainer {
                Some(explainer) => {
                    let req = ExplainRequest::from_detail(source, detail);
                    let explanation = explain_or_fallback(explainer.as_ref(), &req).await;
                    print_explanation(&mut err, &explanation);
                }
                None => {
                    tracing::warn!(target: "codebox.cli", "--explain given but no explainer is configured");
                }
            }
        }
    }
    Ok(exit_code(&record))
}

async fn read_source(args: &RunArgs) -> Result<String, CliError> {
    if let Some(code) = &args.code {
        return Ok(code.clone());
    }
    let Some(path) = &args.file else {
        return Err(CliError::Command("pass a FILE or --code".into()));
    };
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CliError::ReadSource {
            path: path.display().to_string(),
            source,
        })
}

/// Streams `id`'s output lines to `out`/`err` until its terminal record
/// arrives. Events of other jobs are only mirrored to events_out.
pub(crate) async fn follow_job<O: Write, E: Write>(
    ctx: &AppContext,
    events: &mut DispatchEvents,
    id: &JobId,
    out: &mut O,
    err: &mut E,
) -> Result<TerminalRecord, CliError> {
    while let Some(event) = events.recv().await {
        ctx.record_event(&event).await;
        if &event.job_id != id {
            continue;
        }
        match event.kind {
            DispatchEventKind::Started => {
                tracing::debug!(target: "codebox.cli", job_id = %id, "job started");
            }
            DispatchEventKind::Output { stream, text } => {
                let res = match stream {
                    StreamKind::Stdout => writeln!(out, "{text}"),
                    StreamKind::Stderr => writeln!(err, "{text}"),
                };
                if let Err(e) = res {
                    tracing::warn!(target: "codebox.cli", error = %e, "failed to write job output");
                }
            }
            DispatchEventKind::Finished { record } => return Ok(record),
        }
    }
    Err(CliError::Command(format!(
        "dispatcher stopped before job {id} finished"
    )))
}

fn print_explanation<W: Write>(w: &mut W, explanation: &Explanation) {
    let _ = writeln!(w, "\n{}", explanation.friendly_message);
    let _ = writeln!(w, "fix: {}", explanation.fix_suggestion);
    if let Some(line) = &explanation.corrected_line {
        let _ = writeln!(w, "try: {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebox_core::api::AppConfig;
    use codebox_testkit::ScriptedFactory;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_follow_job_splits_streams() {
        let ctx = AppContext::new(AppConfig::default()).await.unwrap();
        let (dispatcher, mut events) = ctx.start_dispatcher_with(Arc::new(ScriptedFactory::new()));
        let id = dispatcher.submit("print out\neprint warn\nprint(2)");

        let mut out = Vec::new();
        let mut err = Vec::new();
        let record = follow_job(&ctx, &mut events, &id, &mut out, &mut err)
            .await
            .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "out\n2\n");
        assert_eq!(String::from_utf8(err).unwrap(), "warn\n");
        assert_eq!(exit_code(&record), 0);
    }

    #[tokio::test]
    async fn test_follow_job_reports_fault() {
        let ctx = AppContext::new(AppConfig::default()).await.unwrap();
        let (dispatcher, mut events) = ctx.start_dispatcher_with(Arc::new(ScriptedFactory::new()));
        let id = dispatcher.submit("raise ZeroDivisionError: division by zero @1");

        let record = follow_job(&ctx, &mut events, &id, &mut Vec::<u8>::new(), &mut Vec::<u8>::new())
            .await
            .unwrap();
        assert_eq!(exit_code(&record), 1);
        assert_eq!(record.error().unwrap().error_type, "ZeroDivisionError");
    }

    #[tokio::test]
    async fn test_read_source_prefers_inline_code() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("job.py");
        std::fs::write(&file, "print('file')").unwrap();

        let from_file = RunArgs {
            file: Some(file.clone()),
            code: None,
            timeout_ms: None,
            explain: false,
        };
        assert_eq!(read_source(&from_file).await.unwrap(), "print('file')");

        let inline = RunArgs {
            code: Some("print(1)".into()),
            ..from_file
        };
        assert_eq!(read_source(&inline).await.unwrap(), "print(1)");

        let missing = RunArgs {
            file: Some(dir.path().join("missing.py")),
            code: None,
            timeout_ms: None,
            explain: false,
        };
        assert!(matches!(
            read_source(&missing).await,
            Err(CliError::ReadSource { .. })
        ));
    }
}
