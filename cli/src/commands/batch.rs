use std::collections::HashMap;
use std::io::Write;

use codebox_core::api::{AppContext, DispatchEventKind, DispatchEvents, Dispatcher, JobId, StreamKind, TerminalRecord};

use super::cli::BatchArgs;
use super::describe;
use crate::error::CliError;

pub async fn handle_batch(args: BatchArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let mut jobs = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CliError::ReadSource {
                path: path.display().to_string(),
                source,
            })?;
        jobs.push((path.display().to_string(), source));
    }

    let (dispatcher, mut events) = ctx.start_dispatcher();
    let results = run_batch(ctx, &dispatcher, &mut events, jobs, &mut std::io::stdout()).await;
    dispatcher.shutdown();
    dispatcher.stopped().await;
    let results = results?;

    let failed = results
        .iter()
        .filter(|(_, r)| !matches!(r, TerminalRecord::Completed { .. }))
        .count();
    tracing::info!(target: "codebox.cli", jobs = results.len(), failed, "batch finished");
    Ok(if failed == 0 { 0 } else { 1 })
}

/// Submits every `(label, source)` at once and prints their output, prefixed
/// with the label, followed by one summary line per job in submission order.
pub(crate) async fn run_batch<W: Write>(
    ctx: &AppContext,
    dispatcher: &Dispatcher,
    events: &mut DispatchEvents,
    jobs: Vec<(String, String)>,
    out: &mut W,
) -> Result<Vec<(String, TerminalRecord)>, CliError> {
    let mut order: Vec<(JobId, String)> = Vec::with_capacity(jobs.len());
    for (label, source) in jobs {
        let id = dispatcher.submit(source);
        order.push((id, label));
    }
    let labels: HashMap<JobId, String> = order.iter().cloned().collect();

    let mut records: HashMap<JobId, TerminalRecord> = HashMap::new();
    while records.len() < order.len() {
        let Some(event) = events.recv().await else {
            return Err(CliError::Command("dispatcher stopped before the batch finished".into()));
        };
        ctx.record_event(&event).await;
        let Some(label) = labels.get(&event.job_id) else {
            continue;
        };
        match event.kind {
            DispatchEventKind::Started => {}
            DispatchEventKind::Output { stream, text } => {
                let marker = match stream {
                    StreamKind::Stdout => "",
                    StreamKind::Stderr => "!",
                };
                let _ = writeln!(out, "[{label}]{marker} {text}");
            }
            DispatchEventKind::Finished { record } => {
                records.insert(event.job_id, record);
            }
        }
    }

    let mut results = Vec::with_capacity(order.len());
    for (id, label) in order {
        if let Some(record) = records.remove(&id) {
            let _ = writeln!(out, "{label}: {}", describe(&record));
            results.push((label, record));
        }
    }
    Ok(results)
}
