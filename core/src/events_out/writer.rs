use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::config::EventsOutConfig;
use crate::dispatcher::DispatchEvent;

/// `path` value that sends events to the process stdout.
pub const STDOUT_TARGET: &str = "stdout:";

const FLUSH_EVERY: usize = 10;

enum Msg {
    Line(String),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct EventsOutTx {
    tx: mpsc::Sender<Msg>,
    dropped: Arc<AtomicU64>,
    drop_when_full: bool,
}

impl EventsOutTx {
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn send_event(&self, event: &DispatchEvent) {
        match event.to_json_line() {
            Ok(line) => self.send_line(line).await,
            Err(e) => {
                tracing::warn!(target: "codebox.events_out", job_id = %event.job_id, error = %e, "failed to encode event");
            }
        }
    }

    pub async fn send_line(&self, line: String) {
        if self.drop_when_full {
            if self.tx.try_send(Msg::Line(line)).is_err() {
                let count = self.dropped.fetch_add(1, Ordering::Relaxed);
                if count % 100 == 0 {
                    tracing::warn!(
                        target: "codebox.events_out",
                        dropped_total = count + 1,
                        "events_out channel full, dropping events"
                    );
                }
            }
        } else if self.tx.send(Msg::Line(line)).await.is_err() {
            tracing::debug!(target: "codebox.events_out", "events_out writer closed");
        }
    }

    /// Waits until every line queued so far has been written and flushed.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Msg::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Opens the configured sink and spawns its writer task. Returns `Ok(None)`
/// when events_out is disabled.
pub async fn start_events_out(cfg: &EventsOutConfig) -> std::io::Result<Option<EventsOutTx>> {
    if !cfg.enabled {
        tracing::debug!(target: "codebox.events_out", "events_out disabled");
        return Ok(None);
    }
    let path = cfg.path.trim();
    if path.is_empty() {
        tracing::warn!(target: "codebox.events_out", "events_out enabled but path is empty, ignoring");
        return Ok(None);
    }

    let to_stdout = path == STDOUT_TARGET;
    let writer: Box<dyn AsyncWrite + Unpin + Send> = if to_stdout {
        Box::new(tokio::io::stdout())
    } else {
        let expanded = shellexpand::tilde(path).to_string();
        if let Some(parent) = std::path::Path::new(&expanded).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&expanded)
            .await?;
        Box::new(file)
    };

    tracing::info!(
        target: "codebox.events_out",
        path = %path,
        channel_capacity = cfg.channel_capacity,
        drop_when_full = cfg.drop_when_full,
        "events_out writer started"
    );

    let (tx, rx) = mpsc::channel::<Msg>(cfg.channel_capacity.max(1));
    tokio::spawn(write_loop(writer, rx, to_stdout));

    Ok(Some(EventsOutTx {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
        drop_when_full: cfg.drop_when_full,
    }))
}

async fn write_loop(
    mut writer: Box<dyn AsyncWrite + Unpin + Send>,
    mut rx: mpsc::Receiver<Msg>,
    flush_each: bool,
) {
    let mut written = 0usize;
    while let Some(msg) = rx.recv().await {
        let mut line = match msg {
            Msg::Line(line) => line,
            Msg::Flush(done) => {
                if let Err(e) = writer.flush().await {
                    tracing::warn!(target: "codebox.events_out", error = %e, "events_out flush failed");
                }
                let _ = done.send(());
                continue;
            }
        };
        if !line.ends_with('\n') {
            line.push('\n');
        }
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::error!(target: "codebox.events_out", error = %e, "events_out write failed, writer exiting");
            return;
        }
        written += 1;
        if flush_each || written % FLUSH_EVERY == 0 {
            if let Err(e) = writer.flush().await {
                tracing::error!(target: "codebox.events_out", error = %e, "events_out flush failed, writer exiting");
                return;
            }
        }
    }
    let _ = writer.flush().await;
    tracing::debug!(target: "codebox.events_out", written, "events_out writer finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobId, OutputLine, TerminalRecord};

    #[tokio::test]
    async fn disabled_sink_is_none() {
        let cfg = EventsOutConfig::default();
        assert!(start_events_out(&cfg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn events_land_in_file_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        let cfg = EventsOutConfig {
            enabled: true,
            path: path.display().to_string(),
            ..EventsOutConfig::default()
        };
        let tx = start_events_out(&cfg).await.unwrap().unwrap();
        let id = JobId::from("exec_1");
        tx.send_event(&DispatchEvent::output(id.clone(), OutputLine::stdout("1")))
            .await;
        tx.send_event(&DispatchEvent::finished(id, TerminalRecord::Completed { elapsed_millis: 3 }))
            .await;
        tx.flush().await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "output");
        assert_eq!(lines[1]["type"], "finished");
    }

    #[tokio::test]
    async fn full_channel_drops_when_configured() {
        let (tx, _rx) = mpsc::channel(1);
        let out = EventsOutTx {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            drop_when_full: true,
        };
        out.send_line("a".into()).await;
        out.send_line("b".into()).await;
        out.send_line("c".into()).await;
        assert_eq!(out.dropped_count(), 2);
    }
}
