//! Output relay: raw interpreter writes in, ordered line events out.
//!
//! Writes arrive as arbitrary text chunks tagged with the stream they were
//! written to and the job that was active inside the interpreter at the time.
//! The relay keeps at most one partial line per stream and hands back every
//! completed, non-blank line in the order it completed.

use crate::job::{JobId, OutputLine, StreamKind};

/// A single `write()` observed inside the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWrite {
    pub job_id: Option<JobId>,
    pub stream: StreamKind,
    pub text: String,
}

#[derive(Debug, Default)]
struct PartialLine {
    text: String,
    /// Write sequence number that started the pending text.
    since: u64,
}

#[derive(Debug, Default)]
pub struct OutputRelay {
    active: Option<JobId>,
    stdout: PartialLine,
    stderr: PartialLine,
    seq: u64,
    dropped_writes: u64,
}

impl OutputRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes subsequent writes to `job_id`. Anything still buffered for a
    /// previous job is discarded.
    pub fn open(&mut self, job_id: JobId) {
        self.stdout = PartialLine::default();
        self.stderr = PartialLine::default();
        self.active = Some(job_id);
    }

    pub fn active(&self) -> Option<&JobId> {
        self.active.as_ref()
    }

    pub fn dropped_writes(&self) -> u64 {
        self.dropped_writes
    }

    pub fn accept(&mut self, write: RawWrite) -> Vec<OutputLine> {
        let matches_active = match (&self.active, &write.job_id) {
            (Some(active), Some(id)) => active == id,
            _ => false,
        };
        if !matches_active {
            self.dropped_writes += 1;
            tracing::trace!(
                target: "codebox.relay",
                write_job = ?write.job_id,
                active_job = ?self.active,
                "dropping write for inactive job"
            );
            return Vec::new();
        }

        self.seq += 1;
        let seq = self.seq;
        let stream = write.stream;
        let partial = match stream {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        };
        if partial.text.is_empty() {
            partial.since = seq;
        }
        partial.text.push_str(&write.text);

        let mut lines = Vec::new();
        let mut split = false;
        while let Some(pos) = partial.text.find('\n') {
            let raw: String = partial.text.drain(..=pos).collect();
            split = true;
            if let Some(line) = finish_line(stream, &raw) {
                lines.push(line);
            }
        }
        if split {
            // whatever is left began inside this write
            partial.since = seq;
        }
        lines
    }

    /// Flushes pending partial lines and detaches the relay from the active
    /// job. Partial lines are ordered by the write that started them, since
    /// they never completed. Later writes for that job are dropped.
    pub fn close(&mut self) -> Vec<OutputLine> {
        let out = std::mem::take(&mut self.stdout);
        let err = std::mem::take(&mut self.stderr);
        self.active = None;

        let mut pending = vec![(StreamKind::Stdout, out), (StreamKind::Stderr, err)];
        pending.retain(|(_, p)| !p.text.is_empty());
        pending.sort_by_key(|(_, p)| p.since);
        pending
            .into_iter()
            .filter_map(|(stream, p)| finish_line(stream, &p.text))
            .collect()
    }
}

fn finish_line(stream: StreamKind, raw: &str) -> Option<OutputLine> {
    let text = raw.trim_end();
    if text.trim().is_empty() {
        return None;
    }
    Some(OutputLine {
        stream,
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(id: &JobId, stream: StreamKind, text: &str) -> RawWrite {
        RawWrite {
            job_id: Some(id.clone()),
            stream,
            text: text.to_string(),
        }
    }

    fn relay_for(id: &JobId) -> OutputRelay {
        let mut relay = OutputRelay::new();
        relay.open(id.clone());
        relay
    }

    #[test]
    fn print_style_writes_become_lines_in_order() {
        let id = JobId::generate();
        let mut relay = relay_for(&id);
        let mut lines = Vec::new();
        for n in ["1", "2", "3"] {
            lines.extend(relay.accept(write(&id, StreamKind::Stdout, n)));
            lines.extend(relay.accept(write(&id, StreamKind::Stdout, "\n")));
        }
        assert_eq!(
            lines,
            vec![
                OutputLine::stdout("1"),
                OutputLine::stdout("2"),
                OutputLine::stdout("3")
            ]
        );
    }

    #[test]
    fn whitespace_only_lines_are_suppressed() {
        let id = JobId::generate();
        let mut relay = relay_for(&id);
        assert!(relay.accept(write(&id, StreamKind::Stdout, "\n")).is_empty());
        assert!(relay.accept(write(&id, StreamKind::Stdout, "   ")).is_empty());
        assert!(relay.accept(write(&id, StreamKind::Stdout, "\n")).is_empty());
        assert!(relay.accept(write(&id, StreamKind::Stderr, "\t\r\n")).is_empty());
        assert!(relay.close().is_empty());
    }

    #[test]
    fn multi_line_chunk_splits_and_trims_trailing_whitespace() {
        let id = JobId::generate();
        let mut relay = relay_for(&id);
        let lines = relay.accept(write(&id, StreamKind::Stdout, "  a  \r\nb\n\nc"));
        assert_eq!(lines, vec![OutputLine::stdout("  a"), OutputLine::stdout("b")]);
        assert_eq!(relay.close(), vec![OutputLine::stdout("c")]);
    }

    #[test]
    fn streams_are_tagged_and_interleaved_by_completion() {
        let id = JobId::generate();
        let mut relay = relay_for(&id);
        let mut lines = relay.accept(write(&id, StreamKind::Stdout, "out"));
        lines.extend(relay.accept(write(&id, StreamKind::Stderr, "err\n")));
        lines.extend(relay.accept(write(&id, StreamKind::Stdout, "\n")));
        assert_eq!(
            lines,
            vec![OutputLine::stderr("err"), OutputLine::stdout("out")]
        );
    }

    #[test]
    fn close_flushes_partials_oldest_first() {
        let id = JobId::generate();
        let mut relay = relay_for(&id);
        relay.accept(write(&id, StreamKind::Stderr, "first"));
        relay.accept(write(&id, StreamKind::Stdout, "second"));
        assert_eq!(
            relay.close(),
            vec![OutputLine::stderr("first"), OutputLine::stdout("second")]
        );
    }

    #[test]
    fn writes_for_other_jobs_are_dropped() {
        let old = JobId::generate();
        let current = JobId::generate();
        let mut relay = relay_for(&current);
        assert!(relay.accept(write(&old, StreamKind::Stdout, "stale\n")).is_empty());
        assert!(relay
            .accept(RawWrite {
                job_id: None,
                stream: StreamKind::Stdout,
                text: "orphan\n".into(),
            })
            .is_empty());
        assert_eq!(relay.dropped_writes(), 2);
        assert_eq!(
            relay.accept(write(&current, StreamKind::Stdout, "ok\n")),
            vec![OutputLine::stdout("ok")]
        );
    }

    #[test]
    fn nothing_is_accepted_after_close() {
        let id = JobId::generate();
        let mut relay = relay_for(&id);
        relay.close();
        assert!(relay.active().is_none());
        assert!(relay.accept(write(&id, StreamKind::Stdout, "late\n")).is_empty());
    }
}
