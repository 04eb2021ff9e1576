//! Test helpers for codebox.
//!
//! [`ScriptedFactory`] builds fake interpreters that interpret each submitted
//! source as a tiny script, one command per line:
//!
//! | line                 | effect                                         |
//! |----------------------|------------------------------------------------|
//! | `print X` / `print(X)` | writes `X\n` to stdout                       |
//! | `eprint X`           | writes `X\n` to stderr                         |
//! | `write X`            | writes `X` to stdout (`\n` and `\t` unescaped) |
//! | `ewrite X`           | same, to stderr                                |
//! | `sleep MS`           | waits `MS` milliseconds                        |
//! | `hang`               | never finishes                                 |
//! | `raise T: msg @N`    | faults with a traceback pointing at line `N`   |
//! | `crash`              | the interpreter channel breaks                 |
//! | `stale X`            | writes `X\n` attributed to some other job      |
//!
//! Anything else is ignored. A script that runs out of commands completes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codebox_core::api::{
    DispatchEvent, DispatchEvents, Interpreter, InterpreterError, InterpreterFactory,
    InterpreterSignal, JobId, RawWrite, StreamKind, TerminalRecord,
};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Write(StreamKind, String),
    Stale(String),
    Sleep(u64),
    Hang,
    Raise(String),
    Crash,
}

fn unescape(s: &str) -> String {
    s.replace("\\n", "\n").replace("\\t", "\t")
}

fn parse_script(source: &str) -> VecDeque<Step> {
    let mut steps = VecDeque::new();
    for line in source.lines() {
        let line = line.trim();
        let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
        let step = match cmd {
            "print" => Step::Write(StreamKind::Stdout, format!("{arg}\n")),
            "eprint" => Step::Write(StreamKind::Stderr, format!("{arg}\n")),
            "write" => Step::Write(StreamKind::Stdout, unescape(arg)),
            "ewrite" => Step::Write(StreamKind::Stderr, unescape(arg)),
            "sleep" => Step::Sleep(arg.trim().parse().unwrap_or(0)),
            "hang" => Step::Hang,
            "raise" => Step::Raise(arg.to_string()),
            "crash" => Step::Crash,
            "stale" => Step::Stale(format!("{arg}\n")),
            _ => match line.strip_prefix("print(").and_then(|l| l.strip_suffix(')')) {
                Some(inner) => {
                    let inner = inner.trim_matches(|c| c == '"' || c == '\'');
                    Step::Write(StreamKind::Stdout, format!("{inner}\n"))
                }
                None => continue,
            },
        };
        steps.push_back(step);
    }
    steps
}

/// `raise NameError: name 'x' is not defined @3` → a Python-shaped traceback.
fn traceback(raise: &str) -> String {
    let (header, line) = match raise.rsplit_once(" @") {
        Some((h, n)) => (h, n.trim().parse::<u32>().ok()),
        None => (raise, None),
    };
    let mut tb = String::from("Traceback (most recent call last):\n");
    if let Some(n) = line {
        tb.push_str(&format!("  File \"<user_code>\", line {n}, in <module>\n"));
    }
    tb.push_str(header);
    tb.push('\n');
    tb
}

/// Shared counters across every interpreter a factory built.
#[derive(Debug, Default)]
pub struct FakeStats {
    created: AtomicUsize,
    failed_inits: AtomicUsize,
    terminated: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    executed: AtomicUsize,
}

impl FakeStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn failed_inits(&self) -> usize {
        self.failed_inits.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Highest number of jobs ever executing at the same time.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    fn job_started(&self) {
        self.executed.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
    }

    fn job_ended(&self) {
        let _ = self
            .running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

pub struct ScriptedFactory {
    stats: Arc<FakeStats>,
    fail_first: usize,
    init_delay: Duration,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(FakeStats::default()),
            fail_first: 0,
            init_delay: Duration::ZERO,
        }
    }

    /// The first `n` `create` calls fail with `InitFailed`.
    pub fn fail_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn stats(&self) -> Arc<FakeStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InterpreterFactory for ScriptedFactory {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create(&self) -> Result<Box<dyn Interpreter>, InterpreterError> {
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        let attempt = self.stats.created.load(Ordering::SeqCst)
            + self.stats.failed_inits.load(Ordering::SeqCst);
        if attempt < self.fail_first {
            self.stats.failed_inits.fetch_add(1, Ordering::SeqCst);
            return Err(InterpreterError::InitFailed(format!(
                "scripted init failure #{}",
                attempt + 1
            )));
        }
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedInterpreter {
            stats: Arc::clone(&self.stats),
            active: None,
            steps: VecDeque::new(),
            wake_at: None,
            terminated: false,
        }))
    }
}

pub struct ScriptedInterpreter {
    stats: Arc<FakeStats>,
    active: Option<JobId>,
    steps: VecDeque<Step>,
    wake_at: Option<Instant>,
    terminated: bool,
}

impl ScriptedInterpreter {
    fn end_job(&mut self) -> Option<JobId> {
        self.steps.clear();
        self.wake_at = None;
        let ended = self.active.take();
        if ended.is_some() {
            self.stats.job_ended();
        }
        ended
    }
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&mut self, job_id: &JobId, source: &str) -> Result<(), InterpreterError> {
        if self.terminated {
            return Err(InterpreterError::closed("sending job"));
        }
        self.stats.job_started();
        self.active = Some(job_id.clone());
        self.steps = parse_script(source);
        Ok(())
    }

    async fn next_signal(&mut self) -> Result<InterpreterSignal, InterpreterError> {
        let Some(job_id) = self.active.clone() else {
            return std::future::pending().await;
        };
        loop {
            let Some(step) = self.steps.front().cloned() else {
                self.end_job();
                return Ok(InterpreterSignal::Completed {
                    job_id,
                    reported_millis: 0,
                });
            };
            match step {
                Step::Sleep(ms) => {
                    let at = *self
                        .wake_at
                        .get_or_insert_with(|| Instant::now() + Duration::from_millis(ms));
                    tokio::time::sleep_until(at).await;
                    self.wake_at = None;
                    self.steps.pop_front();
                }
                Step::Hang => return std::future::pending().await,
                Step::Write(stream, text) => {
                    self.steps.pop_front();
                    return Ok(InterpreterSignal::Write(RawWrite {
                        job_id: Some(job_id),
                        stream,
                        text,
                    }));
                }
                Step::Stale(text) => {
                    self.steps.pop_front();
                    return Ok(InterpreterSignal::Write(RawWrite {
                        job_id: Some(JobId::from("exec_stale")),
                        stream: StreamKind::Stdout,
                        text,
                    }));
                }
                Step::Raise(raise) => {
                    self.end_job();
                    return Ok(InterpreterSignal::Fault {
                        job_id,
                        raw_message: traceback(&raise),
                    });
                }
                Step::Crash => {
                    self.end_job();
                    self.terminated = true;
                    return Err(InterpreterError::closed("reading output"));
                }
            }
        }
    }

    async fn terminate(&mut self) {
        self.end_job();
        self.terminated = true;
        self.stats.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reads events until `jobs` terminal records arrived, or the channel closed.
pub async fn collect_finished(events: &mut DispatchEvents, jobs: usize) -> Vec<DispatchEvent> {
    let mut out = Vec::new();
    let mut finished = 0;
    while finished < jobs {
        let Some(ev) = events.recv().await else {
            break;
        };
        if ev.is_terminal() {
            finished += 1;
        }
        out.push(ev);
    }
    out
}

/// Events of one job, in arrival order.
pub fn events_for<'a>(events: &'a [DispatchEvent], id: &JobId) -> Vec<&'a DispatchEvent> {
    events.iter().filter(|e| &e.job_id == id).collect()
}

/// The terminal record of `id`, if present.
pub fn record_for(events: &[DispatchEvent], id: &JobId) -> Option<TerminalRecord> {
    events.iter().find_map(|e| match &e.kind {
        codebox_core::api::DispatchEventKind::Finished { record } if &e.job_id == id => {
            Some(record.clone())
        }
        _ => None,
    })
}

/// Output lines of `id` as `(stream, text)` pairs.
pub fn output_for(events: &[DispatchEvent], id: &JobId) -> Vec<(StreamKind, String)> {
    events
        .iter()
        .filter(|e| &e.job_id == id)
        .filter_map(|e| match &e.kind {
            codebox_core::api::DispatchEventKind::Output { stream, text } => {
                Some((*stream, text.clone()))
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_script_commands() {
        let steps = parse_script("print hi\nprint(2)\nwrite a\\nb\nsleep 5\nnonsense\nraise E: m @2");
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0], Step::Write(StreamKind::Stdout, "hi\n".into()));
        assert_eq!(steps[1], Step::Write(StreamKind::Stdout, "2\n".into()));
        assert_eq!(steps[2], Step::Write(StreamKind::Stdout, "a\nb".into()));
        assert_eq!(steps[3], Step::Sleep(5));
    }

    #[test]
    fn traceback_points_at_user_line() {
        let tb = traceback("NameError: name 'x' is not defined @3");
        assert!(tb.contains("File \"<user_code>\", line 3"));
        assert!(tb.ends_with("NameError: name 'x' is not defined\n"));
    }
}
