use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::{Command, DispatchEvent, DispatchEventKind, Lifecycle};
use crate::config::DispatcherConfig;
use crate::error::InterpreterError;
use crate::fault::classify_fault;
use crate::interpreter::{Interpreter, InterpreterFactory, InterpreterSignal};
use crate::job::{ErrorDetail, Job, OutputLine, TerminalRecord};
use crate::relay::OutputRelay;

enum Outcome {
    Completed(Duration),
    Faulted(String),
    TimedOut,
    Broken(InterpreterError),
}

pub(super) struct DispatcherTask {
    cfg: DispatcherConfig,
    factory: Arc<dyn InterpreterFactory>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<DispatchEvent>,
    lifecycle: watch::Sender<Lifecycle>,
    interpreter: Option<Box<dyn Interpreter>>,
    queue: VecDeque<Job>,
    relay: OutputRelay,
    init_failures: u32,
    pending_delay: Option<Duration>,
    stopping: bool,
    cmd_closed: bool,
}

impl DispatcherTask {
    pub(super) fn new(
        cfg: DispatcherConfig,
        factory: Arc<dyn InterpreterFactory>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<DispatchEvent>,
        lifecycle: watch::Sender<Lifecycle>,
    ) -> Self {
        Self {
            cfg,
            factory,
            cmd_rx,
            events,
            lifecycle,
            interpreter: None,
            queue: VecDeque::new(),
            relay: OutputRelay::new(),
            init_failures: 0,
            pending_delay: None,
            stopping: false,
            cmd_closed: false,
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            if self.stopping {
                break;
            }
            if self.interpreter.is_none() {
                if self.cmd_closed && self.queue.is_empty() {
                    break;
                }
                self.initialize().await;
                continue;
            }
            if let Some(job) = self.queue.pop_front() {
                self.run_job(job).await;
                continue;
            }
            if self.cmd_closed {
                break;
            }
            match self.cmd_rx.recv().await {
                Some(cmd) => self.handle_command(cmd),
                None => self.cmd_closed = true,
            }
        }
        self.close_out().await;
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit(job) => {
                tracing::debug!(
                    target: "codebox.dispatcher",
                    job_id = %job.id,
                    queued = self.queue.len() + 1,
                    "job queued"
                );
                self.queue.push_back(job);
            }
            Command::Shutdown => {
                tracing::info!(target: "codebox.dispatcher", "shutdown requested");
                self.stopping = true;
            }
        }
    }

    fn on_command(&mut self, cmd: Option<Command>) {
        match cmd {
            Some(cmd) => self.handle_command(cmd),
            None => self.cmd_closed = true,
        }
    }

    /// Whether waiting for an interpreter still serves anybody.
    fn should_abandon_init(&self) -> bool {
        self.stopping || (self.cmd_closed && self.queue.is_empty())
    }

    async fn initialize(&mut self) {
        self.set_lifecycle(Lifecycle::Initializing);

        if let Some(delay) = self.pending_delay.take() {
            tracing::debug!(
                target: "codebox.dispatcher",
                delay_ms = delay.as_millis() as u64,
                attempt = self.init_failures + 1,
                "waiting before next interpreter start"
            );
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    cmd = self.cmd_rx.recv(), if !self.cmd_closed => {
                        self.on_command(cmd);
                        if self.should_abandon_init() {
                            return;
                        }
                    }
                }
            }
        }

        let factory = Arc::clone(&self.factory);
        let create = factory.create();
        tokio::pin!(create);
        let result = loop {
            tokio::select! {
                res = &mut create => break res,
                cmd = self.cmd_rx.recv(), if !self.cmd_closed => {
                    self.on_command(cmd);
                    if self.should_abandon_init() {
                        return;
                    }
                }
            }
        };

        match result {
            Ok(interpreter) => {
                tracing::info!(
                    target: "codebox.dispatcher",
                    interpreter = interpreter.name(),
                    after_failures = self.init_failures,
                    "interpreter ready"
                );
                self.interpreter = Some(interpreter);
                self.init_failures = 0;
                self.set_lifecycle(Lifecycle::Ready);
            }
            Err(e) => {
                tracing::error!(
                    target: "codebox.dispatcher",
                    error = %e,
                    failures = self.init_failures + 1,
                    "interpreter failed to start"
                );
                if let Some(job) = self.queue.pop_front() {
                    self.finish_job(job, TerminalRecord::Errored(ErrorDetail::initialization(&e)));
                }
                self.pending_delay = Some(self.cfg.reinit_delay(self.init_failures));
                self.init_failures = self.init_failures.saturating_add(1);
            }
        }
    }

    async fn run_job(&mut self, mut job: Job) {
        let Some(mut interpreter) = self.interpreter.take() else {
            self.finish_job(job, TerminalRecord::Errored(ErrorDetail::not_initialized()));
            return;
        };
        if let Err(e) = job.start() {
            tracing::error!(target: "codebox.dispatcher", job_id = %job.id, error = %e, "job cannot start");
            self.interpreter = Some(interpreter);
            return;
        }

        let id = job.id.clone();
        self.relay.open(id.clone());
        self.emit(DispatchEvent::new(id.clone(), DispatchEventKind::Started));
        tracing::info!(target: "codebox.dispatcher", job_id = %id, "job started");

        let started = Instant::now();
        let deadline = started + self.cfg.timeout();

        let outcome = match interpreter.execute(&id, &job.source_text).await {
            Err(e) => Outcome::Broken(e),
            Ok(()) => loop {
                tokio::select! {
                    biased;
                    _ = tokio::time::sleep_until(deadline) => break Outcome::TimedOut,
                    signal = interpreter.next_signal() => {
                        let past_deadline = Instant::now() >= deadline;
                        match signal {
                            Ok(InterpreterSignal::Write(write)) => {
                                if past_deadline {
                                    break Outcome::TimedOut;
                                }
                                for line in self.relay.accept(write) {
                                    self.emit_output(&mut job, line);
                                }
                            }
                            Ok(InterpreterSignal::Completed { job_id, reported_millis }) if job_id == id => {
                                if past_deadline {
                                    break Outcome::TimedOut;
                                }
                                tracing::trace!(target: "codebox.dispatcher", job_id = %id, reported_millis, "interpreter reported completion");
                                break Outcome::Completed(started.elapsed());
                            }
                            Ok(InterpreterSignal::Fault { job_id, raw_message }) if job_id == id => {
                                if past_deadline {
                                    break Outcome::TimedOut;
                                }
                                break Outcome::Faulted(raw_message);
                            }
                            Ok(other) => {
                                tracing::warn!(
                                    target: "codebox.dispatcher",
                                    active = %id,
                                    signal_job = ?other.job_id(),
                                    "ignoring signal for another job"
                                );
                            }
                            Err(e) => break Outcome::Broken(e),
                        }
                    }
                    cmd = self.cmd_rx.recv(), if !self.cmd_closed => self.on_command(cmd),
                }
            },
        };

        for line in self.relay.close() {
            self.emit_output(&mut job, line);
        }

        match outcome {
            Outcome::Completed(elapsed) => {
                let record = TerminalRecord::Completed {
                    elapsed_millis: elapsed.as_millis() as u64,
                };
                self.finish_job(job, record);
                self.interpreter = Some(interpreter);
            }
            Outcome::Faulted(raw) => {
                let class = classify_fault(&raw);
                let detail = ErrorDetail::runtime(class, raw, &job.source_text);
                self.finish_job(job, TerminalRecord::Errored(detail));
                self.discard(interpreter, "job raised").await;
            }
            Outcome::TimedOut => {
                self.finish_job(job, TerminalRecord::TimedOut(ErrorDetail::timeout(self.cfg.timeout_ms)));
                self.discard(interpreter, "job timed out").await;
            }
            Outcome::Broken(e) => {
                tracing::error!(target: "codebox.dispatcher", job_id = %id, error = %e, "interpreter channel failed");
                self.finish_job(job, TerminalRecord::Errored(ErrorDetail::worker(&e)));
                self.discard(interpreter, "interpreter channel failed").await;
            }
        }
    }

    async fn discard(&mut self, mut interpreter: Box<dyn Interpreter>, reason: &'static str) {
        tracing::warn!(
            target: "codebox.dispatcher",
            interpreter = interpreter.name(),
            reason,
            "discarding interpreter"
        );
        self.set_lifecycle(Lifecycle::Initializing);
        interpreter.terminate().await;
    }

    fn emit_output(&mut self, job: &mut Job, line: OutputLine) {
        if job.push_output(line.clone()) {
            self.emit(DispatchEvent::output(job.id.clone(), line));
        }
    }

    fn finish_job(&mut self, mut job: Job, record: TerminalRecord) {
        if let Err(e) = job.finish(&record) {
            tracing::error!(target: "codebox.dispatcher", job_id = %job.id, error = %e, "job already finished");
            return;
        }
        match record.error() {
            None => tracing::info!(
                target: "codebox.dispatcher",
                job_id = %job.id,
                status = ?record.status(),
                elapsed_ms = ?job.elapsed_millis,
                lines = job.output.len(),
                "job finished"
            ),
            Some(err) => tracing::info!(
                target: "codebox.dispatcher",
                job_id = %job.id,
                status = ?record.status(),
                error_type = %err.error_type,
                line_number = err.line_number,
                "job finished"
            ),
        }
        self.emit(DispatchEvent::finished(job.id, record));
    }

    fn emit(&self, event: DispatchEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(target: "codebox.dispatcher", "event receiver dropped");
        }
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        let changed = self.lifecycle.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            tracing::debug!(target: "codebox.dispatcher", lifecycle = %next, "lifecycle changed");
        }
    }

    async fn close_out(&mut self) {
        self.cmd_rx.close();
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            if let Command::Submit(job) = cmd {
                self.queue.push_back(job);
            }
        }
        let pending = std::mem::take(&mut self.queue);
        if !pending.is_empty() {
            tracing::warn!(target: "codebox.dispatcher", jobs = pending.len(), "closing queued jobs on shutdown");
        }
        for job in pending {
            self.finish_job(job, TerminalRecord::Errored(ErrorDetail::worker("dispatcher shut down")));
        }
        if let Some(mut interpreter) = self.interpreter.take() {
            interpreter.terminate().await;
        }
        self.set_lifecycle(Lifecycle::Stopped);
        tracing::info!(target: "codebox.dispatcher", "dispatcher stopped");
    }
}
