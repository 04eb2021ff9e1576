//! Single-job execution dispatcher.
//!
//! # Overview
//!
//! [`Dispatcher::start`] spawns one tokio task that owns the interpreter
//! instance, the FIFO queue and the active job. Callers hold a cheap, cloneable
//! [`Dispatcher`] handle and talk to the task over an unbounded channel, so
//! [`Dispatcher::submit`] never waits. Progress comes back on the
//! [`DispatchEvents`] receiver returned by `start`.
//!
//! # Job flow
//!
//! 1. `submit` assigns a [`JobId`] and queues the job.
//! 2. When an interpreter is ready and no job is active, the head of the queue
//!    runs: output lines stream out as [`DispatchEventKind::Output`].
//! 3. Exactly one of completion, fault or timeout closes the job with a
//!    [`DispatchEventKind::Finished`] record.
//! 4. On fault, timeout or a broken channel the interpreter is discarded and a
//!    new one is built before the next job starts.

mod events;
mod task;

pub use events::{DispatchEvent, DispatchEventKind};

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::config::DispatcherConfig;
use crate::interpreter::InterpreterFactory;
use crate::job::{ErrorDetail, Job, JobId, TerminalRecord};

pub type DispatchEvents = mpsc::UnboundedReceiver<DispatchEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Cold,
    Initializing,
    Ready,
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Cold => write!(f, "cold"),
            Lifecycle::Initializing => write!(f, "initializing"),
            Lifecycle::Ready => write!(f, "ready"),
            Lifecycle::Stopped => write!(f, "stopped"),
        }
    }
}

pub(crate) enum Command {
    Submit(Job),
    Shutdown,
}

#[derive(Clone)]
pub struct Dispatcher {
    cmd_tx: mpsc::UnboundedSender<Command>,
    event_tx: mpsc::UnboundedSender<DispatchEvent>,
    lifecycle: watch::Receiver<Lifecycle>,
}

impl Dispatcher {
    /// Spawns the dispatcher task on the current tokio runtime.
    pub fn start(
        cfg: DispatcherConfig,
        factory: Arc<dyn InterpreterFactory>,
    ) -> (Self, DispatchEvents) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (lifecycle_tx, lifecycle_rx) = watch::channel(Lifecycle::Cold);

        tracing::info!(
            target: "codebox.dispatcher",
            factory = factory.name(),
            timeout_ms = cfg.timeout_ms,
            "starting dispatcher"
        );

        let task = task::DispatcherTask::new(cfg, factory, cmd_rx, event_tx.clone(), lifecycle_tx);
        tokio::spawn(task.run());

        (
            Self {
                cmd_tx,
                event_tx,
                lifecycle: lifecycle_rx,
            },
            event_rx,
        )
    }

    /// Queues `source` for execution and returns its id immediately.
    ///
    /// If the dispatcher task has already stopped the job is closed right away
    /// with a `WorkerError` record, so the caller still sees exactly one
    /// terminal event for the returned id.
    pub fn submit(&self, source: impl Into<String>) -> JobId {
        let job = Job::new(JobId::generate(), source.into());
        let id = job.id.clone();
        tracing::debug!(target: "codebox.dispatcher", job_id = %id, "job submitted");

        if let Err(mpsc::error::SendError(cmd)) = self.cmd_tx.send(Command::Submit(job)) {
            if let Command::Submit(mut job) = cmd {
                tracing::error!(target: "codebox.dispatcher", job_id = %id, "dispatcher stopped, rejecting job");
                let record = TerminalRecord::Errored(ErrorDetail::worker("dispatcher is not running"));
                if job.finish(&record).is_ok() {
                    let _ = self.event_tx.send(DispatchEvent::finished(id.clone(), record));
                }
            }
        }
        id
    }

    /// Whether an interpreter is initialized right now. Advisory only.
    pub fn is_ready(&self) -> bool {
        *self.lifecycle.borrow() == Lifecycle::Ready
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Resolves once the dispatcher is ready. Returns false if it stopped
    /// first.
    pub async fn wait_ready(&self) -> bool {
        let mut rx = self.lifecycle.clone();
        let ready = match rx
            .wait_for(|l| matches!(l, Lifecycle::Ready | Lifecycle::Stopped))
            .await
        {
            Ok(l) => *l == Lifecycle::Ready,
            Err(_) => false,
        };
        ready
    }

    /// Asks the task to stop. A running job still finishes (bounded by its
    /// timeout); queued jobs are closed with `WorkerError`.
    pub fn shutdown(&self) {
        if self.cmd_tx.send(Command::Shutdown).is_err() {
            tracing::debug!(target: "codebox.dispatcher", "dispatcher already stopped");
        }
    }

    /// Resolves once the dispatcher task has fully stopped.
    pub async fn stopped(&self) {
        let mut rx = self.lifecycle.clone();
        let _ = rx.wait_for(|l| *l == Lifecycle::Stopped).await;
    }
}
