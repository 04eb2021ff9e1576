//! Interpreter instances and the seam the dispatcher drives them through.
//!
//! An instance is created fully initialized by an [`InterpreterFactory`],
//! executes one job at a time and reports what happens as a stream of
//! [`InterpreterSignal`]s. Instances are disposable: the dispatcher calls
//! [`Interpreter::terminate`] and builds a new one whenever a job faults or
//! times out.

mod protocol;
mod python;

pub use protocol::{HostRequest, WorkerMessage};
pub use python::{PythonInterpreter, PythonInterpreterFactory, BOOTSTRAP};

use async_trait::async_trait;

use crate::error::InterpreterError;
use crate::job::JobId;
use crate::relay::RawWrite;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpreterSignal {
    /// A raw stdout/stderr write.
    Write(RawWrite),
    /// The script ran to the end.
    Completed { job_id: JobId, reported_millis: u64 },
    /// The script raised. `raw_message` is the formatted traceback.
    Fault { job_id: JobId, raw_message: String },
}

impl InterpreterSignal {
    /// Job the signal belongs to, if the interpreter attributed it to one.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            InterpreterSignal::Write(w) => w.job_id.as_ref(),
            InterpreterSignal::Completed { job_id, .. } | InterpreterSignal::Fault { job_id, .. } => {
                Some(job_id)
            }
        }
    }
}

#[async_trait]
pub trait Interpreter: Send {
    fn name(&self) -> &str;

    /// Hands `source` to the instance. Returns once the request is delivered;
    /// progress is observed through [`Interpreter::next_signal`].
    async fn execute(&mut self, job_id: &JobId, source: &str) -> Result<(), InterpreterError>;

    /// Next signal from the instance. Must be cancel safe: the dispatcher
    /// polls it inside `select!` against the job deadline.
    async fn next_signal(&mut self) -> Result<InterpreterSignal, InterpreterError>;

    /// Tears the instance down unconditionally. It is never used again.
    async fn terminate(&mut self);
}

#[async_trait]
pub trait InterpreterFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Builds a ready-to-use instance.
    async fn create(&self) -> Result<Box<dyn Interpreter>, InterpreterError>;
}
