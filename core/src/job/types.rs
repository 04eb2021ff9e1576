use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::JobId;
use crate::fault::FaultClass;

pub const INITIALIZATION_ERROR: &str = "InitializationError";
pub const NOT_INITIALIZED: &str = "NotInitialized";
pub const TIMEOUT_ERROR: &str = "TimeoutError";
pub const WORKER_ERROR: &str = "WorkerError";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stderr,
            text: text.into(),
        }
    }
}

/// Failure description attached to `errored` and `timed_out` jobs.
///
/// `line_number` is 1-based; 0 means unknown. `line_text` is empty whenever the
/// line could not be resolved against the submitted source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub error_type: String,
    pub message: String,
    pub line_number: u32,
    pub line_text: String,
}

impl ErrorDetail {
    fn without_line(error_type: &str, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.to_string(),
            message: message.into(),
            line_number: 0,
            line_text: String::new(),
        }
    }

    pub fn runtime(class: FaultClass, message: impl Into<String>, source: &str) -> Self {
        let line_text = resolve_line(source, class.line);
        Self {
            error_type: class.error_type,
            message: message.into(),
            line_number: class.line,
            line_text,
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::without_line(
            TIMEOUT_ERROR,
            format!("Execution took longer than {timeout_ms} ms. Is there an infinite loop?"),
        )
    }

    pub fn initialization(reason: impl fmt::Display) -> Self {
        Self::without_line(
            INITIALIZATION_ERROR,
            format!("The Python engine failed to start: {reason}"),
        )
    }

    pub fn not_initialized() -> Self {
        Self::without_line(
            NOT_INITIALIZED,
            "The Python engine is not ready yet. Wait a moment and retry.",
        )
    }

    pub fn worker(reason: impl fmt::Display) -> Self {
        Self::without_line(
            WORKER_ERROR,
            format!("Code execution ran into a problem, try again: {reason}"),
        )
    }
}

/// Returns the trimmed text of 1-based `line` in `source`, or an empty string
/// when the line is 0 or past the end of the source.
pub fn resolve_line(source: &str, line: u32) -> String {
    if line == 0 {
        return String::new();
    }
    source
        .lines()
        .nth(line as usize - 1)
        .map(|l| l.trim().to_string())
        .unwrap_or_default()
}

/// The single closing record of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TerminalRecord {
    Completed { elapsed_millis: u64 },
    Errored(ErrorDetail),
    TimedOut(ErrorDetail),
}

impl TerminalRecord {
    pub fn status(&self) -> JobStatus {
        match self {
            TerminalRecord::Completed { .. } => JobStatus::Completed,
            TerminalRecord::Errored(_) => JobStatus::Errored,
            TerminalRecord::TimedOut(_) => JobStatus::TimedOut,
        }
    }

    pub fn error(&self) -> Option<&ErrorDetail> {
        match self {
            TerminalRecord::Completed { .. } => None,
            TerminalRecord::Errored(d) | TerminalRecord::TimedOut(d) => Some(d),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Errored,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Errored | JobStatus::TimedOut
        )
    }

    fn can_become(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running) => true,
            // Initialization failures close a job that never ran.
            (JobStatus::Queued, JobStatus::Errored) => true,
            (JobStatus::Running, n) => n.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Errored => write!(f, "errored"),
            JobStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid job transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source_text: String,
    pub status: JobStatus,
    pub output: Vec<OutputLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_millis: Option<u64>,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, source_text: String) -> Self {
        Self {
            id,
            source_text,
            status: JobStatus::Queued,
            output: Vec::new(),
            error: None,
            elapsed_millis: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_become(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Appends a line while the job is running. Returns false (and drops the
    /// line) once the job is closed.
    pub fn push_output(&mut self, line: OutputLine) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.output.push(line);
        true
    }

    /// Closes the job. Fails if the job already reached a terminal status, so a
    /// job can only ever be finished once.
    pub fn finish(&mut self, record: &TerminalRecord) -> Result<(), InvalidTransition> {
        self.transition(record.status())?;
        match record {
            TerminalRecord::Completed { elapsed_millis } => {
                self.elapsed_millis = Some(*elapsed_millis);
            }
            TerminalRecord::Errored(detail) | TerminalRecord::TimedOut(detail) => {
                self.error = Some(detail.clone());
            }
        }
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Rebuilds the terminal record of a finished job.
    pub fn terminal_record(&self) -> Option<TerminalRecord> {
        match self.status {
            JobStatus::Completed => Some(TerminalRecord::Completed {
                elapsed_millis: self.elapsed_millis.unwrap_or_default(),
            }),
            JobStatus::Errored => self.error.clone().map(TerminalRecord::Errored),
            JobStatus::TimedOut => self.error.clone().map(TerminalRecord::TimedOut),
            _ => None,
        }
    }
}
