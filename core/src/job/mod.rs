mod id;
mod types;

pub use id::JobId;
pub use types::{
    resolve_line, ErrorDetail, InvalidTransition, Job, JobStatus, OutputLine, StreamKind,
    TerminalRecord, INITIALIZATION_ERROR, NOT_INITIALIZED, TIMEOUT_ERROR, WORKER_ERROR,
};
