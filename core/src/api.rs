//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `codebox_core::api` instead of reaching into internal modules.

pub use crate::config::{
    AppConfig, DispatcherConfig, EventsOutConfig, ExplainerConfig, HttpServerConfig,
    InterpreterConfig, LoggingConfig,
};
pub use crate::context::AppContext;
pub use crate::dispatcher::{DispatchEvent, DispatchEventKind, DispatchEvents, Dispatcher, Lifecycle};
pub use crate::error::{ConfigError, ExplainError, InterpreterError};
pub use crate::events_out::EventsOutTx;
pub use crate::explain::{
    explain_or_fallback, parse_explanation, ErrorExplainer, ExplainRequest, Explanation,
    FaultSummary,
};
pub use crate::fault::{classify_fault, FaultClass};
pub use crate::interpreter::{Interpreter, InterpreterFactory, InterpreterSignal, PythonInterpreterFactory};
pub use crate::job::{
    ErrorDetail, Job, JobId, JobStatus, OutputLine, StreamKind, TerminalRecord,
};
pub use crate::ledger::JobLedger;
pub use crate::relay::RawWrite;
