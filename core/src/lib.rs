//! Sandboxed single-job Python execution.
//!
//! The [`dispatcher::Dispatcher`] accepts source submissions, runs them one at a
//! time against a disposable [`interpreter::Interpreter`], enforces a wall-clock
//! timeout and streams ordered output events back to the caller. Faulted or
//! timed-out interpreters are thrown away and rebuilt before the next job.

pub mod api;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod events_out;
pub mod explain;
pub mod fault;
pub mod interpreter;
pub mod job;
pub mod ledger;
pub mod relay;
