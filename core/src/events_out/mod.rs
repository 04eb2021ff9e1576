//! Optional JSONL mirror of every dispatch event.

mod writer;

pub use crate::config::EventsOutConfig;
pub use writer::{start_events_out, EventsOutTx, STDOUT_TARGET};
