use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, OutputLine, StreamKind, TerminalRecord};

/// One entry of the per-job event stream.
///
/// For every job the stream carries an optional `Started`, zero or more
/// `Output` events in emission order, and exactly one `Finished` last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub job_id: JobId,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: DispatchEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEventKind {
    Started,
    Output { stream: StreamKind, text: String },
    Finished { record: TerminalRecord },
}

impl DispatchEvent {
    pub fn new(job_id: JobId, kind: DispatchEventKind) -> Self {
        Self {
            job_id,
            ts: Utc::now(),
            kind,
        }
    }

    pub fn output(job_id: JobId, line: OutputLine) -> Self {
        Self::new(
            job_id,
            DispatchEventKind::Output {
                stream: line.stream,
                text: line.text,
            },
        )
    }

    pub fn finished(job_id: JobId, record: TerminalRecord) -> Self {
        Self::new(job_id, DispatchEventKind::Finished { record })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, DispatchEventKind::Finished { .. })
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_flatten_into_one_json_object() {
        let id = JobId::from("exec_1");
        let ev = DispatchEvent::output(id.clone(), OutputLine::stdout("hi"));
        let v: serde_json::Value = serde_json::from_str(&ev.to_json_line().unwrap()).unwrap();
        assert_eq!(v["job_id"], "exec_1");
        assert_eq!(v["type"], "output");
        assert_eq!(v["stream"], "stdout");
        assert_eq!(v["text"], "hi");

        let fin = DispatchEvent::finished(id, TerminalRecord::Completed { elapsed_millis: 5 });
        let v = serde_json::to_value(&fin).unwrap();
        assert_eq!(v["type"], "finished");
        assert_eq!(v["record"]["status"], "completed");
        assert!(fin.is_terminal());
    }
}
