//! JSON-lines protocol spoken with the Python bootstrap.
//!
//! Host → worker on stdin, worker → host on stdout, one object per line.

use serde::{Deserialize, Serialize};

use crate::job::StreamKind;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostRequest<'a> {
    Execute { id: &'a str, code: &'a str },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Ready,
    Write {
        #[serde(default)]
        id: Option<String>,
        stream: StreamKind,
        text: String,
    },
    Error {
        #[serde(default)]
        id: Option<String>,
        message: String,
    },
    Done {
        id: String,
        #[serde(default)]
        elapsed_ms: u64,
    },
}

impl HostRequest<'_> {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn execute_request_is_one_line() {
        let line = HostRequest::Execute {
            id: "exec_1",
            code: "print(1)\nprint(2)",
        }
        .to_line()
        .unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let v: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(v["type"], "execute");
        assert_eq!(v["code"], "print(1)\nprint(2)");
    }

    #[test]
    fn worker_messages_parse() {
        let msgs = [
            r#"{"type":"ready"}"#,
            r#"{"type":"write","id":"exec_1","stream":"stderr","text":"x"}"#,
            r#"{"type":"write","id":null,"stream":"stdout","text":"x"}"#,
            r#"{"type":"error","id":"exec_1","message":"NameError: x"}"#,
            r#"{"type":"done","id":"exec_1","elapsed_ms":12}"#,
        ];
        let parsed: Vec<WorkerMessage> = msgs
            .iter()
            .map(|m| serde_json::from_str(m).unwrap())
            .collect();
        assert_eq!(parsed[0], WorkerMessage::Ready);
        assert_eq!(
            parsed[1],
            WorkerMessage::Write {
                id: Some("exec_1".into()),
                stream: StreamKind::Stderr,
                text: "x".into()
            }
        );
        assert!(matches!(parsed[2], WorkerMessage::Write { id: None, .. }));
        assert!(matches!(parsed[4], WorkerMessage::Done { elapsed_ms: 12, .. }));
    }

    #[test]
    fn lone_surrogate_escapes_are_rejected() {
        let raw = r#"{"type":"write","id":"exec_1","stream":"stdout","text":"a\ud800"}"#;
        assert!(serde_json::from_str::<WorkerMessage>(raw).is_err());

        let escaped = r#"{"type":"write","id":"exec_1","stream":"stdout","text":"a\\ud800"}"#;
        let parsed: WorkerMessage = serde_json::from_str(escaped).unwrap();
        assert!(matches!(parsed, WorkerMessage::Write { ref text, .. } if text == "a\\ud800"));
    }
}
