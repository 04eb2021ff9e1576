pub mod batch;
pub mod cli;
pub mod http_server;
pub mod run;

use codebox_core::api::TerminalRecord;

/// Exit status for a finished job: 0 completed, 124 timed out, 1 otherwise.
pub fn exit_code(record: &TerminalRecord) -> i32 {
    match record {
        TerminalRecord::Completed { .. } => 0,
        TerminalRecord::TimedOut(_) => 124,
        TerminalRecord::Errored(_) => 1,
    }
}

/// One-line human summary of a terminal record.
pub fn describe(record: &TerminalRecord) -> String {
    match record {
        TerminalRecord::Completed { elapsed_millis } => format!("completed in {elapsed_millis}ms"),
        TerminalRecord::Errored(e) | TerminalRecord::TimedOut(e) => {
            let headline = e.message.lines().last().unwrap_or_default();
            let mut out = format!("{} {}", status_label(record), e.error_type);
            if e.line_number > 0 {
                out.push_str(&format!(" at line {}", e.line_number));
                if !e.line_text.is_empty() {
                    out.push_str(&format!(" `{}`", e.line_text));
                }
            }
            if !headline.is_empty() {
                out.push_str(&format!(": {headline}"));
            }
            out
        }
    }
}

fn status_label(record: &TerminalRecord) -> &'static str {
    match record {
        TerminalRecord::Completed { .. } => "completed",
        TerminalRecord::Errored(_) => "errored",
        TerminalRecord::TimedOut(_) => "timed out",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebox_core::api::ErrorDetail;
    use pretty_assertions::assert_eq;

    #[test]
    fn exit_codes() {
        assert_eq!(exit_code(&TerminalRecord::Completed { elapsed_millis: 1 }), 0);
        assert_eq!(exit_code(&TerminalRecord::TimedOut(ErrorDetail::timeout(10_000))), 124);
        assert_eq!(exit_code(&TerminalRecord::Errored(ErrorDetail::worker("x"))), 1);
    }

    #[test]
    fn describes_runtime_fault() {
        let record = TerminalRecord::Errored(ErrorDetail {
            error_type: "NameError".into(),
            message: "Traceback (most recent call last):\nNameError: name 'x' is not defined".into(),
            line_number: 2,
            line_text: "print(x)".into(),
        });
        assert_eq!(
            describe(&record),
            "errored NameError at line 2 `print(x)`: NameError: name 'x' is not defined"
        );
        assert_eq!(
            describe(&TerminalRecord::Completed { elapsed_millis: 7 }),
            "completed in 7ms"
        );
    }
}
