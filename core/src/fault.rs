//! Classification of raw interpreter fault messages.
//!
//! Python reports failures as formatted tracebacks. Everything that pattern
//! matches on that text lives here so the rest of the crate only sees a
//! [`FaultClass`].

use lazy_static::lazy_static;
use regex::Regex;

/// Filename the interpreter compiles submitted source under.
pub const USER_CODE_FILENAME: &str = "<user_code>";

const FALLBACK_ERROR_TYPE: &str = "PythonError";

lazy_static! {
    static ref USER_FRAME: Regex =
        Regex::new(r#"File "<user_code>", line (\d+)"#).expect("user frame regex");
    static ref ANY_LINE: Regex = Regex::new(r"\bline (\d+)").expect("line regex");
    static ref QUALIFIED_HEADER: Regex =
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*):(?:\s|$)").expect("header regex");
    static ref BARE_HEADER: Regex = Regex::new(
        r"^([A-Za-z_][A-Za-z0-9_.]*(?:Error|Exception|Interrupt|Exit|Warning|Iteration))$"
    )
    .expect("bare header regex");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultClass {
    pub error_type: String,
    /// 1-based line in the submitted source, 0 when unknown.
    pub line: u32,
}

pub fn classify_fault(raw_message: &str) -> FaultClass {
    FaultClass {
        error_type: error_type_of(raw_message).unwrap_or_else(|| FALLBACK_ERROR_TYPE.to_string()),
        line: line_of(raw_message),
    }
}

/// The exception header is the last unindented `Name: message` (or bare
/// `NameError`) line of the traceback.
fn error_type_of(raw: &str) -> Option<String> {
    raw.lines()
        .rev()
        .filter(|l| !l.trim().is_empty() && !l.starts_with(char::is_whitespace))
        .find_map(|l| {
            let l = l.trim_end();
            QUALIFIED_HEADER
                .captures(l)
                .or_else(|| BARE_HEADER.captures(l))
                .map(|c| c[1].to_string())
        })
        .map(|name| match name.rsplit_once('.') {
            Some((_, short)) => short.to_string(),
            None => name,
        })
}

/// Deepest frame in the submitted source wins; otherwise the first `line N`
/// mentioned anywhere.
fn line_of(raw: &str) -> u32 {
    let from_user_frame = USER_FRAME
        .captures_iter(raw)
        .last()
        .and_then(|c| c[1].parse().ok());
    from_user_frame
        .or_else(|| ANY_LINE.captures(raw).and_then(|c| c[1].parse().ok()))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn name_error_traceback() {
        let raw = "Traceback (most recent call last):\n  File \"<user_code>\", line 2, in <module>\nNameError: name 'x' is not defined\n";
        assert_eq!(
            classify_fault(raw),
            FaultClass {
                error_type: "NameError".into(),
                line: 2
            }
        );
    }

    #[test]
    fn deepest_user_frame_is_used() {
        let raw = "Traceback (most recent call last):\n  File \"<user_code>\", line 5, in <module>\n    f()\n  File \"<user_code>\", line 2, in f\n    return 1 / 0\nZeroDivisionError: division by zero";
        let class = classify_fault(raw);
        assert_eq!(class.error_type, "ZeroDivisionError");
        assert_eq!(class.line, 2);
    }

    #[test]
    fn syntax_error_without_traceback_header() {
        let raw = "  File \"<user_code>\", line 1\n    print(\n         ^\nSyntaxError: '(' was never closed\n";
        let class = classify_fault(raw);
        assert_eq!(class.error_type, "SyntaxError");
        assert_eq!(class.line, 1);
    }

    #[test]
    fn library_frames_do_not_win_over_user_frames() {
        let raw = "Traceback (most recent call last):\n  File \"<user_code>\", line 3, in <module>\n  File \"/usr/lib/python3.11/json/__init__.py\", line 346, in loads\njson.decoder.JSONDecodeError: Expecting value: line 1 column 1 (char 0)";
        let class = classify_fault(raw);
        assert_eq!(class.error_type, "JSONDecodeError");
        assert_eq!(class.line, 3);
    }

    #[test]
    fn bare_exception_name() {
        let class = classify_fault("Traceback (most recent call last):\nKeyboardInterrupt\n");
        assert_eq!(class.error_type, "KeyboardInterrupt");
        assert_eq!(class.line, 0);
    }

    #[test]
    fn plain_message_falls_back() {
        let class = classify_fault("something odd happened on line 7");
        assert_eq!(class.error_type, "PythonError");
        assert_eq!(class.line, 7);

        let class = classify_fault("");
        assert_eq!(class.error_type, "PythonError");
        assert_eq!(class.line, 0);
    }

    #[test]
    fn huge_line_number_is_unknown() {
        let class = classify_fault("File \"<user_code>\", line 99999999999999999999\nValueError: x");
        assert_eq!(class.line, 0);
        assert_eq!(class.error_type, "ValueError");
    }
}
