//! Plain-language explanations for failed jobs.
//!
//! The core crate only defines the request/response shapes and the
//! [`ErrorExplainer`] seam. Network-backed explainers live in
//! `codebox-plugins`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExplainError;
use crate::job::ErrorDetail;

pub const MAX_SOURCE_CHARS: usize = 10_000;
pub const MAX_TYPE_CHARS: usize = 100;
pub const MAX_MESSAGE_CHARS: usize = 5_000;
pub const MAX_LINE_NUMBER: usize = 5_000;
pub const MAX_LINE_TEXT_CHARS: usize = 1_000;

/// Request body sent to an explainer endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainRequest {
    #[serde(rename = "code")]
    pub source_text: String,
    pub error: FaultSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultSummary {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    #[serde(rename = "lineno")]
    pub line_number: u32,
    pub line_text: String,
}

impl ExplainRequest {
    pub fn from_detail(source_text: impl Into<String>, detail: &ErrorDetail) -> Self {
        Self {
            source_text: source_text.into(),
            error: FaultSummary {
                error_type: detail.error_type.clone(),
                message: detail.message.clone(),
                line_number: detail.line_number,
                line_text: detail.line_text.clone(),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ExplainError> {
        check_len("code", &self.source_text, MAX_SOURCE_CHARS)?;
        check_len("error.type", &self.error.error_type, MAX_TYPE_CHARS)?;
        check_len("error.message", &self.error.message, MAX_MESSAGE_CHARS)?;
        check_len("error.line_text", &self.error.line_text, MAX_LINE_TEXT_CHARS)?;
        if self.error.line_number as usize > MAX_LINE_NUMBER {
            return Err(ExplainError::Validation {
                field: "error.lineno",
                limit: MAX_LINE_NUMBER,
            });
        }
        Ok(())
    }
}

fn check_len(field: &'static str, value: &str, limit: usize) -> Result<(), ExplainError> {
    if value.chars().count() > limit {
        return Err(ExplainError::Validation { field, limit });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub friendly_message: String,
    pub fix_suggestion: String,
    #[serde(default)]
    pub corrected_line: Option<String>,
}

impl Explanation {
    /// Returned whenever no explanation could be obtained.
    pub fn fallback() -> Self {
        Self {
            friendly_message: "Could not fetch an explanation for this error.".to_string(),
            fix_suggestion: "Check your connection and try again.".to_string(),
            corrected_line: None,
        }
    }
}

#[async_trait]
pub trait ErrorExplainer: Send + Sync {
    fn name(&self) -> &str;

    async fn explain(&self, req: &ExplainRequest) -> Result<Explanation, ExplainError>;
}

/// Validates `req`, asks `explainer` and swallows any failure into
/// [`Explanation::fallback`].
pub async fn explain_or_fallback(explainer: &dyn ErrorExplainer, req: &ExplainRequest) -> Explanation {
    if let Err(e) = req.validate() {
        tracing::warn!(target: "codebox.explain", error = %e, "explain request rejected");
        return Explanation::fallback();
    }
    match explainer.explain(req).await {
        Ok(explanation) => explanation,
        Err(e) => {
            tracing::warn!(
                target: "codebox.explain",
                explainer = explainer.name(),
                error = %e,
                "explainer failed, using fallback"
            );
            Explanation::fallback()
        }
    }
}

/// Parses an [`Explanation`] out of a response body that is either bare JSON
/// or prose wrapping one JSON object.
pub fn parse_explanation(body: &str) -> Result<Explanation, ExplainError> {
    if let Ok(parsed) = serde_json::from_str::<Explanation>(body.trim()) {
        return Ok(parsed);
    }
    let object = extract_json_object(body)
        .ok_or_else(|| ExplainError::BadResponse("no JSON object in response".to_string()))?;
    serde_json::from_str(object).map_err(|e| ExplainError::BadResponse(e.to_string()))
}

/// The span from the first `{` to the last `}`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn detail() -> ErrorDetail {
        ErrorDetail {
            error_type: "NameError".into(),
            message: "name 'x' is not defined".into(),
            line_number: 1,
            line_text: "print(x)".into(),
        }
    }

    struct Failing;

    #[async_trait]
    impl ErrorExplainer for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn explain(&self, _req: &ExplainRequest) -> Result<Explanation, ExplainError> {
            Err(ExplainError::Http("connection refused".into()))
        }
    }

    #[test]
    fn request_uses_wire_field_names() {
        let req = ExplainRequest::from_detail("print(x)", &detail());
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["code"], "print(x)");
        assert_eq!(v["error"]["type"], "NameError");
        assert_eq!(v["error"]["lineno"], 1);
    }

    #[test]
    fn validation_limits() {
        let mut req = ExplainRequest::from_detail("x", &detail());
        assert!(req.validate().is_ok());

        req.error.line_number = 0;
        assert!(req.validate().is_ok());

        req.error.line_number = 5_001;
        assert!(matches!(
            req.validate(),
            Err(ExplainError::Validation { field: "error.lineno", .. })
        ));

        let mut req = ExplainRequest::from_detail("a".repeat(10_001), &detail());
        assert!(matches!(req.validate(), Err(ExplainError::Validation { field: "code", .. })));
        req.source_text = "a".into();
        req.error.error_type = "E".repeat(101);
        assert!(req.validate().is_err());
    }

    #[test]
    fn extracts_wrapped_json() {
        let body = "Sure! {\"friendly_message\":\"m\",\"fix_suggestion\":\"f\",\"corrected_line\":null} hope it helps";
        let e = parse_explanation(body).unwrap();
        assert_eq!(e.friendly_message, "m");
        assert_eq!(e.corrected_line, None);
        assert!(parse_explanation("no json here").is_err());
        assert_eq!(extract_json_object("} {"), None);
    }

    #[tokio::test]
    async fn failures_fall_back() {
        let req = ExplainRequest::from_detail("print(x)", &detail());
        assert_eq!(explain_or_fallback(&Failing, &req).await, Explanation::fallback());
    }
}
