use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use codebox_core::api::{parse_explanation, ErrorExplainer, ExplainError, ExplainRequest, Explanation};

/// Posts explain requests as JSON to a remote endpoint.
pub struct HttpExplainer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpExplainer {
    pub fn new(endpoint: String, api_key: String, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl ErrorExplainer for HttpExplainer {
    fn name(&self) -> &str {
        "http"
    }

    async fn explain(&self, req: &ExplainRequest) -> Result<Explanation, ExplainError> {
        req.validate()?;

        let mut builder = self.client.post(&self.endpoint).json(req);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        tracing::debug!(
            target: "codebox.explain",
            endpoint = %self.endpoint,
            error_type = %req.error.error_type,
            "requesting explanation"
        );
        let resp = builder
            .send()
            .await
            .map_err(|e| ExplainError::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ExplainError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(ExplainError::Http(format!("status {status}")));
        }
        parse_explanation(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebox_core::api::{explain_or_fallback, ErrorDetail};
    use pretty_assertions::assert_eq;

    fn request() -> ExplainRequest {
        ExplainRequest::from_detail(
            "print(x)",
            &ErrorDetail {
                error_type: "NameError".into(),
                message: "name 'x' is not defined".into(),
                line_number: 1,
                line_text: "print(x)".into(),
            },
        )
    }

    #[tokio::test]
    async fn posts_request_and_parses_wrapped_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/debug")
            .match_header("authorization", "Bearer secret")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "code": "print(x)",
                "error": { "type": "NameError", "lineno": 1 }
            })))
            .with_status(200)
            .with_body(
                "Here you go: {\"friendly_message\":\"x is undefined\",\"fix_suggestion\":\"define x\",\"corrected_line\":\"x = 1\"}",
            )
            .create_async()
            .await;

        let explainer = HttpExplainer::new(
            format!("{}/api/debug", server.url()),
            "secret".into(),
            5_000,
        )
        .unwrap();
        let explanation = explainer.explain(&request()).await.unwrap();

        assert_eq!(explanation.friendly_message, "x is undefined");
        assert_eq!(explanation.corrected_line.as_deref(), Some("x = 1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_falls_back() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/debug")
            .with_status(500)
            .with_body("{\"friendly_message\":\"oops\",\"fix_suggestion\":\"wait\",\"corrected_line\":null}")
            .create_async()
            .await;

        let explainer =
            HttpExplainer::new(format!("{}/api/debug", server.url()), String::new(), 5_000).unwrap();
        assert!(matches!(
            explainer.explain(&request()).await,
            Err(ExplainError::Http(_))
        ));
        assert_eq!(
            explain_or_fallback(&explainer, &request()).await,
            Explanation::fallback()
        );
    }

    #[tokio::test]
    async fn invalid_request_is_not_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/api/debug").expect(0).create_async().await;

        let explainer =
            HttpExplainer::new(format!("{}/api/debug", server.url()), String::new(), 5_000).unwrap();
        let mut req = request();
        req.error.line_number = 9_999;
        assert!(matches!(
            explainer.explain(&req).await,
            Err(ExplainError::Validation { .. })
        ));
        mock.assert_async().await;
    }
}
