use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::error::{Result, RunnerError};
use crate::types::{JobId, SessionId};
use crate::workflow::WorkflowDocument;

/// Queues workflows on a ComfyUI server via `POST /prompt`.
///
/// One request per call, no retries.
#[derive(Debug, Clone)]
pub struct JobSubmitter {
    http: Client,
    submit_url: String,
    timeout: Duration,
}

impl JobSubmitter {
    /// Create a submitter posting to the given `/prompt` URL.
    pub fn new(submit_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            submit_url: submit_url.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Use a custom `reqwest::Client` (for connection pooling, proxies, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn submit_url(&self) -> &str {
        &self.submit_url
    }

    /// Queue a workflow under `session_id`. Returns the `prompt_id`.
    pub async fn submit(&self, doc: &WorkflowDocument, session_id: &SessionId) -> Result<JobId> {
        let body = serde_json::json!({
            "prompt": doc.as_value(),
            "client_id": session_id.as_str(),
        });

        let resp = self
            .http
            .post(&self.submit_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| RunnerError::Network {
                context: format!(
                    "Cannot connect to ComfyUI at {} \u{2014} is the service running?",
                    self.submit_url
                ),
                source: e,
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| RunnerError::Network {
            context: "Failed to read ComfyUI /prompt response".into(),
            source: e,
        })?;

        if !status.is_success() {
            return Err(RunnerError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let json: Value = serde_json::from_str(&text).map_err(|e| {
            RunnerError::InvalidResponse(format!("ComfyUI /prompt response is not JSON: {}", e))
        })?;
        let job_id = parse_submit_response(&json)?;

        tracing::info!(job_id = %job_id, session_id = %session_id, "Workflow queued");
        Ok(job_id)
    }
}

/// Pull the `prompt_id` out of a `/prompt` response body.
pub(crate) fn parse_submit_response(json: &Value) -> Result<JobId> {
    if let Some(errors) = json.get("node_errors").and_then(|e| e.as_object()) {
        if !errors.is_empty() {
            return Err(RunnerError::NodeErrors(
                serde_json::to_string_pretty(errors).unwrap_or_default(),
            ));
        }
    }

    json.get("prompt_id")
        .and_then(|v| v.as_str())
        .map(JobId::new)
        .ok_or_else(|| RunnerError::InvalidResponse("Response missing prompt_id".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_parse_prompt_response() {
        let json: Value = serde_json::from_str(
            r#"{
            "prompt_id": "abc-123-def",
            "number": 1,
            "node_errors": {}
        }"#,
        )
        .unwrap();

        assert_eq!(parse_submit_response(&json).unwrap(), JobId::new("abc-123-def"));
    }

    #[test]
    fn test_missing_prompt_id_is_protocol_error() {
        let json: Value = serde_json::from_str(r#"{"number": 3}"#).unwrap();
        let err = parse_submit_response(&json).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_non_string_prompt_id_is_protocol_error() {
        let json: Value = serde_json::from_str(r#"{"prompt_id": 42}"#).unwrap();
        assert!(parse_submit_response(&json).is_err());
    }

    #[test]
    fn test_node_errors_rejected() {
        let json: Value = serde_json::from_str(
            r#"{
            "prompt_id": "abc",
            "node_errors": {"5": {"errors": [{"message": "Required input is missing"}]}}
        }"#,
        )
        .unwrap();
        let err = parse_submit_response(&json).unwrap_err();
        assert!(matches!(err, RunnerError::NodeErrors(ref msg) if msg.contains("Required input")));
    }

    #[test]
    fn test_submitter_builder() {
        let submitter = JobSubmitter::new("http://127.0.0.1:8188/prompt")
            .with_timeout(Duration::from_secs(3));
        assert_eq!(submitter.submit_url(), "http://127.0.0.1:8188/prompt");
        assert_eq!(submitter.timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let doc = WorkflowDocument::from_json_str("{}").unwrap();
        let err = JobSubmitter::new(format!("http://{}/prompt", addr))
            .with_timeout(Duration::from_secs(2))
            .submit(&doc, &SessionId::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
