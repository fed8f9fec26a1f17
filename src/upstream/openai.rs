use std::time::Duration;

use super::{CompletionBackend, UpstreamError, UpstreamOutput, UpstreamRequest};

/// Completion backend for the hosted Responses endpoint. One POST per call,
/// never retried.
pub struct OpenAiClient {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: String, timeout_ms: u64) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;
        Ok(Self {
            endpoint: format!("{}/responses", base_url.trim_end_matches('/')),
            api_key,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn transport_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Transport(err.to_string())
    }
}

#[async_trait::async_trait]
impl CompletionBackend for OpenAiClient {
    async fn complete(
        &self,
        request: &UpstreamRequest<'_>,
    ) -> Result<UpstreamOutput, UpstreamError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = match resp.text().await {
                Ok(body) => body,
                Err(err) => format!("failed to read upstream error body: {}", err),
            };
            tracing::warn!(status = status.as_u16(), "upstream returned non-success status");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await.map_err(transport_error)?;
        UpstreamOutput::from_json(&body)
    }
}
