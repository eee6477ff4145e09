use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::sleep;

/// AI provider failure, classified so the worker pool can decide whether
/// re-running the job can help.
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    /// Timeouts, rate limits, provider 5xx: worth retrying.
    #[error("transient AI provider error: {0}")]
    Transient(String),

    /// Contract failures (bad request, unparseable response): retrying the
    /// same call cannot succeed.
    #[error("fatal AI provider error: {0}")]
    Fatal(String),
}

/// One call per handler invocation against the external model endpoint.
/// Implementations own transport-level retry; handlers never retry.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Identifier of the model/version producing results, for audit.
    fn model_name(&self) -> &str;

    /// Prompt the model (optionally with image attachments) for a JSON
    /// document matching the prompt's schema.
    async fn complete_json(
        &self,
        prompt: &str,
        images: &[Vec<u8>],
    ) -> Result<serde_json::Value, AiError>;

    /// Ask the model to render an image from a prompt plus reference images.
    async fn render_image(
        &self,
        prompt: &str,
        references: &[Vec<u8>],
    ) -> Result<Vec<u8>, AiError>;
}

// Transport retry bounds; handler-level retry is the worker pool's job.
const TRANSPORT_RETRIES: u32 = 3;
const TRANSPORT_BACKOFF_BASE_MS: u64 = 250;

/// Client for the AI model gateway.
pub struct GatewayClient {
    http: Client,
    base_url: String,
    api_token: String,
    model: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    result: CompletionResult,
}

#[derive(Deserialize)]
struct CompletionResult {
    text: String,
}

#[derive(Deserialize)]
struct RenderResponse {
    result: RenderResult,
}

#[derive(Deserialize)]
struct RenderResult {
    image_b64: String,
}

impl GatewayClient {
    pub fn new(base_url: &str, api_token: &str, model: &str) -> Result<Self, AiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| AiError::Fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            model: model.to_string(),
        })
    }

    /// POST a JSON body, retrying transport failures (connect errors,
    /// timeouts, 429, 5xx) with exponential backoff before classifying.
    async fn post_with_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, AiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = String::new();

        for attempt in 0..TRANSPORT_RETRIES {
            if attempt > 0 {
                sleep(Duration::from_millis(
                    TRANSPORT_BACKOFF_BASE_MS << (attempt - 1),
                ))
                .await;
            }

            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_token)
                .json(body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    last_error = format!("provider returned {status}");
                    if !retryable_status(status) {
                        return Err(AiError::Fatal(last_error));
                    }
                    tracing::warn!(%status, attempt, "Retryable provider status");
                }
                Err(e) => {
                    last_error = format!("transport failure: {e}");
                    tracing::warn!(error = %e, attempt, "Transport failure calling provider");
                }
            }
        }

        Err(AiError::Transient(last_error))
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Models sometimes fence their JSON in markdown despite instructions.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[async_trait]
impl ModelClient for GatewayClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_json(
        &self,
        prompt: &str,
        images: &[Vec<u8>],
    ) -> Result<serde_json::Value, AiError> {
        let encoded: Vec<String> = images
            .iter()
            .map(|img| base64::engine::general_purpose::STANDARD.encode(img))
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "images": encoded,
            "max_tokens": 1024,
        });

        let response = self.post_with_retry("/v1/completions", &body).await?;
        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AiError::Fatal(format!("malformed provider response: {e}")))?;

        serde_json::from_str(strip_code_fence(&completion.result.text))
            .map_err(|e| AiError::Fatal(format!("model did not return valid JSON: {e}")))
    }

    async fn render_image(
        &self,
        prompt: &str,
        references: &[Vec<u8>],
    ) -> Result<Vec<u8>, AiError> {
        let encoded: Vec<String> = references
            .iter()
            .map(|img| base64::engine::general_purpose::STANDARD.encode(img))
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "reference_images": encoded,
        });

        let response = self.post_with_retry("/v1/images", &body).await?;
        let render: RenderResponse = response
            .json()
            .await
            .map_err(|e| AiError::Fatal(format!("malformed provider response: {e}")))?;

        base64::engine::general_purpose::STANDARD
            .decode(&render.result.image_b64)
            .map_err(|e| AiError::Fatal(format!("provider sent undecodable image data: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
    }

    #[test]
    fn only_throttling_and_server_errors_are_retryable() {
        assert!(retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!retryable_status(StatusCode::BAD_REQUEST));
        assert!(!retryable_status(StatusCode::UNAUTHORIZED));
    }
}
