//! OpenAI-compatible `/embeddings` client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::embedding::{EmbeddingError, EmbeddingProvider, ProviderError};

/// Longest provider error body echoed back in an error message.
const MAX_ERROR_BODY_CHARS: usize = 240;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for any service speaking the OpenAI embeddings protocol.
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: Option<usize>,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OpenAiProvider {
    /// Builds a provider from the embedding settings.
    ///
    /// `dimension` is only sent to the API when `request_dimensions` is set,
    /// since older models reject the parameter.
    pub fn new(config: &EmbeddingConfig, dimension: usize) -> Result<Self, EmbeddingError> {
        let api_base = config.api_base.trim_end_matches('/');
        if api_base.is_empty() {
            return Err(EmbeddingError::Configuration(
                "embedding.api_base must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|e| {
                EmbeddingError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{api_base}/embeddings"),
            api_key: config.resolve_api_key(),
            model: config.model.clone(),
            dimensions: config.request_dimensions.then_some(dimension),
        })
    }

    fn classify_status(
        status: StatusCode,
        retry_after: Option<Duration>,
        body: String,
    ) -> ProviderError {
        let snippet: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        let message = format!("status {}: {snippet}", status.as_u16());

        if status == StatusCode::TOO_MANY_REQUESTS {
            ProviderError::RateLimited {
                message,
                retry_after,
            }
        } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            ProviderError::Transient(message)
        } else {
            ProviderError::Fatal(message)
        }
    }
}

/// Reads a `Retry-After` value given either as delay seconds or as an
/// HTTP date. Dates in the past mean "retry now".
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some((at.with_timezone(&Utc) - now).to_std().unwrap_or(Duration::ZERO))
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
            dimensions: self.dimensions,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(count = texts.len(), model = %self.model, "Sending embedding request");
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| parse_retry_after(value, Utc::now()));
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, retry_after, body));
        }

        let payload: EmbeddingResponse = response.json().await.map_err(|e| {
            ProviderError::Fatal(format!("failed to parse embedding response: {e}"))
        })?;

        if payload.data.len() != texts.len() {
            return Err(ProviderError::Fatal(format!(
                "embedding response size mismatch: expected {}, got {}",
                texts.len(),
                payload.data.len()
            )));
        }

        let mut items = payload.data;
        if items.iter().all(|item| item.index.is_some()) {
            items.sort_by_key(|item| item.index);
        }
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
