// HTTP upstream client for the generation API
// Author: kelexine (https://github.com/kelexine)

use super::streaming::parse_sse_stream;
use super::{LanguageModel, PartStream};
use crate::config::UpstreamConfig;
use crate::error::{CacheError, Result};
use crate::models::{GenerateRequest, GenerateResponse};
use crate::utils::logging::redact;
use crate::utils::retry::{parse_retry_after, with_retry, AttemptError};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use tracing::{debug, error};

/// Client for a JSON/SSE generation API.
///
/// - `POST {base_url}/generate` returns a [`GenerateResponse`] body
/// - `POST {base_url}/stream` returns Server-Sent Events, one
///   [`StreamPart`](crate::models::StreamPart) per event
///
/// Non-streaming calls are retried on retryable statuses; streaming calls are
/// not, since a partially delivered stream cannot be replayed transparently.
pub struct HttpModel {
    http_client: Client,
    config: UpstreamConfig,
}

impl HttpModel {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .build()
            .map_err(|e| CacheError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        debug!("Created upstream HTTP client for {}", config.base_url);

        Ok(Self {
            http_client,
            config: config.clone(),
        })
    }

    /// Get the API base URL
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn post(&self, url: &str) -> RequestBuilder {
        let builder = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json");
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// The request as sent upstream, with the default model filled in.
    fn outgoing(&self, request: &GenerateRequest) -> GenerateRequest {
        GenerateRequest {
            model_id: Some(
                request
                    .model_id
                    .clone()
                    .unwrap_or_else(|| self.config.default_model.clone()),
            ),
            params: request.params.clone(),
        }
    }

    fn map_status(&self, status: u16, body: &str) -> CacheError {
        let body = redact(body, self.config.api_key.as_deref());
        match status {
            429 => CacheError::TooManyRequests(body),
            503 | 504 => CacheError::ServiceUnavailable(format!("Upstream unavailable: {}", body)),
            400 | 422 => CacheError::InvalidRequest(body),
            _ => CacheError::Upstream(format!("HTTP {}: {}", status, body)),
        }
    }
}

#[async_trait]
impl LanguageModel for HttpModel {
    type Error = CacheError;

    fn model_id(&self) -> &str {
        &self.config.default_model
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let url = self.endpoint("generate");
        let body = self.outgoing(request);
        debug!("Calling upstream generate for model {:?}", body.model_id);

        let (url, body) = (&url, &body);
        let response_text = with_retry("Upstream generate", self.config.max_retries, move || async move {
            let response = self
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(|e| AttemptError::new(502, format!("HTTP error: {}", e)))?;

            let status = response.status();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let text = response.text().await.unwrap_or_default();

            if !status.is_success() {
                return Err(AttemptError::new(status.as_u16(), text).with_retry_after(retry_after));
            }
            Ok(text)
        })
        .await
        .map_err(|e| {
            error!(
                "Upstream generate failed: HTTP {} - {}",
                e.status,
                redact(&e.body, self.config.api_key.as_deref())
            );
            self.map_status(e.status, &e.body)
        })?;

        let mut response: GenerateResponse = serde_json::from_str(&response_text).map_err(|e| {
            error!("Failed to parse upstream response: {}", e);
            CacheError::Upstream(format!("Response parsing error: {}", e))
        })?;

        if response.id.is_empty() {
            response.id = format!("gen_{}", uuid::Uuid::new_v4().simple());
        }
        Ok(response)
    }

    async fn stream(&self, request: &GenerateRequest) -> Result<PartStream<CacheError>> {
        let url = self.endpoint("stream");
        let body = self.outgoing(request);
        debug!("Starting upstream SSE stream to {}", url);

        let response = self
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self.map_status(status.as_u16(), &error_text));
        }

        Ok(Box::pin(parse_sse_stream(response.bytes_stream())))
    }
}
