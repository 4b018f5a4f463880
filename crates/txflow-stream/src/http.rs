//! HTTP message source backed by `reqwest`.
//!
//! Fetches `GET {base_url}/{height}` and decodes the body as a [`StreamMessage`].
//! A `404` means the height was skipped; every other failure is reported as a
//! [`SourceError`] and retried by the pipeline.

use async_trait::async_trait;
use std::time::Duration;

use txflow_core::StreamMessage;

use crate::source::{MessageSource, SourceError};

/// Configuration for [`HttpMessageSource`].
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub request_timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Message source reading one JSON document per height from an HTTP endpoint.
pub struct HttpMessageSource {
    base_url: String,
    http: reqwest::Client,
}

impl HttpMessageSource {
    /// Create a source for `base_url` (e.g. `"https://blocks.example.org/v1/block"`).
    pub fn new(base_url: impl Into<String>, config: HttpSourceConfig) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SourceError::Http(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Create with default configuration.
    pub fn default_for(base_url: impl Into<String>) -> Result<Self, SourceError> {
        Self::new(base_url, HttpSourceConfig::default())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, height: u64) -> String {
        format!("{}/{height}", self.base_url)
    }
}

#[async_trait]
impl MessageSource for HttpMessageSource {
    async fn fetch(&self, height: u64) -> Result<Option<StreamMessage>, SourceError> {
        let resp = self
            .http
            .get(self.url_for(height))
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            tracing::trace!(height, "height not found; skipped block");
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;
        let message = serde_json::from_slice::<StreamMessage>(&bytes)?;
        Ok(Some(message))
    }
}
