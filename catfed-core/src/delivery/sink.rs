//! Delivery sink trait - abstraction over the external file store
//!
//! Implementations:
//! - [`HttpSink`]: `PUT <base>/<filename>` with a `Content-Type` header
//! - test doubles in `tests/common` that record every upload

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SinkConfig;

/// One file to push to the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub filename: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            body,
        }
    }
}

/// Trait for delivery sinks
///
/// A single `put` is one attempt; retry policy lives in the dispatcher.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Store `upload`; any error counts as a failed attempt
    async fn put(&self, upload: &Upload) -> Result<()>;

    /// Where `filename` ends up once delivered
    fn location(&self, filename: &str) -> String;

    /// Sink identifier for logging
    fn name(&self) -> &'static str;
}

/// HTTP sink: success is any 2xx
pub struct HttpSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSink {
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("catfed/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DeliverySink for HttpSink {
    async fn put(&self, upload: &Upload) -> Result<()> {
        let url = self.location(&upload.filename);
        debug!(
            "PUT {} ({}, {} bytes)",
            url,
            upload.content_type,
            upload.body.len()
        );

        let response = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, upload.content_type.as_str())
            .body(upload.body.clone())
            .send()
            .await
            .with_context(|| format!("Failed to send PUT to {url}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Sink rejected {}: {} - {}", url, status, body);
            anyhow::bail!("Sink rejected PUT {}: HTTP {}", url, status);
        }

        Ok(())
    }

    fn location(&self, filename: &str) -> String {
        format!("{}/{}", self.base_url, filename)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
