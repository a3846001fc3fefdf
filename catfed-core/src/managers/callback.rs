//! Callback targets and the retry policy for pushing graphs to them
//!
//! Used by standing queries and by one-shot queries delivered through a
//! callback.

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

use crate::config::StandingQueryConfig;
use crate::dag::ResultGraph;
use crate::error::{FederationError, Result};

/// Callback target supplied with a query
///
/// Implementations:
/// - [`HttpCallback`]: POSTs each graph as JSON
/// - recording doubles in `tests/common`
#[async_trait]
pub trait Callback: Send + Sync {
    /// Push one result graph; any error counts as a failed attempt
    async fn notify(&self, subscription_id: &str, graph: &ResultGraph) -> anyhow::Result<()>;

    /// Reachability check run once at registration
    async fn ping(&self) -> anyhow::Result<()>;

    /// Address for logs and status reports
    fn target(&self) -> String;
}

/// Callback reached over HTTP. Success is any 2xx; the reachability check
/// accepts any HTTP answer at all.
pub struct HttpCallback {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct Notification<'a> {
    subscription_id: &'a str,
    graph: &'a ResultGraph,
}

impl HttpCallback {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("catfed/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Callback for HttpCallback {
    async fn notify(&self, subscription_id: &str, graph: &ResultGraph) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&Notification {
                subscription_id,
                graph,
            })
            .send()
            .await
            .with_context(|| format!("Failed to reach callback {}", self.url))?;

        if !response.status().is_success() {
            anyhow::bail!("Callback {} answered HTTP {}", self.url, response.status());
        }
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.client
            .head(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to reach callback {}", self.url))?;
        Ok(())
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}

/// How one push to a callback ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Notified {
    Delivered { attempts: u32 },
    /// `keep_going` turned false before an attempt
    Abandoned,
    Failed { attempts: u32, reason: String },
}

/// Ping `callback` once, bounded by the callback timeout
pub(super) async fn check_reachable(
    callback: &dyn Callback,
    config: &StandingQueryConfig,
) -> Result<()> {
    match tokio::time::timeout(config.callback_timeout(), callback.ping()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(FederationError::CallbackUnreachable {
            target: callback.target(),
            reason: format!("{e:#}"),
        }),
        Err(_) => Err(FederationError::CallbackUnreachable {
            target: callback.target(),
            reason: format!("no answer within {}s", config.callback_timeout_seconds),
        }),
    }
}

/// Push `graph` to `callback`, retrying within the configured budget.
/// Each attempt is bounded by the callback timeout; `keep_going` is
/// checked before every attempt.
pub(super) async fn notify_with_retry(
    callback: &dyn Callback,
    delivery_id: &str,
    graph: &ResultGraph,
    config: &StandingQueryConfig,
    keep_going: impl Fn() -> bool,
) -> Notified {
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if !keep_going() {
            return Notified::Abandoned;
        }
        let outcome =
            tokio::time::timeout(config.callback_timeout(), callback.notify(delivery_id, graph))
                .await;
        match outcome {
            Ok(Ok(())) => return Notified::Delivered { attempts: attempt },
            Ok(Err(e)) => last_error = format!("{e:#}"),
            Err(_) => {
                last_error = format!(
                    "callback timed out after {}s",
                    config.callback_timeout_seconds
                )
            }
        }
        warn!(
            "Callback attempt {}/{} for {} failed: {}",
            attempt, max_attempts, delivery_id, last_error
        );
        if attempt < max_attempts {
            tokio::time::sleep(config.retry_backoff()).await;
        }
    }

    Notified::Failed {
        attempts: max_attempts,
        reason: last_error,
    }
}
