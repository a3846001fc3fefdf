//! Test helpers shared by the integration tests
//!
//! Provides a recording delivery sink and a recording callback, both of
//! which can be scripted to fail or stall.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use catfed_core::catalog::{CatalogEvent, CatalogRecord, CatalogStore, InMemoryCatalog, NewRecord};
use catfed_core::config::EndpointConfig;
use catfed_core::dag::ResultGraph;
use catfed_core::delivery::{DeliverySink, Upload};
use catfed_core::managers::Callback;
use catfed_core::query::Filter;
use catfed_core::Endpoint;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Config with millisecond backoffs so retry tests stay fast
pub fn fast_config() -> EndpointConfig {
    let mut config = EndpointConfig::default();
    config.delivery.initial_backoff_ms = 1;
    config.delivery.max_backoff_ms = 5;
    config.standing_query.callback_timeout_seconds = 2;
    config.standing_query.retry_backoff_ms = 1;
    config
}

/// A PNG product with a thumbnail
pub fn image_record(title: &str) -> NewRecord {
    NewRecord::new(title, "image/png", title.as_bytes().to_vec())
        .with_thumbnail(format!("thumb:{title}").into_bytes())
}

pub struct Harness {
    pub catalog: Arc<InMemoryCatalog>,
    pub sink: Arc<RecordingSink>,
    pub endpoint: Endpoint,
}

pub fn harness() -> Harness {
    harness_with(RecordingSink::new(), fast_config())
}

pub fn harness_with(sink: RecordingSink, config: EndpointConfig) -> Harness {
    init_test_logging();
    let catalog = Arc::new(InMemoryCatalog::new());
    let sink = Arc::new(sink);
    let endpoint = Endpoint::new(catalog.clone(), sink.clone(), config);
    Harness {
        catalog,
        sink,
        endpoint,
    }
}

/// Harness whose endpoint sees the catalog through a [`SlowCatalog`]
pub fn slow_harness(get_delay: Duration, sink: RecordingSink) -> Harness {
    init_test_logging();
    let catalog = Arc::new(InMemoryCatalog::new());
    let sink = Arc::new(sink);
    let store = Arc::new(SlowCatalog {
        inner: catalog.clone(),
        get_delay,
    });
    let endpoint = Endpoint::new(store, sink.clone(), fast_config());
    Harness {
        catalog,
        sink,
        endpoint,
    }
}

/// Catalog whose record lookups take `get_delay`
pub struct SlowCatalog {
    inner: Arc<InMemoryCatalog>,
    get_delay: Duration,
}

#[async_trait]
impl CatalogStore for SlowCatalog {
    async fn search(&self, filter: &Filter) -> catfed_core::Result<Vec<Arc<CatalogRecord>>> {
        self.inner.search(filter).await
    }

    async fn count(&self, filter: &Filter) -> catfed_core::Result<usize> {
        self.inner.count(filter).await
    }

    async fn get(&self, id: &str) -> catfed_core::Result<Option<Arc<CatalogRecord>>> {
        tokio::time::sleep(self.get_delay).await;
        self.inner.get(id).await
    }

    fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.inner.subscribe()
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

// ============================================================================
// Recording sink
// ============================================================================

/// In-memory sink that keeps every successful upload
#[derive(Default)]
pub struct RecordingSink {
    uploads: Mutex<Vec<Upload>>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
    stall: Duration,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` puts
    pub fn failing(n: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(n),
            ..Self::default()
        }
    }

    /// Hold every put for `stall` before accepting it
    pub fn stalling(stall: Duration) -> Self {
        Self {
            stall,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }

    /// `(filename, content type)` of each successful upload, in order
    pub fn puts(&self) -> Vec<(String, String)> {
        self.uploads()
            .into_iter()
            .map(|u| (u.filename, u.content_type))
            .collect()
    }

    pub fn uploads_named(&self, filename: &str) -> usize {
        self.uploads()
            .iter()
            .filter(|u| u.filename == filename)
            .count()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn put(&self, upload: &Upload) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.stall.is_zero() {
            tokio::time::sleep(self.stall).await;
        }
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            bail!("HTTP 503 Service Unavailable");
        }
        self.uploads.lock().unwrap().push(upload.clone());
        Ok(())
    }

    fn location(&self, filename: &str) -> String {
        format!("http://sink.test/file/{filename}")
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

// ============================================================================
// Recording callback
// ============================================================================

#[derive(Debug, Clone)]
pub struct Invocation {
    pub subscription_id: String,
    pub identifier: String,
    pub status: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Callback that records each successful notification
#[derive(Default)]
pub struct RecordingCallback {
    invocations: Mutex<Vec<Invocation>>,
    failures_left: AtomicU32,
    delay: Duration,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spend `delay` inside every notification
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Fail the next `n` notification attempts
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .map(|i| i.identifier)
            .collect()
    }

    /// Wait until at least `n` notifications have been recorded
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.invocations.lock().unwrap().len() >= n).await
    }
}

#[async_trait]
impl Callback for RecordingCallback {
    async fn notify(&self, subscription_id: &str, graph: &ResultGraph) -> Result<()> {
        let started = Instant::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            bail!("callback returned 500");
        }
        self.invocations.lock().unwrap().push(Invocation {
            subscription_id: subscription_id.to_string(),
            identifier: graph.identifier().to_string(),
            status: graph.status().to_string(),
            started,
            finished: Instant::now(),
        });
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn target(&self) -> String {
        "test://recording-callback".to_string()
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
