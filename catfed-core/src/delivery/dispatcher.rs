//! Retrying, conflict-guarded delivery to a sink

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tracing::{debug, info, warn};

use super::locks::FilenameLocks;
use super::sink::{DeliverySink, Upload};
use crate::config::DeliveryConfig;
use crate::error::{FederationError, Result};

/// Proof that a file reached the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReceipt {
    pub filename: String,
    pub content_type: String,
    pub location: String,
    pub bytes: usize,
    pub attempts: u32,
    pub delivered_at: DateTime<Utc>,
}

/// Shared by the product and order managers.
///
/// Uploads to distinct filenames run concurrently. Uploads to the same
/// filename never overlap, and a filename is uploaded successfully at most
/// once: [`deliver`](Self::deliver) rejects a second upload with
/// `ConflictingDelivery`, [`deliver_once`](Self::deliver_once) waits and
/// then reuses the first receipt.
pub struct DeliveryDispatcher {
    sink: Arc<dyn DeliverySink>,
    config: DeliveryConfig,
    in_flight: FilenameLocks,
    receipts: StdMutex<HashMap<String, DeliveryReceipt>>,
}

impl DeliveryDispatcher {
    pub fn new(sink: Arc<dyn DeliverySink>, config: DeliveryConfig) -> Self {
        Self {
            sink,
            config,
            in_flight: FilenameLocks::new(),
            receipts: StdMutex::new(HashMap::new()),
        }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Upload, failing fast if the same filename is in flight or was
    /// already delivered
    pub async fn deliver(&self, upload: Upload) -> Result<DeliveryReceipt> {
        let conflict = || FederationError::ConflictingDelivery {
            filename: upload.filename.clone(),
        };
        let _guard = self
            .in_flight
            .try_acquire(&upload.filename)
            .ok_or_else(conflict)?;
        if self.receipt(&upload.filename).is_some() {
            warn!("Refusing to upload {} a second time", upload.filename);
            return Err(conflict());
        }
        self.upload_with_retry(&upload).await
    }

    /// Upload unless a receipt for this filename already exists; a
    /// concurrent upload of the same filename is awaited, not rejected.
    pub async fn deliver_once(&self, upload: Upload) -> Result<DeliveryReceipt> {
        let _guard = self.in_flight.acquire(&upload.filename).await;
        if let Some(receipt) = self.receipt(&upload.filename) {
            debug!("{} already delivered; reusing receipt", upload.filename);
            return Ok(receipt);
        }
        self.upload_with_retry(&upload).await
    }

    async fn upload_with_retry(&self, upload: &Upload) -> Result<DeliveryReceipt> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.sink.put(upload).await {
                Ok(()) => {
                    let receipt = DeliveryReceipt {
                        filename: upload.filename.clone(),
                        content_type: upload.content_type.clone(),
                        location: self.sink.location(&upload.filename),
                        bytes: upload.body.len(),
                        attempts: attempt,
                        delivered_at: Utc::now(),
                    };
                    info!(
                        "Delivered {} ({}, {} bytes) to {} sink in {} attempt(s)",
                        upload.filename,
                        upload.content_type,
                        receipt.bytes,
                        self.sink.name(),
                        attempt
                    );
                    self.receipts
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(upload.filename.clone(), receipt.clone());
                    return Ok(receipt);
                }
                Err(e) => {
                    last_error = format!("{e:#}");
                    warn!(
                        "Delivery attempt {}/{} for {} failed: {}",
                        attempt, max_attempts, upload.filename, last_error
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.backoff(attempt)).await;
                    }
                }
            }
        }

        let err = FederationError::DeliveryFailed {
            filename: upload.filename.clone(),
            attempts: max_attempts,
            reason: last_error,
        };
        err.log_if_delivery_failure();
        Err(err)
    }

    pub fn receipt(&self, filename: &str) -> Option<DeliveryReceipt> {
        self.receipts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(filename)
            .cloned()
    }

    /// Every receipt, sorted by filename
    pub fn receipts(&self) -> Vec<DeliveryReceipt> {
        let mut all: Vec<DeliveryReceipt> = self
            .receipts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.filename.cmp(&b.filename));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` puts, optionally stalling each one
    struct FlakySink {
        failures: u32,
        stall: Duration,
        calls: AtomicU32,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                stall: Duration::ZERO,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DeliverySink for FlakySink {
        async fn put(&self, _upload: &Upload) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.stall.is_zero() {
                tokio::time::sleep(self.stall).await;
            }
            if call <= self.failures {
                Err(anyhow!("HTTP 503"))
            } else {
                Ok(())
            }
        }

        fn location(&self, filename: &str) -> String {
            format!("mem://{filename}")
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn fast_retry(max_attempts: u32) -> DeliveryConfig {
        DeliveryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    fn upload(name: &str) -> Upload {
        Upload::new(name, "application/x-tar", vec![7; 10])
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let sink = Arc::new(FlakySink::new(2));
        let dispatcher = DeliveryDispatcher::new(sink.clone(), fast_retry(3));

        let receipt = dispatcher.deliver(upload("a.tar")).await.unwrap();
        assert_eq!(receipt.attempts, 3);
        assert_eq!(receipt.location, "mem://a.tar");
        assert_eq!(receipt.bytes, 10);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail() {
        let sink = Arc::new(FlakySink::new(10));
        let dispatcher = DeliveryDispatcher::new(sink.clone(), fast_retry(2));

        match dispatcher.deliver(upload("a.tar")).await {
            Err(FederationError::DeliveryFailed {
                filename, attempts, ..
            }) => {
                assert_eq!(filename, "a.tar");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected DeliveryFailed, got {other:?}"),
        }
        assert!(dispatcher.receipt("a.tar").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_same_filename_conflicts() {
        let sink = Arc::new(FlakySink {
            failures: 0,
            stall: Duration::from_millis(200),
            calls: AtomicU32::new(0),
        });
        let dispatcher = Arc::new(DeliveryDispatcher::new(sink.clone(), fast_retry(1)));

        let first = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.deliver(upload("same.tar")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = dispatcher.deliver(upload("same.tar")).await;
        assert!(matches!(
            second,
            Err(FederationError::ConflictingDelivery { .. })
        ));
        assert!(first.await.unwrap().is_ok());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delivered_filename_is_not_uploaded_again() {
        let sink = Arc::new(FlakySink::new(0));
        let dispatcher = DeliveryDispatcher::new(sink.clone(), fast_retry(1));

        dispatcher.deliver(upload("once.tar")).await.unwrap();
        let again = dispatcher.deliver(upload("once.tar")).await;
        assert!(matches!(
            again,
            Err(FederationError::ConflictingDelivery { filename }) if filename == "once.tar"
        ));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lock_slots_do_not_accumulate() {
        let sink = Arc::new(FlakySink::new(0));
        let dispatcher = DeliveryDispatcher::new(sink.clone(), fast_retry(1));

        for i in 0..20 {
            dispatcher.deliver(upload(&format!("{i}.tar"))).await.unwrap();
            dispatcher
                .deliver_once(upload(&format!("{i}.jpg")))
                .await
                .unwrap();
        }
        assert_eq!(dispatcher.in_flight.len(), 0);
        assert_eq!(dispatcher.receipts().len(), 40);
    }

    #[tokio::test]
    async fn test_deliver_once_reuses_receipt() {
        let sink = Arc::new(FlakySink::new(0));
        let dispatcher = DeliveryDispatcher::new(sink.clone(), fast_retry(1));

        let first = dispatcher.deliver_once(upload("t.jpg")).await.unwrap();
        let second = dispatcher.deliver_once(upload("t.jpg")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.receipts().len(), 1);
    }
}
