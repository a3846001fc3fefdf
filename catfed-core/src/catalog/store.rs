//! Catalog store abstraction and the in-memory implementation

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::record::{CatalogRecord, NewRecord};
use crate::dag::{Attributes, RecordStatus};
use crate::error::{FederationError, Result};
use crate::query::Filter;

/// Default capacity of the catalog event channel
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Change notification published by a catalog store
#[derive(Debug, Clone)]
pub enum CatalogEvent {
    Created(Arc<CatalogRecord>),
    Updated(Arc<CatalogRecord>),
    Deleted { id: String },
}

impl CatalogEvent {
    pub fn id(&self) -> &str {
        match self {
            CatalogEvent::Created(record) | CatalogEvent::Updated(record) => &record.id,
            CatalogEvent::Deleted { id } => id,
        }
    }

    /// The record carried by events standing queries can match
    pub fn record(&self) -> Option<&Arc<CatalogRecord>> {
        match self {
            CatalogEvent::Created(record) | CatalogEvent::Updated(record) => Some(record),
            CatalogEvent::Deleted { .. } => None,
        }
    }
}

/// Read side of the catalog, as seen by the managers.
///
/// `search` returns matches in ascending identifier order so that results
/// are reproducible while the catalog is unchanged.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn search(&self, filter: &Filter) -> Result<Vec<Arc<CatalogRecord>>>;

    /// Number of matches, without cloning records out of the store
    async fn count(&self, filter: &Filter) -> Result<usize>;

    async fn get(&self, id: &str) -> Result<Option<Arc<CatalogRecord>>>;

    /// Subscribe to change events published after this call
    fn subscribe(&self) -> broadcast::Receiver<CatalogEvent>;

    /// Store identifier for logging
    fn name(&self) -> &'static str;
}

/// Catalog held in process memory
pub struct InMemoryCatalog {
    records: RwLock<BTreeMap<String, Arc<CatalogRecord>>>,
    events: broadcast::Sender<CatalogEvent>,
    available: AtomicBool,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::with_event_buffer(DEFAULT_EVENT_BUFFER)
    }

    pub fn with_event_buffer(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            records: RwLock::new(BTreeMap::new()),
            events,
            available: AtomicBool::new(true),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<CatalogRecord>>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<CatalogRecord>>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: CatalogEvent) {
        // No receivers is fine: nobody has a standing query yet
        let _ = self.events.send(event);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FederationError::CatalogUnavailable {
                reason: "in-memory catalog is offline".to_string(),
            })
        }
    }

    /// Ingest a record under a freshly generated identifier
    pub fn ingest(&self, record: NewRecord) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.ingest_with_id(&id, record);
        id
    }

    /// Ingest a record under a caller-chosen identifier.
    ///
    /// Re-ingesting an existing identifier replaces the record and marks it
    /// `CHANGED`.
    pub fn ingest_with_id(&self, id: &str, record: NewRecord) -> Arc<CatalogRecord> {
        let now = Utc::now();
        let mut stored = CatalogRecord::from_new(id.to_string(), record, now);

        // Publish while holding the write lock so events follow store order
        let mut records = self.write();
        let existed = match records.get(id) {
            Some(previous) => {
                stored.created = previous.created;
                stored.status = RecordStatus::Changed;
                true
            }
            None => false,
        };
        let stored = Arc::new(stored);
        records.insert(id.to_string(), stored.clone());

        let event = if existed {
            CatalogEvent::Updated(stored.clone())
        } else {
            CatalogEvent::Created(stored.clone())
        };
        info!("Ingested catalog record {} ({})", id, event_kind(&event));
        self.publish(event);
        stored
    }

    /// Merge `changes` into a record's attributes and mark it `CHANGED`
    pub fn update(&self, id: &str, changes: &Attributes) -> Result<Arc<CatalogRecord>> {
        self.modify(id, |record| {
            record.extra.extend(changes);
            record.status = RecordStatus::Changed;
        })
    }

    /// Mark a record `OBSOLETE`
    pub fn retire(&self, id: &str) -> Result<Arc<CatalogRecord>> {
        self.modify(id, |record| record.status = RecordStatus::Obsolete)
    }

    fn modify(
        &self,
        id: &str,
        apply: impl FnOnce(&mut CatalogRecord),
    ) -> Result<Arc<CatalogRecord>> {
        let mut records = self.write();
        let current = records
            .get(id)
            .ok_or_else(|| FederationError::RecordNotFound { id: id.to_string() })?;
        let mut next = CatalogRecord::clone(current);
        apply(&mut next);
        next.modified = Utc::now();
        let updated = Arc::new(next);
        records.insert(id.to_string(), updated.clone());

        debug!("Updated catalog record {} -> {}", id, updated.status);
        self.publish(CatalogEvent::Updated(updated.clone()));
        Ok(updated)
    }

    /// Remove a record; returns whether it existed
    pub fn delete(&self, id: &str) -> bool {
        let mut records = self.write();
        let removed = records.remove(id).is_some();
        if removed {
            info!("Deleted catalog record {}", id);
            self.publish(CatalogEvent::Deleted { id: id.to_string() });
        }
        removed
    }

    /// Remove every record
    pub fn clear(&self) {
        let ids: Vec<String> = self.read().keys().cloned().collect();
        for id in ids {
            self.delete(&id);
        }
    }

    /// Simulate an outage: while unavailable every read fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

fn event_kind(event: &CatalogEvent) -> &'static str {
    match event {
        CatalogEvent::Created(_) => "created",
        CatalogEvent::Updated(_) => "updated",
        CatalogEvent::Deleted { .. } => "deleted",
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn search(&self, filter: &Filter) -> Result<Vec<Arc<CatalogRecord>>> {
        self.ensure_available()?;
        Ok(self
            .read()
            .values()
            .filter(|record| filter.matches(&record.attributes()))
            .cloned()
            .collect())
    }

    async fn count(&self, filter: &Filter) -> Result<usize> {
        self.ensure_available()?;
        Ok(self
            .read()
            .values()
            .filter(|record| filter.matches(&record.attributes()))
            .count())
    }

    async fn get(&self, id: &str) -> Result<Option<Arc<CatalogRecord>>> {
        self.ensure_available()?;
        Ok(self.read().get(id).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;

    fn png(title: &str) -> NewRecord {
        NewRecord::new(title, "image/png", vec![0u8; 16]).with_thumbnail(vec![1u8; 4])
    }

    #[tokio::test]
    async fn test_search_orders_by_identifier() {
        let catalog = InMemoryCatalog::new();
        catalog.ingest_with_id("c", png("third"));
        catalog.ingest_with_id("a", png("first"));
        catalog.ingest_with_id("b", png("second"));

        let filter = parse("identifier like '%'").unwrap();
        let ids: Vec<String> = catalog
            .search(&filter)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(catalog.count(&filter).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_events_published_in_order() {
        let catalog = InMemoryCatalog::new();
        let mut events = catalog.subscribe();

        catalog.ingest_with_id("r1", png("one"));
        catalog.retire("r1").unwrap();
        assert!(catalog.delete("r1"));

        assert!(matches!(events.recv().await.unwrap(), CatalogEvent::Created(r) if r.id == "r1"));
        match events.recv().await.unwrap() {
            CatalogEvent::Updated(r) => assert_eq!(r.status, RecordStatus::Obsolete),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(events.recv().await.unwrap(), CatalogEvent::Deleted { id } if id == "r1"));
    }

    #[tokio::test]
    async fn test_reingest_marks_changed() {
        let catalog = InMemoryCatalog::new();
        let first = catalog.ingest_with_id("r1", png("one"));
        let second = catalog.ingest_with_id("r1", png("one again"));
        assert_eq!(first.status, RecordStatus::New);
        assert_eq!(second.status, RecordStatus::Changed);
        assert_eq!(second.created, first.created);
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_catalog_fails_reads() {
        let catalog = InMemoryCatalog::new();
        catalog.ingest(png("one"));
        catalog.set_available(false);

        let filter = parse("identifier like '%'").unwrap();
        let err = catalog.count(&filter).await.unwrap_err();
        assert!(err.is_retryable());

        catalog.set_available(true);
        assert_eq!(catalog.count(&filter).await.unwrap(), 1);
    }

    #[test]
    fn test_update_missing_record() {
        let catalog = InMemoryCatalog::new();
        assert!(matches!(
            catalog.update("nope", &Attributes::new()),
            Err(FederationError::RecordNotFound { .. })
        ));
        assert!(!catalog.delete("nope"));
    }
}
