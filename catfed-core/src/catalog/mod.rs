//! Catalog state owned by the endpoint
//!
//! Records enter through the ingestion front door (outside this crate; the
//! in-memory store exposes `ingest` as its stand-in) and leave only as
//! result graphs built by the managers.

mod record;
mod store;

pub use record::{CatalogRecord, NewRecord};
pub use store::{CatalogEvent, CatalogStore, InMemoryCatalog, DEFAULT_EVENT_BUFFER};
