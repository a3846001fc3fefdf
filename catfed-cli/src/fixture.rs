//! Record fixtures: a YAML file describing catalog records to ingest
//!
//! ```yaml
//! records:
//!   - id: R1
//!     title: harbor.png
//!     content_type: image/png
//!     product: data/harbor.png     # relative to the fixture file
//!     thumbnail: data/harbor.jpg   # optional
//!     attributes:
//!       cloudCover: 12
//!       region: north
//!       acquired: 2024-05-01T10:00:00Z
//! ```
//!
//! `product_text` may replace `product` for inline content.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use catfed_core::catalog::{InMemoryCatalog, NewRecord};
use catfed_core::dag::AttributeValue;

#[derive(Debug, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub records: Vec<FixtureRecord>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureRecord {
    /// Generated when absent
    pub id: Option<String>,
    pub title: String,
    pub content_type: String,
    pub source: Option<String>,
    pub product: Option<PathBuf>,
    pub product_text: Option<String>,
    pub thumbnail: Option<PathBuf>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_yaml_ng::Value>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
        serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse fixture: {}", path.display()))
    }

    /// Ingest every record; returns the identifiers in fixture order
    pub fn ingest_into(&self, catalog: &InMemoryCatalog, base_dir: &Path) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(self.records.len());
        for entry in &self.records {
            let record = entry.to_new_record(base_dir)?;
            let id = match &entry.id {
                Some(id) => {
                    catalog.ingest_with_id(id, record);
                    id.clone()
                }
                None => catalog.ingest(record),
            };
            ids.push(id);
        }
        tracing::debug!("Ingested {} fixture record(s)", ids.len());
        Ok(ids)
    }
}

impl FixtureRecord {
    fn to_new_record(&self, base_dir: &Path) -> Result<NewRecord> {
        let product = match (&self.product, &self.product_text) {
            (Some(path), _) => read_file(base_dir, path)?,
            (None, Some(text)) => text.clone().into_bytes(),
            (None, None) => Vec::new(),
        };

        let mut record = NewRecord::new(&self.title, &self.content_type, product);
        if let Some(source) = &self.source {
            record = record.with_source(source);
        }
        if let Some(path) = &self.thumbnail {
            record = record.with_thumbnail(read_file(base_dir, path)?);
        }
        for (name, value) in &self.attributes {
            let value = attribute_value(value)
                .with_context(|| format!("Unsupported value for attribute '{name}'"))?;
            record = record.with_attribute(name.as_str(), value);
        }
        Ok(record)
    }
}

fn read_file(base_dir: &Path, path: &Path) -> Result<Vec<u8>> {
    let full = base_dir.join(path);
    std::fs::read(&full).with_context(|| format!("Failed to read {}", full.display()))
}

/// Map a YAML scalar onto an attribute value. Strings that parse as RFC 3339
/// become timestamps.
fn attribute_value(value: &serde_yaml_ng::Value) -> Result<AttributeValue> {
    use serde_yaml_ng::Value;

    Ok(match value {
        Value::Bool(b) => AttributeValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AttributeValue::Integer(i),
            None => AttributeValue::Real(n.as_f64().context("number out of range")?),
        },
        Value::String(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(ts) => AttributeValue::Timestamp(ts.with_timezone(&Utc)),
            Err(_) => AttributeValue::Text(s.clone()),
        },
        other => anyhow::bail!("expected a scalar, got {other:?}"),
    })
}
