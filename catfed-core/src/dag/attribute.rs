//! Typed attribute keys and values carried by result graph nodes
//!
//! Known attribute names get their own [`AttributeKey`] variant; anything
//! else is kept as [`AttributeKey::Other`] so unknown attributes round-trip
//! untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Name of an attribute on a result graph node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AttributeKey {
    Identifier,
    Status,
    Title,
    ContentType,
    Created,
    Modified,
    Source,
    ProductSize,
    RelatedFileType,
    RelatedFilename,
    Other(String),
}

impl AttributeKey {
    pub fn as_str(&self) -> &str {
        match self {
            AttributeKey::Identifier => "identifier",
            AttributeKey::Status => "status",
            AttributeKey::Title => "title",
            AttributeKey::ContentType => "contentType",
            AttributeKey::Created => "created",
            AttributeKey::Modified => "modified",
            AttributeKey::Source => "source",
            AttributeKey::ProductSize => "productSize",
            AttributeKey::RelatedFileType => "relatedFileType",
            AttributeKey::RelatedFilename => "relatedFilename",
            AttributeKey::Other(name) => name,
        }
    }

    /// Identifier and status survive every projection
    pub fn is_mandatory(&self) -> bool {
        matches!(self, AttributeKey::Identifier | AttributeKey::Status)
    }
}

impl From<&str> for AttributeKey {
    fn from(name: &str) -> Self {
        match name {
            "identifier" => AttributeKey::Identifier,
            "status" => AttributeKey::Status,
            "title" => AttributeKey::Title,
            "contentType" => AttributeKey::ContentType,
            "created" => AttributeKey::Created,
            "modified" => AttributeKey::Modified,
            "source" => AttributeKey::Source,
            "productSize" => AttributeKey::ProductSize,
            "relatedFileType" => AttributeKey::RelatedFileType,
            "relatedFilename" => AttributeKey::RelatedFilename,
            other => AttributeKey::Other(other.to_string()),
        }
    }
}

impl From<String> for AttributeKey {
    fn from(name: String) -> Self {
        AttributeKey::from(name.as_str())
    }
}

impl From<AttributeKey> for String {
    fn from(key: AttributeKey) -> Self {
        key.as_str().to_string()
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Text(String),
    /// Member of a closed vocabulary, e.g. a record status
    Enum(String),
    Timestamp(DateTime<Utc>),
    Integer(i64),
    Real(f64),
    Boolean(bool),
}

impl AttributeValue {
    /// String form used by equality and `like` matching
    pub fn as_text(&self) -> String {
        match self {
            AttributeValue::Text(s) | AttributeValue::Enum(s) => s.clone(),
            AttributeValue::Timestamp(t) => t.to_rfc3339(),
            AttributeValue::Integer(i) => i.to_string(),
            AttributeValue::Real(r) => r.to_string(),
            AttributeValue::Boolean(b) => b.to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(i) => Some(*i as f64),
            AttributeValue::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Order two values of compatible kinds; mixed kinds fall back to text
    pub fn compare(&self, other: &AttributeValue) -> Ordering {
        match (self, other) {
            (AttributeValue::Timestamp(a), AttributeValue::Timestamp(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.as_text().cmp(&b.as_text()),
            },
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// Attribute map of one node, ordered by key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<AttributeKey, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<AttributeKey>, value: AttributeValue) {
        self.0.insert(key.into(), value);
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<AttributeKey>, value: AttributeValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &AttributeKey) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    /// Look up by wire name, e.g. `"identifier"`
    pub fn get_named(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(&AttributeKey::from(name))
    }

    pub fn text(&self, key: &AttributeKey) -> Option<String> {
        self.get(key).map(AttributeValue::as_text)
    }

    pub fn contains(&self, key: &AttributeKey) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttributeKey, &AttributeValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy entries from `other`, overwriting keys present in both
    pub fn extend(&mut self, other: &Attributes) {
        for (key, value) in other.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Keep only `keys` plus the mandatory identifier and status
    pub fn project(&self, keys: &[AttributeKey]) -> Attributes {
        Attributes(
            self.0
                .iter()
                .filter(|(key, _)| key.is_mandatory() || keys.contains(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown_keys() {
        assert_eq!(AttributeKey::from("identifier"), AttributeKey::Identifier);
        assert_eq!(AttributeKey::from("status"), AttributeKey::Status);
        assert_eq!(
            AttributeKey::from("cloudCover"),
            AttributeKey::Other("cloudCover".to_string())
        );
        assert_eq!(AttributeKey::Other("cloudCover".into()).as_str(), "cloudCover");
    }

    #[test]
    fn test_unknown_attribute_survives_json() {
        let attrs = Attributes::new()
            .with(AttributeKey::Identifier, AttributeValue::Text("r1".into()))
            .with("cloudCover", AttributeValue::Integer(12));

        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json["cloudCover"]["type"], "integer");
        assert_eq!(json["cloudCover"]["value"], 12);

        let back: Attributes = serde_json::from_value(json).unwrap();
        assert_eq!(back, attrs);
    }

    #[test]
    fn test_compare_mixed_numbers() {
        let a = AttributeValue::Integer(3);
        let b = AttributeValue::Real(3.5);
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(
            AttributeValue::Text("b".into()).compare(&AttributeValue::Text("a".into())),
            Ordering::Greater
        );
    }

    #[test]
    fn test_project_keeps_mandatory() {
        let attrs = Attributes::new()
            .with(AttributeKey::Identifier, AttributeValue::Text("r1".into()))
            .with(AttributeKey::Status, AttributeValue::Enum("NEW".into()))
            .with(AttributeKey::Title, AttributeValue::Text("scene".into()))
            .with(AttributeKey::Source, AttributeValue::Text("local".into()));

        let projected = attrs.project(&[AttributeKey::Title]);
        assert_eq!(projected.len(), 3);
        assert!(projected.contains(&AttributeKey::Identifier));
        assert!(projected.contains(&AttributeKey::Status));
        assert!(!projected.contains(&AttributeKey::Source));
    }
}
