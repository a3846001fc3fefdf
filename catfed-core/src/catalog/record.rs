//! Catalog records and their projection into result graphs

use chrono::{DateTime, Utc};

use crate::dag::{
    AttributeKey, AttributeValue, Attributes, EdgeKind, NodeKind, RecordStatus, RelatedFileRef,
    RelatedFileType, ResultGraph, ResultGraphBuilder,
};
use crate::delivery::naming;
use crate::error::Result;

/// A record submitted through the ingestion front door
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub title: String,
    pub content_type: String,
    pub source: Option<String>,
    pub product: Vec<u8>,
    pub thumbnail: Option<Vec<u8>>,
    pub attributes: Attributes,
}

impl NewRecord {
    pub fn new(title: impl Into<String>, content_type: impl Into<String>, product: Vec<u8>) -> Self {
        Self {
            title: title.into(),
            content_type: content_type.into(),
            source: None,
            product,
            thumbnail: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_thumbnail(mut self, thumbnail: Vec<u8>) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<AttributeKey>, value: AttributeValue) -> Self {
        self.attributes.insert(key, value);
        self
    }
}

/// A stored catalog record
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub id: String,
    pub status: RecordStatus,
    pub title: String,
    pub content_type: String,
    pub source: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub product: Vec<u8>,
    pub thumbnail: Option<Vec<u8>>,
    /// Attributes with no dedicated field
    pub extra: Attributes,
}

impl CatalogRecord {
    pub(crate) fn from_new(id: String, new: NewRecord, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: RecordStatus::New,
            title: new.title,
            content_type: new.content_type,
            source: new.source.unwrap_or_else(|| "local".to_string()),
            created: now,
            modified: now,
            product: new.product,
            thumbnail: new.thumbnail,
            extra: new.attributes,
        }
    }

    pub fn card_attributes(&self) -> Attributes {
        // Identity and lifecycle attributes always override extras
        self.extra
            .clone()
            .with(AttributeKey::Identifier, AttributeValue::Text(self.id.clone()))
            .with(
                AttributeKey::Status,
                AttributeValue::Enum(self.status.as_str().to_string()),
            )
            .with(AttributeKey::Created, AttributeValue::Timestamp(self.created))
            .with(AttributeKey::Modified, AttributeValue::Timestamp(self.modified))
            .with(AttributeKey::Source, AttributeValue::Text(self.source.clone()))
    }

    pub fn file_attributes(&self) -> Attributes {
        Attributes::new()
            .with(AttributeKey::Title, AttributeValue::Text(self.title.clone()))
            .with(
                AttributeKey::ContentType,
                AttributeValue::Text(self.content_type.clone()),
            )
            .with(
                AttributeKey::ProductSize,
                AttributeValue::Integer(self.product.len() as i64),
            )
    }

    /// Every attribute of the record, used for filter matching
    pub fn attributes(&self) -> Attributes {
        let mut attrs = self.file_attributes();
        attrs.extend(&self.card_attributes());
        attrs
    }

    /// Related files this record can materialize, in enumeration order
    pub fn related_files(&self) -> Vec<RelatedFileRef> {
        RelatedFileType::ALL
            .iter()
            .filter(|file_type| self.related_content(**file_type).is_some())
            .map(|file_type| RelatedFileRef {
                file_type: *file_type,
                filename: naming::related_filename(&self.id, *file_type),
            })
            .collect()
    }

    pub fn related_content(&self, file_type: RelatedFileType) -> Option<&[u8]> {
        match file_type {
            RelatedFileType::Thumbnail => self.thumbnail.as_deref(),
        }
    }

    /// Build the result graph handed to query callers.
    ///
    /// `projection` limits card and file attributes; identifier and status
    /// are always kept.
    pub fn to_graph(&self, projection: Option<&[AttributeKey]>) -> Result<ResultGraph> {
        let project = |attrs: Attributes| match projection {
            Some(keys) => attrs.project(keys),
            None => attrs,
        };

        let mut builder = ResultGraphBuilder::new();
        let root = builder.root();
        builder.add_child(
            root,
            EdgeKind::HasCard,
            NodeKind::Card,
            project(self.card_attributes()),
        );
        builder.add_child(
            root,
            EdgeKind::HasFile,
            NodeKind::File,
            project(self.file_attributes()),
        );
        for related in self.related_files() {
            builder.add_related_file(&related);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CatalogRecord {
        let new = NewRecord::new("harbor.png", "image/png", vec![1, 2, 3])
            .with_thumbnail(vec![9])
            .with_attribute("cloudCover", AttributeValue::Integer(5));
        CatalogRecord::from_new("r1".to_string(), new, Utc::now())
    }

    #[test]
    fn test_graph_carries_identifier_status_and_thumbnail() {
        let graph = record().to_graph(None).unwrap();
        assert_eq!(graph.identifier(), "r1");
        assert_eq!(graph.status(), RecordStatus::New);
        assert_eq!(graph.related_files().len(), 1);
        assert_eq!(graph.related_files()[0].filename, "r1-THUMBNAIL.jpg");
        assert_eq!(
            graph.attribute("cloudCover"),
            Some(&AttributeValue::Integer(5))
        );
        assert_eq!(
            graph.attribute("productSize"),
            Some(&AttributeValue::Integer(3))
        );
    }

    #[test]
    fn test_projection_keeps_identity() {
        let graph = record().to_graph(Some(&[AttributeKey::Title])).unwrap();
        assert!(graph.attribute("title").is_some());
        assert!(graph.attribute("source").is_none());
        assert_eq!(graph.identifier(), "r1");
    }

    #[test]
    fn test_no_thumbnail_no_related_files() {
        let mut record = record();
        record.thumbnail = None;
        assert!(record.related_files().is_empty());
        assert!(record.to_graph(None).unwrap().related_files().is_empty());
    }
}
