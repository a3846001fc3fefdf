//! Product manager - detailed parameters and related files

use std::sync::Arc;
use tracing::debug;

use crate::catalog::{CatalogRecord, CatalogStore};
use crate::dag::{
    AttributeKey, EdgeKind, NodeKind, RelatedFileType, ResultGraph, ResultGraphBuilder,
};
use crate::delivery::{DeliveryDispatcher, Upload};
use crate::error::{FederationError, Result};

pub struct ProductMgr {
    store: Arc<dyn CatalogStore>,
    dispatcher: Arc<DeliveryDispatcher>,
}

impl ProductMgr {
    pub fn new(store: Arc<dyn CatalogStore>, dispatcher: Arc<DeliveryDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Look up the record behind `graph`; a deleted record is a stale
    /// reference, reported as `RecordNotFound`
    async fn resolve(&self, graph: &ResultGraph) -> Result<Arc<CatalogRecord>> {
        let id = graph.identifier();
        self.store
            .get(id)
            .await?
            .ok_or_else(|| FederationError::RecordNotFound { id: id.to_string() })
    }

    /// Full attribute set of the record behind `graph`, as a graph with a
    /// single parameter-set node. `desired` narrows the attributes;
    /// identifier and status are always present.
    pub async fn parameters(
        &self,
        graph: &ResultGraph,
        desired: Option<&[AttributeKey]>,
    ) -> Result<ResultGraph> {
        let record = self.resolve(graph).await?;
        let attributes = match desired {
            Some(keys) => record.attributes().project(keys),
            None => record.attributes(),
        };

        let mut builder = ResultGraphBuilder::new();
        let root = builder.root();
        builder.add_child(root, EdgeKind::HasParameterSet, NodeKind::Parameters, attributes);
        for related in record.related_files() {
            builder.add_related_file(&related);
        }
        builder.build()
    }

    /// Related file roles, in the same order as [`related_files`](Self::related_files)
    pub async fn related_file_types(&self, graph: &ResultGraph) -> Result<Vec<RelatedFileType>> {
        let record = self.resolve(graph).await?;
        Ok(record
            .related_files()
            .into_iter()
            .map(|related| related.file_type)
            .collect())
    }

    /// Related filenames. Each file is on the sink before its name is
    /// returned; a file already delivered is not uploaded again.
    pub async fn related_files(&self, graph: &ResultGraph) -> Result<Vec<String>> {
        let record = self.resolve(graph).await?;
        let mut filenames = Vec::new();

        for related in record.related_files() {
            let Some(content) = record.related_content(related.file_type) else {
                continue;
            };
            let upload = Upload::new(
                related.filename.clone(),
                related.file_type.content_type(),
                content.to_vec(),
            );
            self.dispatcher.deliver_once(upload).await?;
            filenames.push(related.filename);
        }

        debug!(
            "Resolved {} related file(s) for {}",
            filenames.len(),
            record.id
        );
        Ok(filenames)
    }
}
