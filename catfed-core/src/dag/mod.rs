//! Result graph data model
//!
//! A result graph is a small attributed DAG describing one catalog record:
//!
//! ```text
//! Product (root)
//!   ├── HasCard ──────────► Card        identifier, status, created, modified
//!   ├── HasFile ──────────► File        title, contentType, productSize
//!   ├── HasRelatedFile ───► RelatedFile relatedFileType, relatedFilename
//!   └── HasParameterSet ──► Parameters  (product manager only)
//! ```
//!
//! Graphs are value objects: once handed to a caller nothing flows back.

mod attribute;
mod graph;

pub use attribute::{AttributeKey, AttributeValue, Attributes};
pub use graph::{
    Edge, EdgeKind, Node, NodeId, NodeKind, RecordStatus, RelatedFileRef, RelatedFileType,
    ResultGraph, ResultGraphBuilder,
};
