//! Result graph - attributed DAG describing one catalog record

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::attribute::{AttributeKey, AttributeValue, Attributes};
use crate::error::{FederationError, Result};

/// Lifecycle status of a catalog record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    New,
    Changed,
    Obsolete,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::New => "NEW",
            RecordStatus::Changed => "CHANGED",
            RecordStatus::Obsolete => "OBSOLETE",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(RecordStatus::New),
            "CHANGED" => Ok(RecordStatus::Changed),
            "OBSOLETE" => Ok(RecordStatus::Obsolete),
            other => Err(format!("Unknown record status: {other}")),
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a file related to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelatedFileType {
    Thumbnail,
}

impl RelatedFileType {
    /// Every type, in the order related files are enumerated
    pub const ALL: [RelatedFileType; 1] = [RelatedFileType::Thumbnail];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelatedFileType::Thumbnail => "THUMBNAIL",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            RelatedFileType::Thumbnail => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            RelatedFileType::Thumbnail => "jpg",
        }
    }
}

impl fmt::Display for RelatedFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (type, filename) pair attached to a result graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedFileRef {
    pub file_type: RelatedFileType,
    pub filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Root of every graph
    Product,
    /// Identity and lifecycle of the record
    Card,
    /// The product file itself
    File,
    RelatedFile,
    /// Full detailed attribute set returned by the product manager
    Parameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    HasCard,
    HasFile,
    HasRelatedFile,
    HasParameterSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

/// Immutable attributed graph for one record.
///
/// Built through [`ResultGraphBuilder`], which guarantees the graph carries
/// an identifier and a known status. Decoding goes through the same checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EncodedGraph")]
pub struct ResultGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    identifier: String,
    status: RecordStatus,
}

impl ResultGraph {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Children of `parent` reached through edges of `kind`
    pub fn children(&self, parent: NodeId, kind: EdgeKind) -> impl Iterator<Item = &Node> {
        self.edges
            .iter()
            .filter(move |e| e.from == parent && e.kind == kind)
            .filter_map(move |e| self.node(e.to))
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    /// First value of `name` found walking nodes in insertion order
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        let key = AttributeKey::from(name);
        self.nodes.iter().find_map(|n| n.attributes.get(&key))
    }

    /// Every attribute of every node, flattened; earlier nodes win on clashes
    pub fn flattened(&self) -> Attributes {
        let mut flat = Attributes::new();
        for node in self.nodes.iter().rev() {
            flat.extend(&node.attributes);
        }
        flat
    }

    /// Related file references in graph order
    pub fn related_files(&self) -> Vec<RelatedFileRef> {
        self.children(self.root().id, EdgeKind::HasRelatedFile)
            .filter_map(|node| {
                let file_type = match node.attributes.get(&AttributeKey::RelatedFileType)? {
                    AttributeValue::Enum(t) if t == RelatedFileType::Thumbnail.as_str() => {
                        RelatedFileType::Thumbnail
                    }
                    _ => return None,
                };
                let filename = node.attributes.text(&AttributeKey::RelatedFilename)?;
                Some(RelatedFileRef {
                    file_type,
                    filename,
                })
            })
            .collect()
    }
}

/// Wire shape of a [`ResultGraph`]; identifier and status are derived
#[derive(Deserialize)]
struct EncodedGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl TryFrom<EncodedGraph> for ResultGraph {
    type Error = FederationError;

    fn try_from(encoded: EncodedGraph) -> Result<Self> {
        let malformed = |reason: String| FederationError::MalformedGraph { reason };

        match encoded.nodes.first() {
            Some(root) if root.kind == NodeKind::Product => {}
            Some(root) => {
                return Err(malformed(format!(
                    "first node must be the product, got {:?}",
                    root.kind
                )))
            }
            None => return Err(malformed("graph has no nodes".to_string())),
        }
        if let Some((index, node)) = encoded
            .nodes
            .iter()
            .enumerate()
            .find(|(index, node)| node.id.0 != *index)
        {
            return Err(malformed(format!(
                "node at position {index} has id {}",
                node.id.0
            )));
        }
        let count = encoded.nodes.len();
        if let Some(edge) = encoded
            .edges
            .iter()
            .find(|e| e.from.0 >= count || e.to.0 >= count)
        {
            return Err(malformed(format!(
                "edge {} -> {} leaves the graph of {count} node(s)",
                edge.from.0, edge.to.0
            )));
        }

        ResultGraphBuilder {
            nodes: encoded.nodes,
            edges: encoded.edges,
        }
        .build()
    }
}

/// Builds a [`ResultGraph`] rooted at a product node
#[derive(Debug)]
pub struct ResultGraphBuilder {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Default for ResultGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultGraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                id: NodeId(0),
                kind: NodeKind::Product,
                attributes: Attributes::new(),
            }],
            edges: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Attach a new node under `parent`
    pub fn add_child(
        &mut self,
        parent: NodeId,
        edge: EdgeKind,
        kind: NodeKind,
        attributes: Attributes,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            kind,
            attributes,
        });
        self.edges.push(Edge {
            from: parent,
            to: id,
            kind: edge,
        });
        id
    }

    pub fn add_related_file(&mut self, file: &RelatedFileRef) -> NodeId {
        let attributes = Attributes::new()
            .with(
                AttributeKey::RelatedFileType,
                AttributeValue::Enum(file.file_type.as_str().to_string()),
            )
            .with(
                AttributeKey::RelatedFilename,
                AttributeValue::Text(file.filename.clone()),
            );
        let root = self.root();
        self.add_child(root, EdgeKind::HasRelatedFile, NodeKind::RelatedFile, attributes)
    }

    /// Finish the graph, checking identifier and status are present
    pub fn build(self) -> Result<ResultGraph> {
        let find = |key: &AttributeKey| {
            self.nodes
                .iter()
                .find_map(|n| n.attributes.get(key))
                .cloned()
        };

        let identifier = match find(&AttributeKey::Identifier) {
            Some(value) => value.as_text(),
            None => {
                return Err(FederationError::MalformedGraph {
                    reason: "missing identifier attribute".to_string(),
                })
            }
        };

        let status = match find(&AttributeKey::Status) {
            Some(AttributeValue::Enum(s)) => {
                s.parse::<RecordStatus>()
                    .map_err(|reason| FederationError::MalformedGraph { reason })?
            }
            Some(other) => {
                return Err(FederationError::MalformedGraph {
                    reason: format!("status must be an enum value, got '{other}'"),
                })
            }
            None => {
                return Err(FederationError::MalformedGraph {
                    reason: format!("record '{identifier}' has no status attribute"),
                })
            }
        };

        Ok(ResultGraph {
            nodes: self.nodes,
            edges: self.edges,
            identifier,
            status,
        })
    }
}
