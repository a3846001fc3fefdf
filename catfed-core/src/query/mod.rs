//! Queries - filter expressions plus result-set bounds
//!
//! A [`Query`] is owned by the caller and stateless; compiling it never
//! touches the catalog, so re-issuing a query has no side effects.

mod filter;
mod parser;

pub use filter::{Comparison, Filter, Literal};
pub use parser::parse;

use serde::{Deserialize, Serialize};

use crate::dag::AttributeKey;
use crate::error::Result;

/// A filter expression as submitted by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub filter: String,
}

impl Query {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
        }
    }

    /// Query matching every record
    pub fn all() -> Self {
        Self::new("identifier like '%'")
    }

    /// Compile the filter, failing with `InvalidQuery` on syntax errors
    pub fn compile(&self) -> Result<Filter> {
        parse(&self.filter)
    }
}

/// Upper bound on the number of result graphs returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryBound {
    Unbounded,
    AtMost(usize),
}

impl QueryBound {
    pub fn limit(&self) -> Option<usize> {
        match self {
            QueryBound::Unbounded => None,
            QueryBound::AtMost(n) => Some(*n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortAttribute {
    pub key: AttributeKey,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortAttribute {
    pub fn ascending(key: AttributeKey) -> Self {
        Self {
            key,
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(key: AttributeKey) -> Self {
        Self {
            key,
            order: SortOrder::Descending,
        }
    }
}

/// Options for `SubmitQuery` beyond the filter itself.
///
/// Results are ordered by `sort` keys in turn, then by ascending identifier.
/// `result_attributes`, when set, restricts the attributes returned; the
/// identifier and status are always kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOptions {
    pub bound: QueryBound,
    #[serde(default)]
    pub sort: Vec<SortAttribute>,
    #[serde(default)]
    pub result_attributes: Option<Vec<AttributeKey>>,
}

impl SubmitOptions {
    pub fn bounded(bound: QueryBound) -> Self {
        Self {
            bound,
            sort: Vec::new(),
            result_attributes: None,
        }
    }

    pub fn sorted_by(mut self, sort: SortAttribute) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn with_attributes(mut self, keys: Vec<AttributeKey>) -> Self {
        self.result_attributes = Some(keys);
        self
    }
}
