//! Catalog federation endpoint
//!
//! Exposes a catalog through four managers:
//!
//! - catalog: hit counts and bounded queries returning result graphs
//! - product: detailed parameters and related files (delivered to a sink)
//! - order: tar packages of ordered records, delivered to a sink
//! - standing query: subscriptions pushed to callbacks as records change
//!
//! Start with [`Endpoint::new`].

pub mod catalog;
pub mod config;
pub mod dag;
pub mod delivery;
pub mod endpoint;
pub mod error;
pub mod managers;
pub mod query;

pub use endpoint::Endpoint;
pub use error::{FederationError, Result};
