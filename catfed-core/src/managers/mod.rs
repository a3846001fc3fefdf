//! The four protocol-facing managers
//!
//! - [`CatalogMgr`]: hit counts and one-shot queries, returned or pushed
//!   to a [`Callback`]
//! - [`ProductMgr`]: detailed parameters and related files
//! - [`OrderMgr`]: package synthesis and delivery
//! - [`StandingQueryMgr`]: long-lived subscriptions pushed to callbacks
//!
//! All four are safe to call concurrently through shared `Arc` handles.

mod callback;
mod catalog_mgr;
mod order_mgr;
mod package;
mod product_mgr;
mod standing_query;

pub use callback::{Callback, HttpCallback};
pub use catalog_mgr::{CatalogMgr, QueryDelivery};
pub use order_mgr::{
    OrderMgr, OrderRequest, OrderResult, OrderState, OrderStatus, OrderTransition,
    ValidationIssue,
};
pub use package::{build_package, Package};
pub use product_mgr::ProductMgr;
pub use standing_query::{
    Lifespan, StandingQueryMgr, SubscriptionFailure, SubscriptionState, SubscriptionStatus,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Archive format of an order package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageFormat {
    #[default]
    Tar,
    TarGz,
}

impl PackageFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            PackageFormat::Tar => "application/x-tar",
            PackageFormat::TarGz => "application/gzip",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            PackageFormat::Tar => "tar",
            PackageFormat::TarGz => "tar.gz",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageFormat::Tar => "tar",
            PackageFormat::TarGz => "tar-gz",
        }
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tar" => Ok(PackageFormat::Tar),
            "tar-gz" | "tar.gz" | "tgz" => Ok(PackageFormat::TarGz),
            other => Err(format!("Unknown package format '{other}' (expected tar or tar-gz)")),
        }
    }
}
