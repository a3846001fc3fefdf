//! Order manager - package synthesis and delivery
//!
//! Every order walks the state machine
//!
//! ```text
//! Requested ──► Packaging ──► Delivering ──► Completed
//!     │             │              │
//!     └─────────────┴──────────────┴───────► Failed (terminal, with reason)
//! ```
//!
//! Delivery retries happen inside `Delivering`; the order itself is never
//! re-executed. A package filename that already completed is not uploaded
//! again: the prior result is returned instead. While an order for a
//! package is in progress, an identical order is refused with
//! `ConflictingDelivery`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::package::build_package;
use super::PackageFormat;
use crate::catalog::{CatalogRecord, CatalogStore};
use crate::config::OrderConfig;
use crate::dag::ResultGraph;
use crate::delivery::{naming, DeliveryDispatcher, FilenameLocks, Upload};
use crate::error::{FederationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Requested,
    Packaging,
    Delivering,
    Completed,
    Failed,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Requested => "REQUESTED",
            OrderState::Packaging => "PACKAGING",
            OrderState::Delivering => "DELIVERING",
            OrderState::Completed => "COMPLETED",
            OrderState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Completed | OrderState::Failed)
    }

    /// Whether the state machine allows `self -> next`
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (*self, next),
            (Requested, Packaging)
                | (Packaging, Delivering)
                | (Delivering, Completed)
                | (Requested | Packaging | Delivering, Failed)
        )
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to order. Unset options fall back to the `order` config section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Record identifiers, taken from result graphs
    pub items: Vec<String>,
    #[serde(default)]
    pub format: Option<PackageFormat>,
    #[serde(default)]
    pub include_related_files: Option<bool>,
}

impl OrderRequest {
    pub fn new(items: Vec<String>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn for_graphs<'a>(graphs: impl IntoIterator<Item = &'a ResultGraph>) -> Self {
        Self::new(graphs.into_iter().map(|g| g.identifier().to_string()).collect())
    }

    pub fn with_format(mut self, format: PackageFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_related_files(mut self, include: bool) -> Self {
        self.include_related_files = Some(include);
        self
    }
}

/// Problems found by [`OrderMgr::validate_order`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    Empty,
    DuplicateItem { id: String },
    MissingRecord { id: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::Empty => write!(f, "order has no items"),
            ValidationIssue::DuplicateItem { id } => write!(f, "item '{id}' is listed more than once"),
            ValidationIssue::MissingRecord { id } => write!(f, "record '{id}' does not exist"),
        }
    }
}

/// Outcome of a completed order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderResult {
    pub order_id: String,
    pub filename: String,
    pub status: OrderState,
    pub content_type: String,
    pub location: String,
    /// `sha256:<hex>` of the delivered package
    pub checksum: String,
    pub size: usize,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderTransition {
    pub state: OrderState,
    pub at: DateTime<Utc>,
}

/// Current state of an order plus how it got there
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderStatus {
    pub order_id: String,
    pub filename: String,
    pub state: OrderState,
    /// Set when `state` is `Failed`
    pub reason: Option<String>,
    pub history: Vec<OrderTransition>,
}

pub struct OrderMgr {
    store: Arc<dyn CatalogStore>,
    dispatcher: Arc<DeliveryDispatcher>,
    config: OrderConfig,
    /// Held from the completed-check until the result is recorded
    packages: FilenameLocks,
    orders: Mutex<HashMap<String, OrderStatus>>,
    completed: Mutex<HashMap<String, OrderResult>>,
}

impl OrderMgr {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        dispatcher: Arc<DeliveryDispatcher>,
        config: OrderConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
            packages: FilenameLocks::new(),
            orders: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
        }
    }

    /// Check an order without placing it. An empty list means it would be
    /// accepted as long as the catalog does not change in between.
    pub async fn validate_order(&self, request: &OrderRequest) -> Result<Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        if request.items.is_empty() {
            issues.push(ValidationIssue::Empty);
        }

        let mut seen = HashSet::new();
        for id in &request.items {
            if !seen.insert(id.as_str()) {
                issues.push(ValidationIssue::DuplicateItem { id: id.clone() });
                continue;
            }
            if self.store.get(id).await?.is_none() {
                issues.push(ValidationIssue::MissingRecord { id: id.clone() });
            }
        }
        Ok(issues)
    }

    /// Order the record behind a single result graph
    pub async fn place_order(&self, graph: &ResultGraph) -> Result<OrderResult> {
        self.place(OrderRequest::for_graphs([graph])).await
    }

    /// Package the requested records and deliver the package.
    ///
    /// Fails with `InvalidOrder` or `RecordNotFound` before any state is
    /// recorded; once the order is `Requested` every failure leaves it
    /// `Failed` with the reason.
    pub async fn place(&self, request: OrderRequest) -> Result<OrderResult> {
        let issues = self.validate_order(&request).await?;
        if let Some(ValidationIssue::MissingRecord { id }) = issues
            .iter()
            .find(|issue| matches!(issue, ValidationIssue::MissingRecord { .. }))
        {
            return Err(FederationError::RecordNotFound { id: id.clone() });
        }
        if !issues.is_empty() {
            let reason = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(FederationError::InvalidOrder { reason });
        }

        let format = request.format.unwrap_or(self.config.default_format);
        let include_related = request
            .include_related_files
            .unwrap_or(self.config.include_related_files);
        let filename = naming::order_package_filename(&request.items, format);

        let Some(_package) = self.packages.try_acquire(&filename) else {
            info!("An order for {} is already in progress", filename);
            return Err(FederationError::ConflictingDelivery { filename });
        };
        if let Some(prior) = self.completed_result(&filename) {
            info!(
                "Order for {} already completed as {}; returning prior result",
                filename, prior.order_id
            );
            return Ok(prior);
        }

        let order_id = uuid::Uuid::new_v4().to_string();
        self.record(&order_id, &filename);

        match self
            .fulfil(&order_id, &filename, &request.items, format, include_related)
            .await
        {
            Ok(result) => {
                self.transition(&order_id, OrderState::Completed, None);
                self.completed
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(filename, result.clone());
                Ok(result)
            }
            Err(err) => {
                warn!("Order {} failed: {}", order_id, err);
                self.transition(&order_id, OrderState::Failed, Some(err.to_string()));
                Err(err)
            }
        }
    }

    async fn fulfil(
        &self,
        order_id: &str,
        filename: &str,
        items: &[String],
        format: PackageFormat,
        include_related: bool,
    ) -> Result<OrderResult> {
        self.transition(order_id, OrderState::Packaging, None);
        let mut records: Vec<Arc<CatalogRecord>> = Vec::with_capacity(items.len());
        for id in items {
            let record = self
                .store
                .get(id)
                .await?
                .ok_or_else(|| FederationError::RecordNotFound { id: id.clone() })?;
            records.push(record);
        }
        let refs: Vec<&CatalogRecord> = records.iter().map(|r| r.as_ref()).collect();
        let package = build_package(filename, &refs, format, include_related)?;

        self.transition(order_id, OrderState::Delivering, None);
        let size = package.bytes.len();
        let receipt = self
            .dispatcher
            .deliver(Upload::new(filename, format.content_type(), package.bytes))
            .await?;

        info!(
            "Order {} completed: {} ({} bytes, {})",
            order_id, filename, size, package.checksum
        );
        Ok(OrderResult {
            order_id: order_id.to_string(),
            filename: filename.to_string(),
            status: OrderState::Completed,
            content_type: receipt.content_type,
            location: receipt.location,
            checksum: package.checksum,
            size,
            items: items.to_vec(),
        })
    }

    fn completed_result(&self, filename: &str) -> Option<OrderResult> {
        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(filename)
            .cloned()
    }

    fn record(&self, order_id: &str, filename: &str) {
        let status = OrderStatus {
            order_id: order_id.to_string(),
            filename: filename.to_string(),
            state: OrderState::Requested,
            reason: None,
            history: vec![OrderTransition {
                state: OrderState::Requested,
                at: Utc::now(),
            }],
        };
        self.orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(order_id.to_string(), status);
    }

    fn transition(&self, order_id: &str, next: OrderState, reason: Option<String>) {
        let mut orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
        let Some(status) = orders.get_mut(order_id) else {
            return;
        };
        if !status.state.can_transition_to(next) {
            warn!(
                "Ignoring order {} transition {} -> {}",
                order_id, status.state, next
            );
            return;
        }
        status.state = next;
        status.reason = reason;
        status.history.push(OrderTransition {
            state: next,
            at: Utc::now(),
        });
    }

    pub fn status(&self, order_id: &str) -> Option<OrderStatus> {
        self.orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(order_id)
            .cloned()
    }

    /// Every order placed in this session, oldest first
    pub fn orders(&self) -> Vec<OrderStatus> {
        let mut all: Vec<OrderStatus> = self
            .orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|status| status.history.first().map(|t| t.at));
        all
    }
}
