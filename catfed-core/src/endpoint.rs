//! The federation endpoint - one handle per manager
//!
//! The four managers share the catalog store and a single delivery
//! dispatcher, so product and order uploads go through the same
//! per-filename guard.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::catalog::CatalogStore;
use crate::config::EndpointConfig;
use crate::delivery::{DeliveryDispatcher, DeliveryReceipt, DeliverySink, HttpSink};
use crate::managers::{CatalogMgr, OrderMgr, ProductMgr, StandingQueryMgr};

pub struct Endpoint {
    catalog: Arc<CatalogMgr>,
    product: Arc<ProductMgr>,
    order: Arc<OrderMgr>,
    standing_query: Arc<StandingQueryMgr>,
    dispatcher: Arc<DeliveryDispatcher>,
}

impl Endpoint {
    /// Wire the managers to `store` and `sink`. Must be called inside a
    /// Tokio runtime.
    pub fn new(
        store: Arc<dyn CatalogStore>,
        sink: Arc<dyn DeliverySink>,
        config: EndpointConfig,
    ) -> Self {
        let dispatcher = Arc::new(DeliveryDispatcher::new(sink, config.delivery.clone()));
        info!(
            "Endpoint ready: {} catalog, {} sink",
            store.name(),
            dispatcher.sink_name()
        );

        Self {
            catalog: Arc::new(
                CatalogMgr::new(store.clone(), config.query.clone())
                    .with_callback_config(config.standing_query.clone()),
            ),
            product: Arc::new(ProductMgr::new(store.clone(), dispatcher.clone())),
            order: Arc::new(OrderMgr::new(
                store.clone(),
                dispatcher.clone(),
                config.order.clone(),
            )),
            standing_query: Arc::new(StandingQueryMgr::new(store, config.standing_query)),
            dispatcher,
        }
    }

    /// Endpoint delivering to the HTTP sink named in `config`
    pub fn from_config(store: Arc<dyn CatalogStore>, config: EndpointConfig) -> Result<Self> {
        config.validate()?;
        let sink = Arc::new(HttpSink::new(&config.sink)?);
        Ok(Self::new(store, sink, config))
    }

    pub fn catalog_mgr(&self) -> Arc<CatalogMgr> {
        self.catalog.clone()
    }

    pub fn product_mgr(&self) -> Arc<ProductMgr> {
        self.product.clone()
    }

    pub fn order_mgr(&self) -> Arc<OrderMgr> {
        self.order.clone()
    }

    pub fn standing_query_mgr(&self) -> Arc<StandingQueryMgr> {
        self.standing_query.clone()
    }

    /// Files delivered during this session
    pub fn receipts(&self) -> Vec<DeliveryReceipt> {
        self.dispatcher.receipts()
    }

    /// Tear down the session, cancelling every standing query
    pub fn shutdown(&self) {
        self.standing_query.shutdown();
    }
}
