//! Catalog manager - hit counts and one-shot queries
//!
//! Results come back to the caller, or with
//! [`submit_query_to`](CatalogMgr::submit_query_to) are pushed to a
//! callback one graph at a time.

use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::callback::{check_reachable, notify_with_retry, Callback, Notified};
use crate::catalog::{CatalogRecord, CatalogStore};
use crate::config::{QueryConfig, StandingQueryConfig};
use crate::dag::ResultGraph;
use crate::error::{FederationError, Result};
use crate::query::{Query, QueryBound, SortAttribute, SortOrder, SubmitOptions};

/// Outcome of a query delivered through a callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryDelivery {
    /// Passed to the callback with every graph
    pub request_id: String,
    pub delivered: usize,
}

pub struct CatalogMgr {
    store: Arc<dyn CatalogStore>,
    config: QueryConfig,
    /// Timeout and retry budget for callback delivery
    callbacks: StandingQueryConfig,
}

impl CatalogMgr {
    pub fn new(store: Arc<dyn CatalogStore>, config: QueryConfig) -> Self {
        Self {
            store,
            config,
            callbacks: StandingQueryConfig::default(),
        }
    }

    pub fn with_callback_config(mut self, callbacks: StandingQueryConfig) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Bound applied when the caller has none of its own
    pub fn default_bound(&self) -> QueryBound {
        QueryBound::AtMost(self.config.default_bound)
    }

    /// Number of matching records; no graphs are built
    #[instrument(skip(self), fields(filter = %query.filter))]
    pub async fn hit_count(&self, query: &Query) -> Result<usize> {
        let filter = query.compile()?;
        let count = self.store.count(&filter).await?;
        debug!("{} hit(s) in {} catalog", count, self.store.name());
        Ok(count)
    }

    /// Run `query` and return at most `bound` graphs in ascending
    /// identifier order
    pub async fn submit_query(&self, query: &Query, bound: QueryBound) -> Result<Vec<ResultGraph>> {
        self.submit_query_with(query, &SubmitOptions::bounded(bound))
            .await
    }

    /// Run `query` with sorting and attribute projection.
    ///
    /// `AtMost` bounds are clamped to `query.max_bound`; `Unbounded` is
    /// honored so the result always agrees with [`hit_count`](Self::hit_count).
    #[instrument(skip(self, options), fields(filter = %query.filter))]
    pub async fn submit_query_with(
        &self,
        query: &Query,
        options: &SubmitOptions,
    ) -> Result<Vec<ResultGraph>> {
        let filter = query.compile()?;
        let mut records = self.store.search(&filter).await?;

        if !options.sort.is_empty() {
            records.sort_by(|a, b| compare_records(a, b, &options.sort));
        }

        let limit = options
            .bound
            .limit()
            .map(|n| n.min(self.config.max_bound));
        if let Some(limit) = limit {
            records.truncate(limit);
        }

        let projection = options.result_attributes.as_deref();
        let graphs = records
            .iter()
            .map(|record| record.to_graph(projection))
            .collect::<Result<Vec<_>>>()?;

        debug!("Query returned {} graph(s)", graphs.len());
        Ok(graphs)
    }

    /// Run `query` and push each of at most `bound` graphs to `callback`
    /// instead of returning them.
    ///
    /// Graphs go out one at a time in result order, each with the callback
    /// timeout and retry budget; the call returns once all are
    /// acknowledged. Fails with `InvalidQuery` before contacting the
    /// callback, and with `CallbackUnreachable` if the ping fails or a
    /// graph exhausts its attempts.
    #[instrument(skip(self, callback), fields(filter = %query.filter))]
    pub async fn submit_query_to(
        &self,
        query: &Query,
        bound: QueryBound,
        callback: Arc<dyn Callback>,
    ) -> Result<QueryDelivery> {
        query.compile()?;
        check_reachable(callback.as_ref(), &self.callbacks).await?;
        let graphs = self.submit_query(query, bound).await?;

        let request_id = uuid::Uuid::new_v4().to_string();
        for (delivered, graph) in graphs.iter().enumerate() {
            let outcome =
                notify_with_retry(callback.as_ref(), &request_id, graph, &self.callbacks, || true)
                    .await;
            let reason = match outcome {
                Notified::Delivered { .. } => continue,
                Notified::Failed { attempts, reason } => format!(
                    "gave up on {} after {} attempt(s): {}",
                    graph.identifier(),
                    attempts,
                    reason
                ),
                Notified::Abandoned => format!("delivery of {} abandoned", graph.identifier()),
            };
            warn!(
                "Query {} stopped after {} of {} result(s): {}",
                request_id,
                delivered,
                graphs.len(),
                reason
            );
            return Err(FederationError::CallbackUnreachable {
                target: callback.target(),
                reason: format!("{delivered} of {} result(s) delivered; {reason}", graphs.len()),
            });
        }

        info!(
            "Query {} pushed {} result(s) to {}",
            request_id,
            graphs.len(),
            callback.target()
        );
        Ok(QueryDelivery {
            request_id,
            delivered: graphs.len(),
        })
    }
}

/// Sort keys in turn, then identifier. A record missing a sort attribute
/// comes after every record that has it, whichever the direction.
fn compare_records(a: &CatalogRecord, b: &CatalogRecord, sort: &[SortAttribute]) -> Ordering {
    let (attrs_a, attrs_b) = (a.attributes(), b.attributes());
    for key in sort {
        let ordering = match (attrs_a.get(&key.key), attrs_b.get(&key.key)) {
            (Some(x), Some(y)) => match key.order {
                SortOrder::Ascending => x.compare(y),
                SortOrder::Descending => y.compare(x),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.id.cmp(&b.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, NewRecord};
    use crate::dag::{AttributeKey, AttributeValue};

    fn seeded() -> (Arc<InMemoryCatalog>, CatalogMgr) {
        let catalog = Arc::new(InMemoryCatalog::new());
        for (id, cloud) in [("a", 30), ("b", 10), ("c", 20)] {
            catalog.ingest_with_id(
                id,
                NewRecord::new(format!("{id}.png"), "image/png", vec![0; 4])
                    .with_attribute("cloudCover", AttributeValue::Integer(cloud)),
            );
        }
        let mgr = CatalogMgr::new(catalog.clone(), QueryConfig::default());
        (catalog, mgr)
    }

    fn ids(graphs: &[ResultGraph]) -> Vec<&str> {
        graphs.iter().map(|g| g.identifier()).collect()
    }

    #[tokio::test]
    async fn test_hit_count_matches_unbounded_query() {
        let (_, mgr) = seeded();
        for filter in ["identifier like '%'", "cloudCover > 15", "title = 'none'"] {
            let query = Query::new(filter);
            let count = mgr.hit_count(&query).await.unwrap();
            let graphs = mgr.submit_query(&query, QueryBound::Unbounded).await.unwrap();
            assert_eq!(count, graphs.len(), "filter {filter}");
        }
    }

    #[tokio::test]
    async fn test_bound_and_default_order() {
        let (_, mgr) = seeded();
        let graphs = mgr
            .submit_query(&Query::all(), QueryBound::AtMost(2))
            .await
            .unwrap();
        assert_eq!(ids(&graphs), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_bound_is_clamped() {
        let catalog = Arc::new(InMemoryCatalog::new());
        for i in 0..5 {
            catalog.ingest(NewRecord::new(format!("{i}"), "text/plain", vec![]));
        }
        let mgr = CatalogMgr::new(
            catalog,
            QueryConfig {
                default_bound: 1,
                max_bound: 3,
            },
        );
        let graphs = mgr
            .submit_query(&Query::all(), QueryBound::AtMost(100))
            .await
            .unwrap();
        assert_eq!(graphs.len(), 3);
        assert_eq!(mgr.default_bound(), QueryBound::AtMost(1));
    }

    #[tokio::test]
    async fn test_sort_and_projection() {
        let (_, mgr) = seeded();
        let options = SubmitOptions::bounded(QueryBound::Unbounded)
            .sorted_by(SortAttribute::descending(AttributeKey::from("cloudCover")))
            .with_attributes(vec![AttributeKey::Title]);
        let graphs = mgr.submit_query_with(&Query::all(), &options).await.unwrap();

        assert_eq!(ids(&graphs), vec!["a", "c", "b"]);
        assert!(graphs[0].attribute("title").is_some());
        assert!(graphs[0].attribute("cloudCover").is_none());
        assert!(graphs[0].attribute("status").is_some());
    }

    #[tokio::test]
    async fn test_invalid_query_and_outage() {
        let (catalog, mgr) = seeded();
        assert!(matches!(
            mgr.hit_count(&Query::new("title = ")).await,
            Err(FederationError::InvalidQuery { .. })
        ));

        catalog.set_available(false);
        let err = mgr
            .submit_query(&Query::all(), QueryBound::Unbounded)
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::CatalogUnavailable { .. }));
    }
}
