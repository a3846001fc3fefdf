//! Catalog and product manager behavior against an in-memory catalog and a
//! recording sink

mod common;

use catfed_core::dag::{AttributeKey, AttributeValue, RecordStatus, RelatedFileType};
use catfed_core::query::{Query, QueryBound, SortAttribute, SubmitOptions};
use catfed_core::FederationError;
use common::{harness, image_record, RecordingCallback};
use pretty_assertions::assert_eq;

// ============================================================================
// Ingest -> query scenario
// ============================================================================

#[tokio::test]
async fn test_ingest_then_query_scenario() {
    let h = harness();
    h.catalog.ingest_with_id("R1", image_record("harbor.png"));

    let catalog = h.endpoint.catalog_mgr();
    let graphs = catalog
        .submit_query(&Query::all(), QueryBound::Unbounded)
        .await
        .unwrap();
    assert_eq!(graphs.len(), 1);

    let graph = &graphs[0];
    assert_eq!(graph.identifier(), "R1");
    assert_eq!(graph.status(), RecordStatus::New);

    let product = h.endpoint.product_mgr();
    let types = product.related_file_types(graph).await.unwrap();
    let files = product.related_files(graph).await.unwrap();
    assert_eq!(types, vec![RelatedFileType::Thumbnail]);
    assert_eq!(files, vec!["R1-THUMBNAIL.jpg".to_string()]);

    // The PUT happened before related_files returned
    assert_eq!(
        h.sink.puts(),
        vec![("R1-THUMBNAIL.jpg".to_string(), "image/jpeg".to_string())]
    );
    let upload = &h.sink.uploads()[0];
    assert_eq!(upload.body, b"thumb:harbor.png");
}

#[tokio::test]
async fn test_related_files_delivered_once_across_calls() {
    let h = harness();
    let record = h.catalog.ingest_with_id("R1", image_record("harbor.png"));
    let graph = record.to_graph(None).unwrap();
    let product = h.endpoint.product_mgr();

    let (a, b) = tokio::join!(product.related_files(&graph), product.related_files(&graph));
    assert_eq!(a.unwrap(), b.unwrap());
    product.related_files(&graph).await.unwrap();

    assert_eq!(h.sink.uploads_named("R1-THUMBNAIL.jpg"), 1);
    let receipts = h.endpoint.receipts();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].location, "http://sink.test/file/R1-THUMBNAIL.jpg");
}

// ============================================================================
// Hit counts and ordering
// ============================================================================

#[tokio::test]
async fn test_hit_count_equals_unbounded_query_length() {
    let h = harness();
    for (id, cover) in [("a", 5), ("b", 55), ("c", 25), ("d", 80)] {
        h.catalog.ingest_with_id(
            id,
            image_record(&format!("{id}.png"))
                .with_attribute("cloudCover", AttributeValue::Integer(cover)),
        );
    }
    h.catalog.retire("d").unwrap();

    let catalog = h.endpoint.catalog_mgr();
    for filter in [
        "identifier like '%'",
        "cloudCover >= 25",
        "cloudCover < 30 and title like 'a%'",
        "status = 'OBSOLETE' or cloudCover = 5",
        "not exists cloudCover",
    ] {
        let query = Query::new(filter);
        let hits = catalog.hit_count(&query).await.unwrap();
        let graphs = catalog
            .submit_query(&query, QueryBound::Unbounded)
            .await
            .unwrap();
        assert_eq!(hits, graphs.len(), "filter: {filter}");
    }
}

#[tokio::test]
async fn test_results_reproducible_while_catalog_unchanged() {
    let h = harness();
    for id in ["r3", "r1", "r2"] {
        h.catalog.ingest_with_id(id, image_record(id));
    }
    let catalog = h.endpoint.catalog_mgr();

    let first = catalog
        .submit_query(&Query::all(), QueryBound::AtMost(10))
        .await
        .unwrap();
    let second = catalog
        .submit_query(&Query::all(), QueryBound::AtMost(10))
        .await
        .unwrap();
    assert_eq!(first, second);

    let ids: Vec<&str> = first.iter().map(|g| g.identifier()).collect();
    assert_eq!(ids, vec!["r1", "r2", "r3"]);
}

#[tokio::test]
async fn test_sorted_projected_query() {
    let h = harness();
    h.catalog.ingest_with_id("a", image_record("zebra.png"));
    h.catalog.ingest_with_id("b", image_record("apple.png"));

    let options = SubmitOptions::bounded(QueryBound::AtMost(1))
        .sorted_by(SortAttribute::ascending(AttributeKey::Title))
        .with_attributes(vec![AttributeKey::Title]);
    let graphs = h
        .endpoint
        .catalog_mgr()
        .submit_query_with(&Query::all(), &options)
        .await
        .unwrap();

    assert_eq!(graphs.len(), 1);
    assert_eq!(graphs[0].identifier(), "b");
    assert!(graphs[0].attribute("contentType").is_none());
}

// ============================================================================
// Product manager
// ============================================================================

#[tokio::test]
async fn test_parameters_match_query_graph() {
    let h = harness();
    h.catalog.ingest_with_id("R1", image_record("harbor.png"));
    h.catalog.ingest_with_id("R2", image_record("bay.png"));
    h.catalog.retire("R2").unwrap();

    let graphs = h
        .endpoint
        .catalog_mgr()
        .submit_query(&Query::all(), QueryBound::Unbounded)
        .await
        .unwrap();
    let product = h.endpoint.product_mgr();
    for graph in &graphs {
        let params = product.parameters(graph, None).await.unwrap();
        assert_eq!(params.identifier(), graph.identifier());
        assert_eq!(params.status(), graph.status());
        assert_eq!(params.attribute("title"), graph.attribute("title"));
    }
    assert_eq!(graphs[1].status(), RecordStatus::Obsolete);
}

#[tokio::test]
async fn test_stale_graph_reports_record_not_found() {
    let h = harness();
    let record = h.catalog.ingest_with_id("R1", image_record("harbor.png"));
    let graph = record.to_graph(None).unwrap();
    h.catalog.delete("R1");

    let product = h.endpoint.product_mgr();
    match product.parameters(&graph, None).await {
        Err(FederationError::RecordNotFound { id }) => assert_eq!(id, "R1"),
        other => panic!("expected RecordNotFound, got {other:?}"),
    }
    assert!(h.sink.puts().is_empty());
}

#[tokio::test]
async fn test_catalog_outage_is_retryable() {
    let h = harness();
    h.catalog.ingest_with_id("R1", image_record("harbor.png"));
    h.catalog.set_available(false);

    let err = h
        .endpoint
        .catalog_mgr()
        .hit_count(&Query::all())
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::CatalogUnavailable { .. }));
    assert!(err.is_retryable());

    h.catalog.set_available(true);
    assert_eq!(
        h.endpoint.catalog_mgr().hit_count(&Query::all()).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_malformed_filter_is_invalid_query() {
    let h = harness();
    let err = h
        .endpoint
        .catalog_mgr()
        .submit_query(&Query::new("title = 'open"), QueryBound::Unbounded)
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::InvalidQuery { .. }));
    assert!(!err.is_retryable());
}

// ============================================================================
// Query results pushed to a callback
// ============================================================================

#[tokio::test]
async fn test_query_results_delivered_to_callback() {
    let h = harness();
    h.catalog.ingest_with_id("R1", image_record("harbor.png"));
    h.catalog.ingest_with_id("R2", image_record("bay.png"));
    let callback = RecordingCallback::new();

    let delivery = h
        .endpoint
        .catalog_mgr()
        .submit_query_to(
            &Query::new("title = 'harbor.png'"),
            QueryBound::Unbounded,
            callback.clone(),
        )
        .await
        .unwrap();

    assert_eq!(delivery.delivered, 1);
    let invocations = callback.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].identifier, "R1");
    assert_eq!(invocations[0].status, "NEW");
    assert_eq!(invocations[0].subscription_id, delivery.request_id);
}

#[tokio::test]
async fn test_callback_query_keeps_result_order_and_bound() {
    let h = harness();
    for id in ["R3", "R1", "R2"] {
        h.catalog.ingest_with_id(id, image_record(id));
    }
    let callback = RecordingCallback::new();
    // One transient failure is retried
    callback.fail_next(1);

    let delivery = h
        .endpoint
        .catalog_mgr()
        .submit_query_to(&Query::all(), QueryBound::AtMost(2), callback.clone())
        .await
        .unwrap();

    assert_eq!(delivery.delivered, 2);
    assert_eq!(callback.identifiers(), vec!["R1", "R2"]);
}

#[tokio::test]
async fn test_callback_query_failures() {
    let h = harness();
    h.catalog.ingest_with_id("R1", image_record("harbor.png"));
    let mgr = h.endpoint.catalog_mgr();

    let callback = RecordingCallback::new();
    let err = mgr
        .submit_query_to(&Query::new("title ="), QueryBound::Unbounded, callback.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::InvalidQuery { .. }));

    callback.fail_next(100);
    let err = mgr
        .submit_query_to(&Query::all(), QueryBound::Unbounded, callback.clone())
        .await
        .unwrap_err();
    match err {
        FederationError::CallbackUnreachable { target, reason } => {
            assert_eq!(target, "test://recording-callback");
            assert!(reason.contains("0 of 1"));
        }
        other => panic!("expected CallbackUnreachable, got {other:?}"),
    }
    assert!(callback.invocations().is_empty());
}
