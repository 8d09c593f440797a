#![cfg(feature = "remote")]

mod common;

use common::*;
use griddle::{
    CommitStrategy, EntityTypeBinding, GriddleError, RefreshStrategy, SearchMapping,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn remote_mapping(server: &MockServer, shards: usize) -> (SearchMapping, Arc<CollectingFailureHandler>) {
    let failures = Arc::new(CollectingFailureHandler::default());
    let mapping = SearchMapping::builder()
        .config(quiet_config(shards))
        .failure_handler(failures.clone())
        .register(EntityTypeBinding::indexed("Book", "books", BookContributor))
        .build()
        .unwrap();
    mapping
        .manager()
        .create_remote_index("books", reqwest::Client::new(), &server.uri(), None)
        .unwrap();
    (mapping, failures)
}

// ============================================================
// DOCUMENTS
// ============================================================

mod documents {
    use super::*;

    #[tokio::test]
    async fn test_add_puts_source_and_refreshes() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/books/_doc/1"))
            .and(body_json(json!({ "title": "Dune" })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/books/_refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (mapping, _) = remote_mapping(&server, 1);
        let mut plan = mapping
            .create_plan(None)
            .with_refresh_strategy(RefreshStrategy::Force);
        plan.add("Book", "1", book("Dune")).unwrap();
        let report = plan.execute().unwrap().await;
        assert!(report.is_success(), "{:?}", report.error());
        mapping.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_tenant_and_routing_key_are_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/books/_doc/acme_1"))
            .and(query_param("routing", "tolkien"))
            .and(body_json(json!({
                "title": "The Hobbit",
                "author": "tolkien",
                "_tenant": "acme"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (mapping, _) = remote_mapping(&server, 2);
        let mut plan = mapping.create_plan(Some("acme"));
        plan.add("Book", "1", routed_book("The Hobbit", "tolkien"))
            .unwrap();
        let report = plan.execute().unwrap().await;
        assert!(report.is_success(), "{:?}", report.error());
        mapping.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_of_missing_document_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/books/_doc/9"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (mapping, failures) = remote_mapping(&server, 1);
        let mut plan = mapping.create_plan(None);
        plan.delete("Book", "9", None).unwrap();
        assert!(plan.execute().unwrap().await.is_success());
        assert!(failures.failing_entities().is_empty());
        mapping.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_fails_the_work_set() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/books/_doc/1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("shard unavailable"))
            .expect(1)
            .mount(&server)
            .await;

        let (mapping, failures) = remote_mapping(&server, 1);
        let mut plan = mapping
            .create_plan(None)
            .with_commit_strategy(CommitStrategy::Force);
        plan.add("Book", "1", book("Dune")).unwrap();
        plan.add("Book", "2", book("Emma")).unwrap();
        let report = plan.execute().unwrap().await;

        match report.error() {
            Some(GriddleError::Remote { status, message }) => {
                assert_eq!(*status, 500);
                assert_eq!(message, "shard unavailable");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
        assert_eq!(report.failing_entities(), vec![book_key("1"), book_key("2")]);
        assert_eq!(failures.failing_entities(), vec![book_key("1"), book_key("2")]);

        // fail-fast: the second document was never sent
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        mapping.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/books/_refresh"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (mapping, _) = remote_mapping(&server, 1);
        let mut plan = mapping
            .create_plan(None)
            .with_refresh_strategy(RefreshStrategy::Force);
        plan.add("Book", "1", book("Dune")).unwrap();
        let report = plan.execute().unwrap().await;
        assert!(matches!(report.error(), Some(GriddleError::Refresh(_))));
        assert!(report.is_failing(&book_key("1")));
        mapping.shutdown().await.unwrap();
    }
}

// ============================================================
// INDEX-WIDE WORK
// ============================================================

mod index_wide {
    use super::*;

    #[tokio::test]
    async fn test_tenant_purge_runs_delete_by_query_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/books/_delete_by_query"))
            .and(query_param("conflicts", "proceed"))
            .and(body_json(json!({ "query": { "term": { "_tenant": "acme" } } })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (mapping, _) = remote_mapping(&server, 2);
        let workspace = mapping.create_workspace("books", Some("acme")).unwrap();
        let execution = workspace
            .purge(CommitStrategy::None, RefreshStrategy::None)
            .unwrap();
        assert_eq!(execution.submitted_work_sets(), 1, "shards share one remote index");
        let report = execution.await;
        assert!(report.is_success(), "{:?}", report.error());
        mapping.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_merge_and_flush_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/books/_forcemerge"))
            .and(query_param("max_num_segments", "1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/books/_flush"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (mapping, _) = remote_mapping(&server, 3);
        let workspace = mapping.create_workspace("books", None).unwrap();
        assert!(workspace.merge_segments().unwrap().await.is_success());
        assert!(workspace.flush().unwrap().await.is_success());
        mapping.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_store_url() {
        let server = MockServer::start().await;
        let (mapping, _) = remote_mapping(&server, 1);
        let err = mapping
            .manager()
            .create_remote_index("movies", reqwest::Client::new(), "not a url", None)
            .unwrap_err();
        assert!(matches!(err, GriddleError::Config(_)));
        assert!(!mapping.manager().contains_index("movies"));
        mapping.shutdown().await.unwrap();
    }
}
