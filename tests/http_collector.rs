//! Error logger against a mock HTTP collector

use httpmock::MockServer;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use hesab::clock::SystemClock;
use hesab::reporting::{
    EnvironmentProbe, ErrorLogger, ErrorStatus, HttpCollector, LogOutcome, NewError,
    ReportingError, RetryPolicy, SyncReport,
};
use hesab::storage::{KeyValueStore, MemoryStore};

fn logger_for(collector: HttpCollector, store: Arc<MemoryStore>) -> ErrorLogger {
    let clock = Arc::new(SystemClock);
    let probe = EnvironmentProbe::new("hesab-test", "test", store.clone(), clock.clone());
    ErrorLogger::new(Arc::new(collector), store, clock, probe).with_policy(RetryPolicy {
        max_retries: 3,
        base_delay: Duration::ZERO,
    })
}

#[tokio::test]
async fn delivers_on_first_success() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("POST")
                .path("/api/errors")
                .header("content-type", "application/json");
            then.status(201);
        })
        .await;

    let store = Arc::new(MemoryStore::new());
    let logger = logger_for(HttpCollector::new(server.base_url()), store.clone());

    let outcome = logger
        .log_error(NewError::new("article save failed").context("component", "ArticleEditor"))
        .await;

    assert_eq!(outcome, LogOutcome::Delivered { attempts: 1 });
    mock.assert_async().await;
    assert!(store.get("pendingErrors").unwrap().is_none());
}

#[tokio::test]
async fn queues_after_exhausting_retries() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("POST").path("/api/errors");
            then.status(500);
        })
        .await;

    let store = Arc::new(MemoryStore::new());
    let logger = logger_for(HttpCollector::new(server.base_url()), store.clone());

    let outcome = logger.log_error(NewError::new("backend down")).await;

    assert_eq!(outcome, LogOutcome::Queued);
    mock.assert_calls_async(3).await;
    let pending = logger.pending_errors();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message, "backend down");
    assert_eq!(pending[0].status, ErrorStatus::Pending);
}

#[tokio::test]
async fn queues_when_collector_unreachable() {
    let store = Arc::new(MemoryStore::new());
    let logger = logger_for(HttpCollector::new("http://127.0.0.1:9"), store);

    assert_eq!(logger.log_error(NewError::new("offline")).await, LogOutcome::Queued);
    assert_eq!(logger.pending_errors().len(), 1);
}

#[tokio::test]
async fn sync_drains_queue_once_collector_recovers() {
    let server = MockServer::start_async().await;
    let store = Arc::new(MemoryStore::new());
    let logger = logger_for(HttpCollector::new(server.base_url()), store.clone());

    let mut outage = server
        .mock_async(|when, then| {
            when.method("POST").path("/api/errors");
            then.status(503);
        })
        .await;
    logger.log_error(NewError::new("first")).await;
    logger.log_error(NewError::new("second")).await;
    assert_eq!(logger.pending_errors().len(), 2);
    outage.delete_async().await;

    let recovered = server
        .mock_async(|when, then| {
            when.method("POST").path("/api/errors");
            then.status(200);
        })
        .await;

    let report = logger.sync_stored_errors().await;

    assert_eq!(report, SyncReport { delivered: 2, remaining: 0 });
    recovered.assert_calls_async(2).await;
    assert!(logger.pending_errors().is_empty());
    assert_eq!(store.get("pendingErrors").unwrap().as_deref(), Some("[]"));
}

#[tokio::test]
async fn sends_bearer_token_from_store() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("POST")
                .path("/api/errors")
                .header("authorization", "Bearer secret-token");
            then.status(200);
        })
        .await;

    let store = Arc::new(MemoryStore::new());
    store.set("token", "secret-token").unwrap();
    let collector = HttpCollector::new(server.base_url()).with_token_store(store.clone());
    let logger = logger_for(collector, store);

    assert_eq!(
        logger.log_error(NewError::new("authorized")).await,
        LogOutcome::Delivered { attempts: 1 }
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn update_status_patches_record() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("PATCH")
                .path("/api/errors/17-abc/status")
                .json_body(json!({ "status": "resolved" }));
            then.status(204);
        })
        .await;

    let logger = logger_for(HttpCollector::new(server.base_url()), Arc::new(MemoryStore::new()));

    logger
        .update_error_status("17-abc", ErrorStatus::Resolved)
        .await
        .expect("status update should succeed");
    mock.assert_async().await;
}

#[tokio::test]
async fn update_status_failure_is_returned() {
    let server = MockServer::start_async().await;
    let _mock = server
        .mock_async(|when, then| {
            when.method("PATCH").path("/api/errors/missing/status");
            then.status(404);
        })
        .await;

    let logger = logger_for(HttpCollector::new(server.base_url()), Arc::new(MemoryStore::new()));

    let err = logger
        .update_error_status("missing", ErrorStatus::Ignored)
        .await
        .unwrap_err();
    assert!(matches!(err, ReportingError::Delivery(_)));
    assert!(err.to_string().contains("404"));
}
