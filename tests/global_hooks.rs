//! Panics and failed tasks reach the error logger
//!
//! The panic hook is process-wide, so this file holds a single test.

use futures::future::{BoxFuture, FutureExt};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hesab::clock::SystemClock;
use hesab::reporting::hooks::REJECTION_MESSAGE;
use hesab::reporting::{
    Collector, DeliveryError, EnvironmentProbe, ErrorLogger, ErrorRecord, ErrorStatus,
    GlobalErrorHandler, RetryPolicy,
};
use hesab::storage::MemoryStore;

#[derive(Debug, Default)]
struct RecordingCollector {
    received: Mutex<Vec<ErrorRecord>>,
}

impl Collector for RecordingCollector {
    fn send<'a>(&'a self, record: &'a ErrorRecord) -> BoxFuture<'a, Result<(), DeliveryError>> {
        self.received.lock().unwrap().push(record.clone());
        async { Ok(()) }.boxed()
    }

    fn update_status<'a>(
        &'a self,
        _id: &'a str,
        _status: ErrorStatus,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        async { Ok(()) }.boxed()
    }
}

#[tokio::test]
async fn panics_and_failed_tasks_are_logged() {
    let collector = Arc::new(RecordingCollector::default());
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(SystemClock);
    let probe = EnvironmentProbe::new("hesab-test", "test", store.clone(), clock.clone());
    let logger = ErrorLogger::new(collector.clone(), store, clock, probe).with_policy(RetryPolicy {
        max_retries: 1,
        base_delay: Duration::ZERO,
    });

    let handler = GlobalErrorHandler::install(logger);

    let worker = std::thread::spawn(|| panic!("ledger total mismatch"));
    assert!(worker.join().is_err());

    handler
        .track_task(async { Err::<(), _>("invoice sync rejected") })
        .await
        .unwrap();
    handler.report_rejection("manual report");

    handler.shutdown().await;

    let received = collector.received.lock().unwrap();
    assert_eq!(received.len(), 3);

    let panic = received
        .iter()
        .find(|r| r.message == "ledger total mismatch")
        .expect("panic should be reported");
    assert!(panic.context["line"].is_u64());
    assert!(panic.context["source"]
        .as_str()
        .unwrap()
        .ends_with("global_hooks.rs"));
    assert!(panic.stack.is_some());

    let reasons: Vec<_> = received
        .iter()
        .filter(|r| r.message == REJECTION_MESSAGE)
        .map(|r| r.context["reason"].clone())
        .collect();
    assert!(reasons.contains(&json!("invoice sync rejected")));
    assert!(reasons.contains(&json!("manual report")));
}
