//! Error logger with bounded retries and a durable pending queue
//!
//! `log_error` never fails: records that cannot be delivered after the retry
//! budget are appended to the pending queue in the backing store, and
//! `sync_stored_errors` redelivers them later. Only `update_error_status`,
//! an explicit administrative action, reports failure to its caller.
//!
//! The queue is updated with an unlocked read-modify-write. Two loggers
//! appending at the same moment can lose one append (last writer wins); that
//! race is accepted.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::collector::{Collector, DeliveryError};
use super::environment::EnvironmentProbe;
use super::record::{ErrorRecord, ErrorStatus, NewError, UNKNOWN_MESSAGE};
use crate::clock::Clock;
use crate::shutdown::Shutdown;
use crate::storage::{KeyValueStore, StoreError};

/// Store key of the pending queue
pub const DEFAULT_PENDING_KEY: &str = "pendingErrors";

/// Length of the random part of a record id
const ID_SUFFIX_LEN: usize = 13;

/// Errors surfaced by the administrative operations of the logger
#[derive(Debug, Error)]
pub enum ReportingError {
    #[error("collector request failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("pending queue unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("pending queue is not valid JSON: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total delivery attempts per record (at least one is always made)
    pub max_retries: u32,
    /// Wait after the n-th failure is `n * base_delay`
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        self.base_delay.saturating_mul(failed_attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// What happened to a logged record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LogOutcome {
    /// The collector accepted the record
    Delivered { attempts: u32 },
    /// Delivery failed or was cancelled; the record is in the pending queue
    Queued,
    /// Delivery failed and the pending queue could not be read or written
    Lost,
}

/// Result of one pass over the pending queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub delivered: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone)]
pub struct ErrorLogger {
    collector: Arc<dyn Collector>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    probe: EnvironmentProbe,
    policy: RetryPolicy,
    pending_key: String,
    shutdown: Shutdown,
}

impl ErrorLogger {
    pub fn new(
        collector: Arc<dyn Collector>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        probe: EnvironmentProbe,
    ) -> Self {
        Self {
            collector,
            store,
            clock,
            probe,
            policy: RetryPolicy::default(),
            pending_key: DEFAULT_PENDING_KEY.to_string(),
            shutdown: Shutdown::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_pending_key(mut self, key: impl Into<String>) -> Self {
        self.pending_key = key.into();
        self
    }

    /// Aborts backoff waits and in-flight sends once `shutdown` fires
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn probe(&self) -> &EnvironmentProbe {
        &self.probe
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn max_attempts(&self) -> u32 {
        self.policy.max_retries.max(1)
    }

    fn build_record(&self, new: NewError) -> ErrorRecord {
        let now = self.clock.now();
        ErrorRecord {
            id: generate_id(now.timestamp_millis()),
            timestamp: now,
            severity: new.severity.unwrap_or_default(),
            source: new.source.unwrap_or_default(),
            message: new
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_MESSAGE.to_string()),
            stack: new.stack,
            status: ErrorStatus::New,
            retry_count: 0,
            max_retries: self.max_attempts(),
            last_retry_at: None,
            resolved_at: None,
            context: self.probe.capture(&new.context),
            tags: new.tags,
            related_errors: new.related_errors,
        }
    }

    /// Records an error and tries to deliver it
    ///
    /// Never fails. Undeliverable records end up in the pending queue; the
    /// outcome says which path was taken.
    pub async fn log_error(&self, new: NewError) -> LogOutcome {
        let mut record = self.build_record(new);

        match self.deliver(&mut record).await {
            Ok(attempts) => {
                tracing::debug!(id = %record.id, attempts, "error record delivered");
                LogOutcome::Delivered { attempts }
            }
            Err(err) => {
                record.status = ErrorStatus::Pending;
                match self.enqueue(&record) {
                    Ok(()) => {
                        tracing::info!(id = %record.id, reason = %err, "error record queued for later delivery");
                        LogOutcome::Queued
                    }
                    Err(store_err) => {
                        tracing::error!(
                            id = %record.id,
                            message = %record.message,
                            error = %store_err,
                            "failed to store undelivered error record"
                        );
                        LogOutcome::Lost
                    }
                }
            }
        }
    }

    /// Sends `record` with linear backoff until it is accepted, the budget
    /// runs out, or shutdown is requested. Returns the number of attempts.
    async fn deliver(&self, record: &mut ErrorRecord) -> Result<u32, DeliveryError> {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Err(DeliveryError::Cancelled),
                result = self.collector.send(record) => result,
            };

            let err = match result {
                Ok(()) => return Ok(attempt),
                Err(DeliveryError::Cancelled) => return Err(DeliveryError::Cancelled),
                Err(err) => err,
            };

            record.retry_count = attempt;
            record.status = ErrorStatus::Retrying;
            record.last_retry_at = Some(self.clock.now());
            tracing::warn!(
                id = %record.id,
                attempt,
                max_attempts,
                error = %err,
                "error delivery attempt failed"
            );

            if attempt >= max_attempts {
                return Err(err);
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(DeliveryError::Cancelled),
                _ = tokio::time::sleep(self.policy.delay_after(attempt)) => {}
            }
        }
    }

    /// Records currently waiting in the pending queue
    ///
    /// Elements that do not parse as records stay in the queue but are not
    /// listed here.
    pub fn pending_errors(&self) -> Vec<ErrorRecord> {
        match self.load_queue() {
            Ok(items) => items.iter().filter_map(|item| self.parse_queued(item)).collect(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read pending error queue");
                Vec::new()
            }
        }
    }

    /// Redelivers queued records, keeping only those that still fail
    ///
    /// The queue is re-read before writing back so records appended during
    /// the pass are preserved. Elements that are not valid records are never
    /// sent and never removed.
    pub async fn sync_stored_errors(&self) -> SyncReport {
        let pending = match self.load_queue() {
            Ok(pending) => pending,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read pending error queue");
                return SyncReport::default();
            }
        };
        if pending.is_empty() {
            return SyncReport::default();
        }

        let mut delivered = HashSet::new();
        for mut record in pending.iter().filter_map(|item| self.parse_queued(item)) {
            if self.shutdown.is_triggered() {
                break;
            }
            record.status = ErrorStatus::Pending;
            record.retry_count = 0;
            match self.deliver(&mut record).await {
                Ok(_) => {
                    delivered.insert(record.id);
                }
                Err(DeliveryError::Cancelled) => break,
                Err(err) => {
                    tracing::warn!(id = %record.id, error = %err, "pending error still undeliverable");
                }
            }
        }

        let current = match self.load_queue() {
            Ok(current) => current,
            Err(err) => {
                // Nothing was written back, so the first read is still what is stored
                tracing::error!(error = %err, "failed to re-read pending error queue");
                return SyncReport {
                    delivered: delivered.len(),
                    remaining: pending.len(),
                };
            }
        };
        let remaining: Vec<Value> = current
            .into_iter()
            .filter(|item| queued_id(item).map_or(true, |id| !delivered.contains(id)))
            .collect();

        if let Err(err) = self.save_queue(&remaining) {
            tracing::error!(error = %err, "failed to write back pending error queue");
        }

        tracing::info!(
            delivered = delivered.len(),
            remaining = remaining.len(),
            "pending error sync finished"
        );
        SyncReport {
            delivered: delivered.len(),
            remaining: remaining.len(),
        }
    }

    /// Asks the collector to change a record's status
    ///
    /// Unlike `log_error`, failure is returned to the caller.
    pub async fn update_error_status(
        &self,
        id: &str,
        status: ErrorStatus,
    ) -> Result<(), ReportingError> {
        match self.collector.update_status(id, status).await {
            Ok(()) => {
                tracing::info!(id, %status, "error status updated");
                Ok(())
            }
            Err(err) => {
                tracing::error!(id, %status, error = %err, "failed to update error status");
                Err(err.into())
            }
        }
    }

    fn enqueue(&self, record: &ErrorRecord) -> Result<(), ReportingError> {
        let mut queue = self.load_queue()?;
        queue.push(serde_json::to_value(record)?);
        self.save_queue(&queue)
    }

    /// Reads the raw queue elements
    ///
    /// A stored value that is not a JSON array is an error, so callers never
    /// overwrite a queue they could not read.
    fn load_queue(&self) -> Result<Vec<Value>, ReportingError> {
        match self.store.get(&self.pending_key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_queue(&self, items: &[Value]) -> Result<(), ReportingError> {
        let json = serde_json::to_string(items)?;
        self.store.set(&self.pending_key, &json)?;
        Ok(())
    }

    /// Parses one queue element, filling in a missing `maxRetries` from the policy
    fn parse_queued(&self, item: &Value) -> Option<ErrorRecord> {
        let mut filled = item.clone();
        if let Value::Object(fields) = &mut filled {
            fields
                .entry("maxRetries")
                .or_insert_with(|| Value::from(self.max_attempts()));
        }
        match serde_json::from_value(filled) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(id = ?queued_id(item), error = %err, "skipping invalid pending error record");
                None
            }
        }
    }
}

fn queued_id(item: &Value) -> Option<&str> {
    item.get("id").and_then(Value::as_str)
}

/// `<epoch-ms>-<random>`; the random part makes same-millisecond ids distinct
fn generate_id(now_ms: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now_ms, &suffix[..ID_SUFFIX_LEN])
}
