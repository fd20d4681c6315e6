//! Process-wide error capture
//!
//! Panics are the Rust counterpart of uncaught exceptions, and a spawned task
//! returning `Err` that nobody inspects is the counterpart of an unhandled
//! promise rejection. Both are forwarded into the [`ErrorLogger`] through a
//! channel, because the panic hook runs synchronously on the panicking thread.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt::Display;
use std::future::Future;
use std::panic::{self, Location};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::logger::ErrorLogger;
use super::record::{ErrorSource, NewError, Severity};

/// Message recorded for task failures, mirroring browser rejection reports
pub const REJECTION_MESSAGE: &str = "Unhandled Task Rejection";

/// Forwards panics and failed tasks into an error logger
///
/// Only this handle holds a strong sender; the panic hook and tracked tasks
/// hold weak ones, so [`shutdown`](Self::shutdown) can drain and stop the
/// forwarding task.
#[derive(Debug)]
pub struct GlobalErrorHandler {
    tx: mpsc::UnboundedSender<NewError>,
    worker: JoinHandle<()>,
}

impl GlobalErrorHandler {
    /// Installs the panic hook and starts the forwarding task
    ///
    /// Must be called from within a tokio runtime. The previous panic hook
    /// still runs after each report.
    pub fn install(logger: ErrorLogger) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<NewError>();

        let worker = tokio::spawn(async move {
            while let Some(new) = rx.recv().await {
                logger.log_error(new).await;
            }
        });

        let hook_tx = tx.downgrade();
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if let Some(tx) = hook_tx.upgrade() {
                let _ = tx.send(panic_report(info.payload(), info.location()));
            }
            previous(info);
        }));

        Self { tx, worker }
    }

    /// Reports a rejection reason directly
    pub fn report_rejection(&self, reason: impl Display) {
        let _ = self.tx.send(rejection_report(reason));
    }

    /// Spawns `future` and reports it if it resolves to `Err`
    ///
    /// Panics inside the task are already reported by the panic hook.
    pub fn track_task<F, T, E>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let tx = self.tx.downgrade();
        tokio::spawn(async move {
            if let Err(reason) = future.await {
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.send(rejection_report(reason));
                }
            }
        })
    }

    /// Stops accepting reports and waits until queued ones are logged
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(err) = self.worker.await {
            tracing::error!(error = %err, "error forwarding task failed");
        }
    }
}

fn panic_report(payload: &(dyn Any + Send), location: Option<&Location<'_>>) -> NewError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with non-string payload".to_string());

    let mut report = NewError::new(message)
        .severity(Severity::Error)
        .source(ErrorSource::Client)
        .stack(Backtrace::force_capture().to_string());

    if let Some(location) = location {
        report = report
            .context("source", location.file())
            .context("line", location.line())
            .context("column", location.column());
    }
    if let Some(name) = std::thread::current().name() {
        report = report.context("thread", name);
    }
    report
}

fn rejection_report(reason: impl Display) -> NewError {
    NewError::new(REJECTION_MESSAGE)
        .severity(Severity::Error)
        .source(ErrorSource::Client)
        .context("reason", reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_panic_report_from_str_payload() {
        let payload: Box<dyn Any + Send> = Box::new("index out of bounds");
        let location = Location::caller();

        let report = panic_report(payload.as_ref(), Some(location));

        assert_eq!(report.message.as_deref(), Some("index out of bounds"));
        assert_eq!(report.source, Some(ErrorSource::Client));
        assert_eq!(report.context["line"], json!(location.line()));
        assert_eq!(report.context["source"], json!(location.file()));
        assert!(report.stack.is_some());
    }

    #[test]
    fn test_panic_report_from_string_payload() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("formatted 42"));
        let report = panic_report(payload.as_ref(), None);
        assert_eq!(report.message.as_deref(), Some("formatted 42"));
        assert!(report.context.get("line").is_none());
    }

    #[test]
    fn test_panic_report_from_opaque_payload() {
        let payload: Box<dyn Any + Send> = Box::new(17u8);
        let report = panic_report(payload.as_ref(), None);
        assert_eq!(report.message.as_deref(), Some("panic with non-string payload"));
    }

    #[test]
    fn test_rejection_report_carries_reason() {
        let report = rejection_report("connection reset");
        assert_eq!(report.message.as_deref(), Some(REJECTION_MESSAGE));
        assert_eq!(report.context["reason"], json!("connection reset"));
    }
}
