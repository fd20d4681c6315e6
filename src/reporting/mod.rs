//! Error reporting with retry and a durable pending queue
//!
//! Records are delivered to a remote collector; when that fails they wait in
//! the backing store until `sync_stored_errors` gets them through.

pub mod collector;
pub mod environment;
pub mod hooks;
pub mod logger;
pub mod record;

pub use collector::{Collector, DeliveryError, HttpCollector};
pub use environment::{DeviceType, EnvironmentProbe};
pub use hooks::GlobalErrorHandler;
pub use logger::{ErrorLogger, LogOutcome, ReportingError, RetryPolicy, SyncReport};
pub use record::{ErrorRecord, ErrorSource, ErrorStatus, NewError, Severity};
