//! Hesab client core
//!
//! An expiring key-value cache and a resilient error reporter sharing one
//! durable key-value store. Exposed as a library so the CLI, embedders and
//! integration tests use the same components.

pub mod app;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod reporting;
pub mod shutdown;
pub mod storage;
pub mod telemetry;
