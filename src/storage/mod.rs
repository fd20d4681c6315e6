//! Backing key-value store shared by the cache and the error reporter
//!
//! Both components persist plain strings under string keys. Each one confines
//! itself to its own key namespace, so a single store instance can be shared
//! process-wide.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::fmt;
use thiserror::Error;

/// Errors raised by a backing store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the underlying medium failed
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The write would push the store past its capacity
    #[error("store quota exceeded: {needed} bytes needed, {limit} bytes allowed")]
    QuotaExceeded { needed: usize, limit: usize },
}

/// A durable key → string map
///
/// Every call is a single atomic operation on one key. No transactions are
/// offered; read-modify-write sequences are the caller's concern.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Returns the value stored under `key`, or `None` if absent
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Lists every key currently present
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}
