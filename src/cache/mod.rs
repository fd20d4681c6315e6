//! Expiring key-value cache
//!
//! This module provides a cache manager that persists serializable values into
//! the shared backing store with a per-entry TTL and tags. Stale entries are
//! never returned: they are deleted lazily on read, and `clear_expired` sweeps
//! the rest to reclaim space.

mod manager;

pub use manager::{
    default_max_age, default_ttl, CacheEntry, CacheError, CacheManager, DEFAULT_PREFIX,
    ENTRY_VERSION,
};
