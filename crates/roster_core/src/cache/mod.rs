//! Time-boxed read caches.
//!
//! # Responsibility
//! - Serve repeated reads without touching the backing store.
//! - Evict related entries in bulk through named invalidation groups.

pub mod keyed_cache;

pub use keyed_cache::{KeyedCache, DEFAULT_TTL};
