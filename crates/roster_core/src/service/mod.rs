//! Core use-case services.
//!
//! # Responsibility
//! - Layer caching and invalidation over repository calls.
//! - Keep merge, batch and view code decoupled from storage details.

pub mod assignment_store;
