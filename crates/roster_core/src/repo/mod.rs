//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the backing-store query contract used by the scheduling core.
//! - Isolate SQLite query details from caching and orchestration.
//!
//! # Invariants
//! - Repository writes validate model input before persistence.
//! - Repository APIs return semantic errors (`NotFound`,
//!   `DuplicateAssignment`) in addition to DB transport errors.

pub mod schedule_repo;
