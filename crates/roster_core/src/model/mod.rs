//! Domain model for events, workers, assignments and their grouped projection.
//!
//! # Responsibility
//! - Define canonical data structures shared by store, merger and batch paths.
//! - Keep validation rules next to the types they guard.
//!
//! # Invariants
//! - Every persisted record is identified by a stable `Uuid`.
//! - Assignment removal is a soft-delete tombstone, not a hard delete.
//! - `GroupedSchedule.workers` never holds two entries with the same worker id.

pub mod assignment;
pub mod change;
pub mod event;
pub mod schedule;
pub mod worker;

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Validation failures shared by model types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required text field is empty after trimming.
    EmptyField(&'static str),
    /// A timestamp field carries a negative epoch value.
    NegativeTimestamp(&'static str),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyField(field) => write!(f, "field `{field}` must not be empty"),
            Self::NegativeTimestamp(field) => {
                write!(f, "field `{field}` must be a non-negative epoch value")
            }
        }
    }
}

impl Error for ValidationError {}

/// Returns the current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
