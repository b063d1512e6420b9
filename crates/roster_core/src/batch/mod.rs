//! Multi-worker assignment with isolated per-item failures.

pub mod batch_assigner;

pub use batch_assigner::{AssignOutcome, AttemptState, BatchAssigner, BatchResult, WorkerReport};
