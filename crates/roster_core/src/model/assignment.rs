//! Assignment link model.
//!
//! # Invariants
//! - One assignment relates exactly one event to exactly one worker.
//! - At most one live (non-deleted) assignment exists per `(event_id, worker_id)`.

use super::event::{Event, EventId};
use super::worker::{Worker, WorkerId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AssignmentId = Uuid;

/// Persisted link between one event and one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub event_id: EventId,
    pub worker_id: WorkerId,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl Assignment {
    pub fn new(event_id: EventId, worker_id: WorkerId, created_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            worker_id,
            created_at,
        }
    }
}

/// Denormalized assignment read carrying its resolved event and worker.
///
/// Either side may be `None` while a join is only partially replicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentWithJoins {
    pub assignment: Assignment,
    pub event: Option<Event>,
    pub worker: Option<Worker>,
}
