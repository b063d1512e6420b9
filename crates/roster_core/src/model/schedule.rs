//! Grouped per-event schedule projection.
//!
//! # Responsibility
//! - Hold the event plus the insertion-ordered set of assigned workers.
//! - Provide the only mutation paths for that set, each enforcing uniqueness.
//!
//! # Invariants
//! - `workers` never contains two entries with the same `id`.
//! - Existing entries keep their list position when replaced.

use super::assignment::AssignmentWithJoins;
use super::event::{Event, EventId};
use super::worker::{Worker, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Derived, non-persisted aggregate keyed by event id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedSchedule {
    pub event: Event,
    pub workers: Vec<Worker>,
}

/// How a worker entry was merged into a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMerge {
    Appended,
    Replaced,
    AlreadyPresent,
}

impl GroupedSchedule {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            workers: Vec::new(),
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event.id
    }

    pub fn contains_worker(&self, worker_id: WorkerId) -> bool {
        self.workers.iter().any(|worker| worker.id == worker_id)
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|worker| worker.id).collect()
    }

    /// Appends `worker` unless an entry with the same id already exists.
    pub fn insert_worker(&mut self, worker: Worker) -> WorkerMerge {
        if self.contains_worker(worker.id) {
            return WorkerMerge::AlreadyPresent;
        }
        self.workers.push(worker);
        WorkerMerge::Appended
    }

    /// Replaces the entry with the same id in place, or appends when absent.
    pub fn upsert_worker(&mut self, worker: Worker) -> WorkerMerge {
        match self.workers.iter_mut().find(|entry| entry.id == worker.id) {
            Some(entry) => {
                *entry = worker;
                WorkerMerge::Replaced
            }
            None => {
                self.workers.push(worker);
                WorkerMerge::Appended
            }
        }
    }

    /// Replaces the entry with the same id in place; never appends.
    pub fn refresh_worker(&mut self, worker: &Worker) -> bool {
        match self.workers.iter_mut().find(|entry| entry.id == worker.id) {
            Some(entry) => {
                *entry = worker.clone();
                true
            }
            None => false,
        }
    }

    pub fn remove_worker(&mut self, worker_id: WorkerId) -> bool {
        let before = self.workers.len();
        self.workers.retain(|worker| worker.id != worker_id);
        self.workers.len() != before
    }
}

/// Groups joined assignments by event id, preserving first-seen order.
///
/// Rows whose event or worker join is unresolved are skipped; those joins can
/// legitimately be missing while the store is still replicating.
pub fn group_by_event(assignments: &[AssignmentWithJoins]) -> Vec<GroupedSchedule> {
    let mut groups: Vec<GroupedSchedule> = Vec::new();
    let mut index: HashMap<EventId, usize> = HashMap::new();

    for row in assignments {
        let (Some(event), Some(worker)) = (row.event.as_ref(), row.worker.as_ref()) else {
            continue;
        };

        match index.get(&event.id) {
            Some(position) => {
                groups[*position].insert_worker(worker.clone());
            }
            None => {
                let mut group = GroupedSchedule::new(event.clone());
                group.insert_worker(worker.clone());
                index.insert(event.id, groups.len());
                groups.push(group);
            }
        }
    }

    groups
}
