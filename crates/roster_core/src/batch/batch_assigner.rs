//! Batch "assign N workers to one event" orchestration.
//!
//! # Responsibility
//! - Create assignments sequentially in request order.
//! - Dispatch notifications for created assignments with bounded fan-out.
//! - Report every worker's terminal state.
//!
//! # Invariants
//! - One item's failure never aborts the remaining items.
//! - Successful assignments are never rolled back.
//! - Notification failures never revert an assignment.
//! - Cache groups are invalidated once per batch, not per item.
//!
//! Attempt lifecycle:
//! `Requested -> Created -> NotificationPending -> Notified | NotificationFailed`,
//! or `Requested -> AlreadyExists | Rejected`.

use crate::error::{ScheduleError, ScheduleErrorKind, ScheduleResult};
use crate::model::event::{Event, EventId};
use crate::model::worker::WorkerId;
use crate::notify::{assignment_notice, Notification, NotificationDispatcher};
use crate::service::assignment_store::{AssignmentStore, ASSIGNMENTS_GROUP, EVENTS_GROUP};
use futures::stream::{self, StreamExt};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-worker result of the assignment step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AssignOutcome {
    Assigned,
    AlreadyAssigned,
    Failed {
        kind: ScheduleErrorKind,
        reason: String,
    },
}

/// Lifecycle state of one assignment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Requested,
    Created,
    NotificationPending,
    Notified,
    NotificationFailed,
    AlreadyExists,
    Rejected,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Notified | Self::NotificationFailed | Self::AlreadyExists | Self::Rejected
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub worker_id: WorkerId,
    pub outcome: AssignOutcome,
    pub state: AttemptState,
    pub notification_error: Option<String>,
}

/// Full per-item report for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub event_id: EventId,
    /// One report per requested worker id, in request order.
    pub reports: Vec<WorkerReport>,
    /// Workers whose notification dispatch succeeded, in request order.
    pub notified: Vec<WorkerId>,
}

impl BatchResult {
    pub fn report(&self, worker_id: WorkerId) -> Option<&WorkerReport> {
        self.reports
            .iter()
            .find(|report| report.worker_id == worker_id)
    }

    pub fn assigned(&self) -> Vec<WorkerId> {
        self.reports
            .iter()
            .filter(|report| report.outcome == AssignOutcome::Assigned)
            .map(|report| report.worker_id)
            .collect()
    }

    pub fn failed(&self) -> Vec<WorkerId> {
        self.reports
            .iter()
            .filter(|report| matches!(report.outcome, AssignOutcome::Failed { .. }))
            .map(|report| report.worker_id)
            .collect()
    }
}

/// Orchestrates batch assignment against the store and dispatcher.
pub struct BatchAssigner {
    store: Arc<AssignmentStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    concurrency: usize,
}

impl BatchAssigner {
    pub fn new(
        store: Arc<AssignmentStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            concurrency: concurrency.max(1),
        }
    }

    /// Assigns every worker in `worker_ids` to `event_id`.
    ///
    /// # Errors
    /// - `InvalidRequest` when `worker_ids` is empty or the event does not exist.
    /// - `StoreUnavailable` when the event lookup itself fails.
    ///
    /// Per-worker failures are reported in the result, never returned here.
    pub async fn assign_batch(
        &self,
        event_id: EventId,
        worker_ids: &[WorkerId],
    ) -> ScheduleResult<BatchResult> {
        if worker_ids.is_empty() {
            return Err(ScheduleError::InvalidRequest(
                "batch must name at least one worker".to_string(),
            ));
        }
        let Some(event) = self.store.fetch_event(event_id)? else {
            return Err(ScheduleError::InvalidRequest(format!(
                "event {event_id} does not exist"
            )));
        };

        let mut reports: Vec<WorkerReport> = worker_ids
            .iter()
            .map(|worker_id| self.assign_one(event_id, *worker_id))
            .collect();

        let created = reports
            .iter()
            .filter(|report| report.state == AttemptState::Created)
            .count();
        if created > 0 {
            self.store
                .invalidate_groups(&[EVENTS_GROUP, ASSIGNMENTS_GROUP]);
        }

        self.notify_created(&event, &mut reports).await;

        let notified = reports
            .iter()
            .filter(|report| report.state == AttemptState::Notified)
            .map(|report| report.worker_id)
            .collect::<Vec<_>>();

        info!(
            "event=batch_assign module=batch status=ok event_id={event_id} requested={} created={created} notified={} failed={}",
            worker_ids.len(),
            notified.len(),
            reports
                .iter()
                .filter(|report| report.state == AttemptState::Rejected)
                .count()
        );

        Ok(BatchResult {
            event_id,
            reports,
            notified,
        })
    }

    fn assign_one(&self, event_id: EventId, worker_id: WorkerId) -> WorkerReport {
        match self.store.create_assignment_deferred(event_id, worker_id) {
            Ok(_) => WorkerReport {
                worker_id,
                outcome: AssignOutcome::Assigned,
                state: AttemptState::Created,
                notification_error: None,
            },
            Err(ScheduleError::DuplicateAssignment { .. }) => WorkerReport {
                worker_id,
                outcome: AssignOutcome::AlreadyAssigned,
                state: AttemptState::AlreadyExists,
                notification_error: None,
            },
            Err(err) => {
                warn!(
                    "event=batch_assign_item module=batch status=error event_id={event_id} worker_id={worker_id} error={err}"
                );
                WorkerReport {
                    worker_id,
                    outcome: AssignOutcome::Failed {
                        kind: err.kind(),
                        reason: err.to_string(),
                    },
                    state: AttemptState::Rejected,
                    notification_error: None,
                }
            }
        }
    }

    async fn notify_created(&self, event: &Event, reports: &mut [WorkerReport]) {
        let mut pending: Vec<(WorkerId, Notification)> = Vec::new();
        for report in reports.iter_mut() {
            if report.state != AttemptState::Created {
                continue;
            }
            report.state = AttemptState::NotificationPending;
            match self.compose(event, report.worker_id) {
                Ok(notification) => pending.push((report.worker_id, notification)),
                Err(reason) => {
                    report.state = AttemptState::NotificationFailed;
                    report.notification_error = Some(reason);
                }
            }
        }

        let sent: HashMap<WorkerId, bool> = stream::iter(pending.into_iter().map(
            |(worker_id, notification)| {
                let dispatcher = Arc::clone(&self.dispatcher);
                async move {
                    let ok = dispatcher
                        .send(
                            &notification.recipient,
                            &notification.subject,
                            &notification.body,
                        )
                        .await;
                    (worker_id, ok)
                }
            },
        ))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        for report in reports.iter_mut() {
            if report.state != AttemptState::NotificationPending {
                continue;
            }
            match sent.get(&report.worker_id) {
                Some(true) => report.state = AttemptState::Notified,
                _ => {
                    warn!(
                        "event=notification_send module=batch status=error event_id={} worker_id={} error_code=dispatch_failed",
                        event.id, report.worker_id
                    );
                    report.state = AttemptState::NotificationFailed;
                    report.notification_error = Some(
                        ScheduleError::NotificationFailed("dispatcher reported failure".to_string())
                            .to_string(),
                    );
                }
            }
        }
    }

    fn compose(&self, event: &Event, worker_id: WorkerId) -> Result<Notification, String> {
        let worker = match self.store.fetch_worker(worker_id) {
            Ok(Some(worker)) => worker,
            Ok(None) => return Err(format!("worker {worker_id} vanished before notification")),
            Err(err) => return Err(err.to_string()),
        };
        assignment_notice(event, &worker)
            .ok_or_else(|| format!("worker {worker_id} has no email or contact number"))
    }
}
