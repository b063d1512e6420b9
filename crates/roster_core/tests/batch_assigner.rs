use async_trait::async_trait;
use roster_core::db::{open_db_in_memory, DbError};
use roster_core::{
    AssignOutcome, Assignment, AssignmentStore, AssignmentWithJoins, AttemptState, BatchAssigner,
    Event, EventId, EventListQuery, EventStatus, NotificationDispatcher, RepoError, RepoResult,
    ScheduleError, ScheduleErrorKind, ScheduleRepository, SqliteScheduleRepository, Worker,
    WorkerId,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct RecordingDispatcher {
    sent: Mutex<Vec<String>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingDispatcher {
    fn failing_for(recipients: &[&str]) -> Self {
        Self {
            failing: recipients.iter().map(|value| value.to_string()).collect(),
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<String> {
        let mut sent = self.sent.lock().unwrap().clone();
        sent.sort();
        sent
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, recipient: &str, _subject: &str, _body: &str) -> bool {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push(recipient.to_string());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        !self.failing.contains(recipient)
    }
}

fn store() -> Arc<AssignmentStore> {
    let repo: Arc<dyn ScheduleRepository> = Arc::new(
        SqliteScheduleRepository::try_new(open_db_in_memory().unwrap()).unwrap(),
    );
    Arc::new(AssignmentStore::new(repo, 10, Duration::from_secs(600)))
}

fn seed_event(store: &AssignmentStore) -> Event {
    let event = Event::new(EventStatus::Confirmed, 1_700_000_000_000, "Harbour Hall", "Pier 3");
    store.create_event(&event).unwrap();
    event
}

fn seed_worker(store: &AssignmentStore, name: &str) -> Worker {
    let worker = Worker::new(name, "server").with_email(format!("{}@example.com", name.to_lowercase()));
    store.create_worker(&worker).unwrap();
    worker
}

#[tokio::test]
async fn missing_worker_fails_alone_and_is_never_notified() {
    let store = store();
    let event = seed_event(&store);
    let w1 = seed_worker(&store, "Ana");
    let w2 = Uuid::new_v4();
    let w3 = seed_worker(&store, "Cleo");
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let assigner = BatchAssigner::new(Arc::clone(&store), dispatcher.clone(), 4);

    let result = assigner
        .assign_batch(event.id, &[w1.id, w2, w3.id])
        .await
        .unwrap();

    let order: Vec<_> = result.reports.iter().map(|report| report.worker_id).collect();
    assert_eq!(order, vec![w1.id, w2, w3.id]);
    assert_eq!(result.report(w1.id).unwrap().outcome, AssignOutcome::Assigned);
    assert_eq!(result.report(w3.id).unwrap().outcome, AssignOutcome::Assigned);
    match &result.report(w2).unwrap().outcome {
        AssignOutcome::Failed { kind, .. } => assert_eq!(*kind, ScheduleErrorKind::NotFound),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(result.report(w2).unwrap().state, AttemptState::Rejected);

    assert_eq!(result.assigned(), vec![w1.id, w3.id]);
    assert_eq!(result.failed(), vec![w2]);
    assert_eq!(result.notified, vec![w1.id, w3.id]);
    assert_eq!(
        dispatcher.sent(),
        vec!["ana@example.com".to_string(), "cleo@example.com".to_string()]
    );
    assert!(result.reports.iter().all(|report| report.state.is_terminal()));

    let grouped = store.fetch_grouped().unwrap();
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped[0].worker_ids(), vec![w1.id, w3.id]);
}

#[tokio::test]
async fn existing_assignment_is_reported_as_already_assigned() {
    let store = store();
    let event = seed_event(&store);
    let w1 = seed_worker(&store, "Ana");
    let w2 = seed_worker(&store, "Ben");
    store.create_assignment(event.id, w1.id).unwrap();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let assigner = BatchAssigner::new(Arc::clone(&store), dispatcher.clone(), 4);

    let result = assigner.assign_batch(event.id, &[w1.id, w2.id]).await.unwrap();

    let first = result.report(w1.id).unwrap();
    assert_eq!(first.outcome, AssignOutcome::AlreadyAssigned);
    assert_eq!(first.state, AttemptState::AlreadyExists);
    assert_eq!(result.report(w2.id).unwrap().state, AttemptState::Notified);
    assert_eq!(dispatcher.sent(), vec!["ben@example.com".to_string()]);
}

#[tokio::test]
async fn invalid_batches_are_rejected_up_front() {
    let store = store();
    let event = seed_event(&store);
    let w1 = seed_worker(&store, "Ana");
    let assigner = BatchAssigner::new(
        Arc::clone(&store),
        Arc::new(RecordingDispatcher::default()),
        4,
    );

    let empty = assigner.assign_batch(event.id, &[]).await.unwrap_err();
    assert_eq!(empty.kind(), ScheduleErrorKind::InvalidRequest);

    let missing_event = assigner
        .assign_batch(Uuid::new_v4(), &[w1.id])
        .await
        .unwrap_err();
    assert!(matches!(missing_event, ScheduleError::InvalidRequest(_)));
    assert!(store.fetch_grouped().unwrap().is_empty());
}

#[tokio::test]
async fn notification_failure_keeps_the_assignment() {
    let store = store();
    let event = seed_event(&store);
    let w1 = seed_worker(&store, "Ana");
    let w2 = seed_worker(&store, "Ben");
    let dispatcher = Arc::new(RecordingDispatcher::failing_for(&["ana@example.com"]));
    let assigner = BatchAssigner::new(Arc::clone(&store), dispatcher.clone(), 4);

    let result = assigner.assign_batch(event.id, &[w1.id, w2.id]).await.unwrap();

    let failed = result.report(w1.id).unwrap();
    assert_eq!(failed.outcome, AssignOutcome::Assigned);
    assert_eq!(failed.state, AttemptState::NotificationFailed);
    assert!(failed.notification_error.is_some());
    assert_eq!(result.notified, vec![w2.id]);

    let repeat = assigner.assign_batch(event.id, &[w1.id]).await.unwrap();
    assert_eq!(repeat.reports[0].outcome, AssignOutcome::AlreadyAssigned);
}

#[tokio::test]
async fn unreachable_worker_fails_notification_without_dispatch() {
    let store = store();
    let event = seed_event(&store);
    let silent = Worker::new("Dee", "runner");
    store.create_worker(&silent).unwrap();
    let phone = Worker::new("Eli", "runner").with_contact("+15550100");
    store.create_worker(&phone).unwrap();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let assigner = BatchAssigner::new(Arc::clone(&store), dispatcher.clone(), 4);

    let result = assigner
        .assign_batch(event.id, &[silent.id, phone.id])
        .await
        .unwrap();

    let report = result.report(silent.id).unwrap();
    assert_eq!(report.outcome, AssignOutcome::Assigned);
    assert_eq!(report.state, AttemptState::NotificationFailed);
    assert_eq!(dispatcher.sent(), vec!["+15550100".to_string()]);
}

#[tokio::test]
async fn notification_fan_out_is_bounded() {
    let store = store();
    let event = seed_event(&store);
    let crew: Vec<_> = ["Ana", "Ben", "Cleo", "Dee", "Eli", "Fay"]
        .iter()
        .map(|name| seed_worker(&store, name).id)
        .collect();
    let dispatcher = Arc::new(RecordingDispatcher {
        delay: Some(Duration::from_millis(20)),
        ..RecordingDispatcher::default()
    });
    let assigner = BatchAssigner::new(Arc::clone(&store), dispatcher.clone(), 2);

    let result = assigner.assign_batch(event.id, &crew).await.unwrap();

    assert_eq!(result.notified, crew);
    let max = dispatcher.max_in_flight.load(Ordering::SeqCst);
    assert!((1..=2).contains(&max), "max in flight was {max}");
}

/// SQLite repository whose assignment writes fail for one locked worker.
struct LockedWriteRepo {
    inner: SqliteScheduleRepository,
    locked_worker: Mutex<Option<WorkerId>>,
}

impl ScheduleRepository for LockedWriteRepo {
    fn create_event(&self, event: &Event) -> RepoResult<EventId> {
        self.inner.create_event(event)
    }
    fn update_event(&self, event: &Event) -> RepoResult<()> {
        self.inner.update_event(event)
    }
    fn get_event(&self, id: EventId) -> RepoResult<Option<Event>> {
        self.inner.get_event(id)
    }
    fn list_events(&self, query: &EventListQuery) -> RepoResult<Vec<Event>> {
        self.inner.list_events(query)
    }
    fn count_events(&self, status: Option<EventStatus>) -> RepoResult<u64> {
        self.inner.count_events(status)
    }
    fn create_worker(&self, worker: &Worker) -> RepoResult<WorkerId> {
        self.inner.create_worker(worker)
    }
    fn update_worker(&self, worker: &Worker) -> RepoResult<()> {
        self.inner.update_worker(worker)
    }
    fn get_worker(&self, id: WorkerId) -> RepoResult<Option<Worker>> {
        self.inner.get_worker(id)
    }
    fn insert_assignment(&self, assignment: &Assignment) -> RepoResult<()> {
        if *self.locked_worker.lock().unwrap() == Some(assignment.worker_id) {
            return Err(RepoError::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                None,
            ))));
        }
        self.inner.insert_assignment(assignment)
    }
    fn find_assignment(
        &self,
        event_id: EventId,
        worker_id: WorkerId,
    ) -> RepoResult<Option<Assignment>> {
        self.inner.find_assignment(event_id, worker_id)
    }
    fn touch_assignment(&self, event_id: EventId, worker_id: WorkerId) -> RepoResult<bool> {
        self.inner.touch_assignment(event_id, worker_id)
    }
    fn soft_delete_assignment(&self, event_id: EventId, worker_id: WorkerId) -> RepoResult<bool> {
        self.inner.soft_delete_assignment(event_id, worker_id)
    }
    fn list_assignments_with_joins(&self) -> RepoResult<Vec<AssignmentWithJoins>> {
        self.inner.list_assignments_with_joins()
    }
}

#[tokio::test]
async fn store_failure_on_one_write_fails_only_that_worker() {
    let repo = Arc::new(LockedWriteRepo {
        inner: SqliteScheduleRepository::try_new(open_db_in_memory().unwrap()).unwrap(),
        locked_worker: Mutex::new(None),
    });
    let store = Arc::new(AssignmentStore::new(
        repo.clone(),
        10,
        Duration::from_secs(600),
    ));
    let event = seed_event(&store);
    let ana = seed_worker(&store, "Ana");
    let ben = seed_worker(&store, "Ben");
    let cleo = seed_worker(&store, "Cleo");
    *repo.locked_worker.lock().unwrap() = Some(ben.id);
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let assigner = BatchAssigner::new(Arc::clone(&store), dispatcher.clone(), 4);

    let result = assigner
        .assign_batch(event.id, &[ana.id, ben.id, cleo.id])
        .await
        .unwrap();

    let failed = result.report(ben.id).unwrap();
    match &failed.outcome {
        AssignOutcome::Failed { kind, reason } => {
            assert_eq!(*kind, ScheduleErrorKind::StoreUnavailable);
            assert!(reason.starts_with("store unavailable"), "reason was {reason}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(failed.state, AttemptState::Rejected);
    assert_eq!(result.assigned(), vec![ana.id, cleo.id]);
    assert_eq!(result.failed(), vec![ben.id]);
    assert_eq!(result.notified, vec![ana.id, cleo.id]);
    assert_eq!(
        dispatcher.sent(),
        vec!["ana@example.com".to_string(), "cleo@example.com".to_string()]
    );

    let grouped = store.fetch_grouped().unwrap();
    assert_eq!(grouped[0].worker_ids(), vec![ana.id, cleo.id]);
}
