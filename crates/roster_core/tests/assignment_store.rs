use roster_core::db::open_db_in_memory;
use roster_core::model::assignment::AssignmentWithJoins;
use roster_core::service::assignment_store::{ASSIGNMENTS_GROUP, EVENTS_GROUP};
use roster_core::{
    Assignment, AssignmentStore, EntityKind, Event, EventId, EventListQuery, EventStatus,
    RepoError, RepoResult, ScheduleError, ScheduleErrorKind, ScheduleRepository,
    SqliteScheduleRepository, Worker, WorkerId,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Repository wrapper that counts backing reads and can simulate an outage.
struct CountingRepo {
    inner: SqliteScheduleRepository,
    offline: AtomicBool,
    list_calls: AtomicUsize,
    count_calls: AtomicUsize,
    join_calls: AtomicUsize,
}

impl CountingRepo {
    fn new() -> Self {
        Self {
            inner: SqliteScheduleRepository::try_new(open_db_in_memory().unwrap()).unwrap(),
            offline: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
            join_calls: AtomicUsize::new(0),
        }
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> RepoResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepoError::InvalidData("backing store offline".to_string()));
        }
        Ok(())
    }
}

impl ScheduleRepository for CountingRepo {
    fn create_event(&self, event: &Event) -> RepoResult<EventId> {
        self.check()?;
        self.inner.create_event(event)
    }
    fn update_event(&self, event: &Event) -> RepoResult<()> {
        self.check()?;
        self.inner.update_event(event)
    }
    fn get_event(&self, id: EventId) -> RepoResult<Option<Event>> {
        self.check()?;
        self.inner.get_event(id)
    }
    fn list_events(&self, query: &EventListQuery) -> RepoResult<Vec<Event>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.list_events(query)
    }
    fn count_events(&self, status: Option<EventStatus>) -> RepoResult<u64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.count_events(status)
    }
    fn create_worker(&self, worker: &Worker) -> RepoResult<WorkerId> {
        self.check()?;
        self.inner.create_worker(worker)
    }
    fn update_worker(&self, worker: &Worker) -> RepoResult<()> {
        self.check()?;
        self.inner.update_worker(worker)
    }
    fn get_worker(&self, id: WorkerId) -> RepoResult<Option<Worker>> {
        self.check()?;
        self.inner.get_worker(id)
    }
    fn insert_assignment(&self, assignment: &Assignment) -> RepoResult<()> {
        self.check()?;
        self.inner.insert_assignment(assignment)
    }
    fn find_assignment(
        &self,
        event_id: EventId,
        worker_id: WorkerId,
    ) -> RepoResult<Option<Assignment>> {
        self.check()?;
        self.inner.find_assignment(event_id, worker_id)
    }
    fn touch_assignment(&self, event_id: EventId, worker_id: WorkerId) -> RepoResult<bool> {
        self.check()?;
        self.inner.touch_assignment(event_id, worker_id)
    }
    fn soft_delete_assignment(&self, event_id: EventId, worker_id: WorkerId) -> RepoResult<bool> {
        self.check()?;
        self.inner.soft_delete_assignment(event_id, worker_id)
    }
    fn list_assignments_with_joins(&self) -> RepoResult<Vec<AssignmentWithJoins>> {
        self.join_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.list_assignments_with_joins()
    }
}

fn store_with_counters(page_size: u32) -> (AssignmentStore, Arc<CountingRepo>) {
    let counting = Arc::new(CountingRepo::new());
    let repo: Arc<dyn ScheduleRepository> = counting.clone();
    let store = AssignmentStore::new(repo, page_size, Duration::from_secs(600));
    (store, counting)
}

fn seed_event(store: &AssignmentStore, day: i64) -> Event {
    let event = Event::new(EventStatus::Confirmed, day, format!("venue-{day}"), "");
    store.create_event(&event).unwrap();
    event
}

fn seed_worker(store: &AssignmentStore, name: &str) -> Worker {
    let worker = Worker::new(name, "server");
    store.create_worker(&worker).unwrap();
    worker
}

#[test]
fn second_identical_create_is_duplicate_and_leaves_one_row() {
    let (store, _) = store_with_counters(10);
    let event = seed_event(&store, 1);
    let worker = seed_worker(&store, "Ana");

    store.create_assignment(event.id, worker.id).unwrap();
    let err = store.create_assignment(event.id, worker.id).unwrap_err();
    assert_eq!(err.kind(), ScheduleErrorKind::DuplicateAssignment);

    let joined = store.fetch_all_assignments_with_joins().unwrap();
    let rows = joined
        .iter()
        .filter(|row| {
            row.assignment.event_id == event.id && row.assignment.worker_id == worker.id
        })
        .count();
    assert_eq!(rows, 1);
}

#[test]
fn create_with_unknown_ids_is_not_found() {
    let (store, _) = store_with_counters(10);
    let event = seed_event(&store, 1);
    let missing = Uuid::new_v4();

    match store.create_assignment(event.id, missing) {
        Err(ScheduleError::NotFound(EntityKind::Worker, id)) => assert_eq!(id, missing),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn remove_is_idempotent() {
    let (store, _) = store_with_counters(10);
    let event = seed_event(&store, 1);
    let worker = seed_worker(&store, "Ana");
    store.create_assignment(event.id, worker.id).unwrap();

    assert!(store.remove_assignment(event.id, worker.id).unwrap());
    assert!(!store.remove_assignment(event.id, worker.id).unwrap());
    assert!(!store.remove_assignment(Uuid::new_v4(), worker.id).unwrap());
    assert!(store.fetch_grouped().unwrap().is_empty());
}

#[test]
fn events_page_is_cached_until_events_group_is_invalidated() {
    let (store, counting) = store_with_counters(2);
    for day in 1..=3 {
        seed_event(&store, day);
    }

    let first = store.fetch_events_page(None, 1).unwrap();
    assert_eq!(first.events.len(), 2);
    assert_eq!(first.total_count, 3);
    assert_eq!(first.total_pages, 2);
    let list_calls = counting.list_calls.load(Ordering::SeqCst);
    let count_calls = counting.count_calls.load(Ordering::SeqCst);

    let cached = store.fetch_events_page(None, 1).unwrap();
    assert_eq!(cached, first);
    assert_eq!(counting.list_calls.load(Ordering::SeqCst), list_calls);
    assert_eq!(counting.count_calls.load(Ordering::SeqCst), count_calls);

    // A write the store did not see: only invalidation exposes it.
    counting
        .inner
        .create_event(&Event::new(EventStatus::Confirmed, 0, "early", ""))
        .unwrap();
    assert_eq!(store.fetch_events_page(None, 1).unwrap(), first);

    store.invalidate_groups(&[EVENTS_GROUP]);
    let refreshed = store.fetch_events_page(None, 1).unwrap();
    assert_eq!(counting.list_calls.load(Ordering::SeqCst), list_calls + 1);
    assert_eq!(counting.count_calls.load(Ordering::SeqCst), count_calls + 1);
    assert_eq!(refreshed.total_count, 4);
    assert_eq!(refreshed.events[0].venue, "early");
}

#[test]
fn assignment_writes_invalidate_joined_reads() {
    let (store, counting) = store_with_counters(10);
    let event = seed_event(&store, 1);
    let ana = seed_worker(&store, "Ana");
    let ben = seed_worker(&store, "Ben");

    store.create_assignment(event.id, ana.id).unwrap();
    assert_eq!(store.fetch_grouped().unwrap()[0].worker_ids(), vec![ana.id]);
    let joins = counting.join_calls.load(Ordering::SeqCst);
    store.fetch_grouped().unwrap();
    assert_eq!(counting.join_calls.load(Ordering::SeqCst), joins);

    store.create_assignment(event.id, ben.id).unwrap();
    assert_eq!(
        store.fetch_grouped().unwrap()[0].worker_ids(),
        vec![ana.id, ben.id]
    );
    assert_eq!(counting.join_calls.load(Ordering::SeqCst), joins + 1);
}

#[test]
fn deferred_create_waits_for_explicit_invalidation() {
    let (store, _) = store_with_counters(10);
    let event = seed_event(&store, 1);
    let ana = seed_worker(&store, "Ana");
    assert!(store.fetch_grouped().unwrap().is_empty());

    store.create_assignment_deferred(event.id, ana.id).unwrap();
    assert!(store.fetch_grouped().unwrap().is_empty());

    store.invalidate_groups(&[ASSIGNMENTS_GROUP]);
    assert_eq!(store.fetch_grouped().unwrap().len(), 1);
}

#[test]
fn outage_after_invalidation_reports_store_unavailable() {
    let (store, counting) = store_with_counters(10);
    seed_event(&store, 1);
    let warm = store.fetch_events_page(None, 1).unwrap();
    assert!(!warm.stale);

    store.invalidate_groups(&[EVENTS_GROUP]);
    counting.set_offline(true);

    let err = store.fetch_events_page(None, 1).unwrap_err();
    assert_eq!(err.kind(), ScheduleErrorKind::StoreUnavailable);
    assert_eq!(
        store.fetch_all_assignments_with_joins().unwrap_err().kind(),
        ScheduleErrorKind::StoreUnavailable
    );
}

#[test]
fn outage_serves_expired_entry_as_stale() {
    let counting = Arc::new(CountingRepo::new());
    let repo: Arc<dyn ScheduleRepository> = counting.clone();
    let store = AssignmentStore::new(repo, 10, Duration::from_millis(20));
    seed_event(&store, 1);

    let warm = store.fetch_events_page(None, 1).unwrap();
    std::thread::sleep(Duration::from_millis(40));
    counting.set_offline(true);

    let stale = store.fetch_events_page(None, 1).unwrap();
    assert!(stale.stale);
    assert_eq!(stale.events, warm.events);
    assert_eq!(stale.total_count, 1);
}

#[test]
fn grouping_skips_unresolved_joins() {
    let event = Event::new(EventStatus::Confirmed, 1, "hall", "");
    let worker = Worker::new("Ana", "server");
    let rows = vec![
        AssignmentWithJoins {
            assignment: Assignment::new(event.id, worker.id, 1),
            event: Some(event.clone()),
            worker: Some(worker.clone()),
        },
        AssignmentWithJoins {
            assignment: Assignment::new(event.id, Uuid::new_v4(), 2),
            event: Some(event.clone()),
            worker: None,
        },
        AssignmentWithJoins {
            assignment: Assignment::new(Uuid::new_v4(), worker.id, 3),
            event: None,
            worker: Some(worker.clone()),
        },
    ];

    let grouped = AssignmentStore::group_by_event(&rows);
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped[0].event_id(), event.id);
    assert_eq!(grouped[0].worker_ids(), vec![worker.id]);
}
