//! Cached read/write accessor for assignments and their grouped projection.
//!
//! # Responsibility
//! - Serve event pages, counts and assignment joins through `KeyedCache`.
//! - Perform assignment writes and invalidate affected cache groups.
//!
//! # Invariants
//! - Reads consult the cache first; misses backfill it.
//! - A read that fails with a store error serves the stale cached value when
//!   one exists, and reports the failure otherwise.
//! - Every successful write invalidates its groups before returning.

use crate::cache::KeyedCache;
use crate::error::{ScheduleError, ScheduleResult};
use crate::model::assignment::{Assignment, AssignmentWithJoins};
use crate::model::event::{Event, EventId, EventStatus};
use crate::model::schedule::{self, GroupedSchedule};
use crate::model::worker::{Worker, WorkerId};
use crate::pagination::{self, PageWindow};
use crate::repo::schedule_repo::{
    new_assignment, EventListQuery, EventSortColumn, RepoError, ScheduleRepository,
    SortDirection,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub const EVENTS_GROUP: &str = "events";
pub const ASSIGNMENTS_GROUP: &str = "assignments";
pub const WORKERS_GROUP: &str = "workers";

const ALL_GROUPS: &[&str] = &[EVENTS_GROUP, ASSIGNMENTS_GROUP, WORKERS_GROUP];

/// One page of events plus the exact total used to bound paging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventsPage {
    pub events: Vec<Event>,
    pub total_count: u64,
    pub page_number: u32,
    pub total_pages: u32,
    /// True when the store was unreachable and a stale cached value was served.
    pub stale: bool,
}

struct Fetched<T> {
    value: T,
    stale: bool,
}

/// Cached accessor over a `ScheduleRepository`.
pub struct AssignmentStore {
    repo: Arc<dyn ScheduleRepository>,
    page_size: u32,
    pages: KeyedCache<Arc<Vec<Event>>>,
    counts: KeyedCache<u64>,
    joins: KeyedCache<Arc<Vec<AssignmentWithJoins>>>,
    events: KeyedCache<Event>,
    workers: KeyedCache<Worker>,
}

impl AssignmentStore {
    pub fn new(repo: Arc<dyn ScheduleRepository>, page_size: u32, cache_ttl: Duration) -> Self {
        Self {
            repo,
            page_size: page_size.max(1),
            pages: KeyedCache::new(cache_ttl),
            counts: KeyedCache::new(cache_ttl),
            joins: KeyedCache::new(cache_ttl),
            events: KeyedCache::new(cache_ttl),
            workers: KeyedCache::new(cache_ttl),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn repository(&self) -> &Arc<dyn ScheduleRepository> {
        &self.repo
    }

    /// Fetches one page of events ordered by event date ascending.
    ///
    /// Content and count are cached independently under `events`.
    pub fn fetch_events_page(
        &self,
        status: Option<EventStatus>,
        page_number: u32,
    ) -> ScheduleResult<EventsPage> {
        let total = self.count_events_fetched(status)?;
        let window = pagination::page(page_number, self.page_size);
        let key = format!(
            "events:page:{}:{}:{}",
            status_key(status),
            window.offset,
            window.limit
        );

        let page = read_through(&self.pages, &key, &[EVENTS_GROUP], || {
            self.repo
                .list_events(&events_query(status, window))
                .map(Arc::new)
        })?;

        Ok(EventsPage {
            events: page.value.as_ref().clone(),
            total_count: total.value,
            page_number: page_number.max(1),
            total_pages: pagination::total_pages(total.value, self.page_size),
            stale: page.stale || total.stale,
        })
    }

    /// Exact count of events with `status` (all events when `None`).
    pub fn count_events(&self, status: Option<EventStatus>) -> ScheduleResult<u64> {
        self.count_events_fetched(status).map(|fetched| fetched.value)
    }

    /// Unbounded denormalized read of every live assignment.
    pub fn fetch_all_assignments_with_joins(&self) -> ScheduleResult<Vec<AssignmentWithJoins>> {
        let fetched = read_through(&self.joins, "assignments:joined", ALL_GROUPS, || {
            self.repo.list_assignments_with_joins().map(Arc::new)
        })?;
        Ok(fetched.value.as_ref().clone())
    }

    /// Groups joined assignments by event, skipping unresolved joins.
    pub fn group_by_event(assignments: &[AssignmentWithJoins]) -> Vec<GroupedSchedule> {
        schedule::group_by_event(assignments)
    }

    /// Fetches the full grouped schedule.
    pub fn fetch_grouped(&self) -> ScheduleResult<Vec<GroupedSchedule>> {
        let joined = self.fetch_all_assignments_with_joins()?;
        Ok(Self::group_by_event(&joined))
    }

    pub fn fetch_event(&self, id: EventId) -> ScheduleResult<Option<Event>> {
        let key = format!("event:{id}");
        if let Some(event) = self.events.get(&key) {
            return Ok(Some(event));
        }
        let generation = self.events.generation();
        let event = self.repo.get_event(id)?;
        if let Some(event) = &event {
            self.events
                .set_if_unchanged(generation, &key, event.clone(), None, &[EVENTS_GROUP]);
        }
        Ok(event)
    }

    pub fn fetch_worker(&self, id: WorkerId) -> ScheduleResult<Option<Worker>> {
        let key = format!("worker:{id}");
        if let Some(worker) = self.workers.get(&key) {
            return Ok(Some(worker));
        }
        let generation = self.workers.generation();
        let worker = self.repo.get_worker(id)?;
        if let Some(worker) = &worker {
            self.workers
                .set_if_unchanged(generation, &key, worker.clone(), None, &[WORKERS_GROUP]);
        }
        Ok(worker)
    }

    /// Live row for the pair, read from the store without caching.
    pub fn fetch_live_assignment(
        &self,
        event_id: EventId,
        worker_id: WorkerId,
    ) -> ScheduleResult<Option<Assignment>> {
        Ok(self.repo.find_assignment(event_id, worker_id)?)
    }

    /// Reads the worker from the store, skipping and not filling the cache.
    pub fn fetch_worker_uncached(&self, id: WorkerId) -> ScheduleResult<Option<Worker>> {
        Ok(self.repo.get_worker(id)?)
    }

    /// Creates one assignment and invalidates `events` and `assignments`.
    ///
    /// Fails with `DuplicateAssignment` when the pair is already live and
    /// with `NotFound` when either id does not exist.
    pub fn create_assignment(
        &self,
        event_id: EventId,
        worker_id: WorkerId,
    ) -> ScheduleResult<Assignment> {
        let assignment = self.create_assignment_deferred(event_id, worker_id)?;
        self.invalidate_groups(&[EVENTS_GROUP, ASSIGNMENTS_GROUP]);
        Ok(assignment)
    }

    /// Creates one assignment without invalidating caches.
    ///
    /// Callers batching several writes invalidate once afterwards.
    pub fn create_assignment_deferred(
        &self,
        event_id: EventId,
        worker_id: WorkerId,
    ) -> ScheduleResult<Assignment> {
        let assignment = new_assignment(event_id, worker_id);
        self.repo.insert_assignment(&assignment)?;
        info!(
            "event=assignment_create module=store status=ok event_id={event_id} worker_id={worker_id} assignment_id={}",
            assignment.id
        );
        Ok(assignment)
    }

    /// Soft-deletes the pair. Removing a missing pair returns `false`.
    pub fn remove_assignment(&self, event_id: EventId, worker_id: WorkerId) -> ScheduleResult<bool> {
        let removed = self.repo.soft_delete_assignment(event_id, worker_id)?;
        if removed {
            self.invalidate_groups(&[EVENTS_GROUP, ASSIGNMENTS_GROUP]);
        }
        info!(
            "event=assignment_remove module=store status=ok event_id={event_id} worker_id={worker_id} removed={removed}"
        );
        Ok(removed)
    }

    pub fn create_event(&self, event: &Event) -> ScheduleResult<EventId> {
        let id = self.repo.create_event(event)?;
        self.invalidate_groups(&[EVENTS_GROUP]);
        Ok(id)
    }

    pub fn update_event(&self, event: &Event) -> ScheduleResult<()> {
        self.repo.update_event(event)?;
        self.invalidate_groups(&[EVENTS_GROUP, ASSIGNMENTS_GROUP]);
        Ok(())
    }

    pub fn create_worker(&self, worker: &Worker) -> ScheduleResult<WorkerId> {
        let id = self.repo.create_worker(worker)?;
        self.invalidate_groups(&[WORKERS_GROUP]);
        Ok(id)
    }

    pub fn update_worker(&self, worker: &Worker) -> ScheduleResult<()> {
        self.repo.update_worker(worker)?;
        self.invalidate_groups(&[WORKERS_GROUP, ASSIGNMENTS_GROUP]);
        Ok(())
    }

    /// Evicts every cached entry tagged into any of `groups`.
    pub fn invalidate_groups(&self, groups: &[&str]) {
        let evicted = self.pages.invalidate_groups(groups)
            + self.counts.invalidate_groups(groups)
            + self.joins.invalidate_groups(groups)
            + self.events.invalidate_groups(groups)
            + self.workers.invalidate_groups(groups);
        debug!(
            "event=store_invalidate module=store status=ok groups={} evicted={evicted}",
            groups.join(",")
        );
    }

    fn count_events_fetched(&self, status: Option<EventStatus>) -> ScheduleResult<Fetched<u64>> {
        let key = format!("events:count:{}", status_key(status));
        read_through(&self.counts, &key, &[EVENTS_GROUP], || {
            self.repo.count_events(status)
        })
    }
}

fn read_through<T: Clone>(
    cache: &KeyedCache<T>,
    key: &str,
    groups: &[&str],
    fetch: impl FnOnce() -> Result<T, RepoError>,
) -> ScheduleResult<Fetched<T>> {
    if let Some(value) = cache.get(key) {
        debug!("event=cache_read module=store status=hit key={key}");
        return Ok(Fetched {
            value,
            stale: false,
        });
    }

    let generation = cache.generation();
    match fetch() {
        Ok(value) => {
            cache.set_if_unchanged(generation, key, value.clone(), None, groups);
            Ok(Fetched {
                value,
                stale: false,
            })
        }
        Err(err) => {
            let err = ScheduleError::from(err);
            if let ScheduleError::StoreUnavailable(_) = err {
                if let Some(value) = cache.get_stale(key) {
                    warn!(
                        "event=cache_read module=store status=stale key={key} error_code=store_unavailable transient={} error={err}",
                        err.is_transient()
                    );
                    return Ok(Fetched { value, stale: true });
                }
            }
            warn!(
                "event=cache_read module=store status=error key={key} transient={} error={err}",
                err.is_transient()
            );
            Err(err)
        }
    }
}

fn events_query(status: Option<EventStatus>, window: PageWindow) -> EventListQuery {
    EventListQuery {
        status,
        order_by: EventSortColumn::EventDate,
        direction: SortDirection::Asc,
        limit: Some(window.limit),
        offset: window.offset,
    }
}

fn status_key(status: Option<EventStatus>) -> &'static str {
    status.map_or("all", EventStatus::as_str)
}
