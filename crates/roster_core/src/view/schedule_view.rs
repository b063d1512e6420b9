//! Paginated event view plus the grouped schedule it displays.
//!
//! # Responsibility
//! - Own the current page cursor and the last published page of events.
//! - Rebuild the shared board from the store on reload/refetch.
//! - React to merger signals (count refresh, resync).
//!
//! # Invariants
//! - A reload publishes only if no newer reload started and the view is
//!   still attached; store writes already issued are not rolled back.
//! - Totals are re-read from the store, never incremented locally.

use super::board::ScheduleBoard;
use crate::error::ScheduleResult;
use crate::merge::MergeListener;
use crate::model::event::{EventId, EventStatus};
use crate::model::schedule::GroupedSchedule;
use crate::pagination::{self, Paginator};
use crate::service::assignment_store::{AssignmentStore, EventsPage};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Whether a reload's result became visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Published { page_number: u32 },
    /// A newer reload started before this one finished.
    Superseded,
    /// The view was detached while the reload was in flight.
    Detached,
}

#[derive(Debug)]
struct ViewState {
    paginator: Paginator,
    page: Option<EventsPage>,
}

/// Single logical owner of one grouped schedule collection.
pub struct ScheduleView {
    store: Arc<AssignmentStore>,
    board: Arc<ScheduleBoard>,
    status: Option<EventStatus>,
    state: Mutex<ViewState>,
    generation: AtomicU64,
    detached: AtomicBool,
}

impl ScheduleView {
    pub fn new(
        store: Arc<AssignmentStore>,
        board: Arc<ScheduleBoard>,
        status: Option<EventStatus>,
    ) -> Self {
        let page_size = store.page_size();
        Self {
            store,
            board,
            status,
            state: Mutex::new(ViewState {
                paginator: Paginator::new(page_size),
                page: None,
            }),
            generation: AtomicU64::new(0),
            detached: AtomicBool::new(false),
        }
    }

    pub fn status_filter(&self) -> Option<EventStatus> {
        self.status
    }

    /// Loads `page_number` (clamped) and rebuilds the grouped schedule.
    pub fn reload_page(&self, page_number: u32) -> ScheduleResult<ReloadOutcome> {
        let started_at = Instant::now();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ticket = self.board.begin_rebuild();

        let loaded = self.load(page_number);
        let (page, grouped) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                self.board.abandon_rebuild(ticket);
                warn!(
                    "event=view_reload module=view status=error page={page_number} duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                return Err(err);
            }
        };

        let mut state = self.lock_state();
        if self.detached.load(Ordering::SeqCst) {
            self.board.abandon_rebuild(ticket);
            debug!("event=view_reload module=view status=skip reason=detached page={page_number}");
            return Ok(ReloadOutcome::Detached);
        }
        if self.generation.load(Ordering::SeqCst) != generation {
            self.board.abandon_rebuild(ticket);
            debug!("event=view_reload module=view status=skip reason=superseded page={page_number}");
            return Ok(ReloadOutcome::Superseded);
        }

        self.board.finish_rebuild(ticket, grouped);
        let published = state.paginator.go_to(page.page_number, page.total_count);
        info!(
            "event=view_reload module=view status=ok page={published} total_pages={} events={} groups={} stale={} duration_ms={}",
            page.total_pages,
            page.events.len(),
            self.board.len(),
            page.stale,
            started_at.elapsed().as_millis()
        );
        state.page = Some(page);
        Ok(ReloadOutcome::Published {
            page_number: published,
        })
    }

    /// Reloads the current page and the full grouped schedule.
    pub fn refetch(&self) -> ScheduleResult<ReloadOutcome> {
        let current = self.lock_state().paginator.current_page();
        self.reload_page(current)
    }

    /// Re-reads the total count and updates paging bounds of the shown page.
    pub fn refresh_totals(&self) -> ScheduleResult<u64> {
        let total = self.store.count_events(self.status)?;
        let mut state = self.lock_state();
        if self.detached.load(Ordering::SeqCst) {
            return Ok(total);
        }
        let page_size = state.paginator.page_size();
        if let Some(page) = state.page.as_mut() {
            page.total_count = total;
            page.total_pages = pagination::total_pages(total, page_size);
        }
        debug!("event=view_totals module=view status=ok total={total}");
        Ok(total)
    }

    /// Stops every in-flight and future reload from publishing.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
        info!("event=view_detach module=view status=ok");
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn current_page(&self) -> Option<EventsPage> {
        self.lock_state().page.clone()
    }

    pub fn current_page_number(&self) -> u32 {
        self.lock_state().paginator.current_page()
    }

    /// Every known group, in first-seen order.
    pub fn grouped(&self) -> Vec<GroupedSchedule> {
        self.board.snapshot()
    }

    /// Groups for the events on the published page, in page order.
    pub fn grouped_for_page(&self) -> Vec<GroupedSchedule> {
        let Some(page) = self.current_page() else {
            return Vec::new();
        };
        let on_page: HashSet<EventId> = page.events.iter().map(|event| event.id).collect();
        let mut groups: Vec<GroupedSchedule> = self
            .board
            .snapshot()
            .into_iter()
            .filter(|group| on_page.contains(&group.event_id()))
            .collect();
        let position = |id: EventId| page.events.iter().position(|event| event.id == id);
        groups.sort_by_key(|group| position(group.event_id()));
        groups
    }

    pub fn group(&self, event_id: EventId) -> Option<GroupedSchedule> {
        self.board.group(event_id)
    }

    fn load(&self, page_number: u32) -> ScheduleResult<(EventsPage, Vec<GroupedSchedule>)> {
        let total = self.store.count_events(self.status)?;
        let clamped = pagination::clamp_page(page_number, total, self.store.page_size());
        let page = self.store.fetch_events_page(self.status, clamped)?;
        let grouped = self.store.fetch_grouped()?;
        Ok((page, grouped))
    }

    fn lock_state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MergeListener for ScheduleView {
    fn totals_changed(&self, event_id: EventId) {
        if let Err(err) = self.refresh_totals() {
            warn!("event=view_totals module=view status=error event_id={event_id} error={err}");
        }
    }

    fn resync_required(&self, missed: u64) {
        match self.refetch() {
            Ok(outcome) => {
                info!("event=view_resync module=view status=ok missed={missed} outcome={outcome:?}")
            }
            Err(err) => warn!("event=view_resync module=view status=error missed={missed} error={err}"),
        }
    }
}
