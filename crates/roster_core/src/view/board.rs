//! In-memory grouped schedule shared by the view and the change merger.
//!
//! # Responsibility
//! - Hold one `GroupedSchedule` per event in first-seen order.
//! - Serialize mutations per event while allowing cross-event concurrency.
//! - Swap in full reloads without losing merges that raced the reload.
//!
//! # Invariants
//! - No group ever holds two workers with the same id.
//! - Mutations of one event run under that event's slot lock.
//! - Lock order is index, then slot, then journal.
//! - A merge applied after a rebuild began is replayed onto the rebuilt board.

use crate::model::event::{Event, EventId};
use crate::model::schedule::{GroupedSchedule, WorkerMerge};
use crate::model::worker::{Worker, WorkerId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

type Slot = Arc<Mutex<GroupedSchedule>>;

/// Result of merging one worker into the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardMerge {
    /// A previously unscheduled event got its first worker.
    CreatedGroup,
    Appended,
    Replaced,
    /// The worker was already present; nothing changed.
    Duplicate,
}

impl From<WorkerMerge> for BoardMerge {
    fn from(value: WorkerMerge) -> Self {
        match value {
            WorkerMerge::Appended => Self::Appended,
            WorkerMerge::Replaced => Self::Replaced,
            WorkerMerge::AlreadyPresent => Self::Duplicate,
        }
    }
}

/// Handle for one in-flight full reload.
#[derive(Debug)]
#[must_use = "finish or abandon the rebuild so its journal can be trimmed"]
pub struct RebuildTicket {
    seq: u64,
}

#[derive(Debug, Clone)]
enum JournalEntry {
    Insert(Event, Worker),
    Upsert(Event, Worker),
    RefreshWorker(Worker),
    RefreshEvent(Event),
    Remove(EventId, WorkerId),
}

#[derive(Debug, Default)]
struct Journal {
    next_seq: u64,
    open: BTreeMap<u64, usize>,
    entries: Vec<(u64, JournalEntry)>,
}

impl Journal {
    fn record(&mut self, entry: JournalEntry) {
        self.next_seq += 1;
        if !self.open.is_empty() {
            self.entries.push((self.next_seq, entry));
        }
    }

    fn close(&mut self, seq: u64) {
        if let Some(count) = self.open.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                self.open.remove(&seq);
            }
        }
        match self.open.keys().next().copied() {
            Some(oldest) => self.entries.retain(|(entry_seq, _)| *entry_seq > oldest),
            None => self.entries.clear(),
        }
    }
}

#[derive(Debug, Default)]
struct BoardIndex {
    order: Vec<EventId>,
    slots: HashMap<EventId, Slot>,
}

impl BoardIndex {
    fn from_groups(groups: Vec<GroupedSchedule>) -> Self {
        let mut index = Self::default();
        for group in groups {
            let event_id = group.event_id();
            if let Some(slot) = index.slots.get(&event_id) {
                let mut existing = lock_slot(slot);
                for worker in group.workers {
                    existing.insert_worker(worker);
                }
                continue;
            }
            index.order.push(event_id);
            index.slots.insert(event_id, Arc::new(Mutex::new(group)));
        }
        index
    }

    fn apply(&mut self, entry: &JournalEntry) {
        match entry {
            JournalEntry::Insert(event, worker) => {
                self.merge_into(event, worker.clone(), GroupedSchedule::insert_worker);
            }
            JournalEntry::Upsert(event, worker) => {
                self.merge_into(event, worker.clone(), GroupedSchedule::upsert_worker);
            }
            JournalEntry::RefreshWorker(worker) => {
                for slot in self.slots.values() {
                    lock_slot(slot).refresh_worker(worker);
                }
            }
            JournalEntry::RefreshEvent(event) => {
                if let Some(slot) = self.slots.get(&event.id) {
                    lock_slot(slot).event = event.clone();
                }
            }
            JournalEntry::Remove(event_id, worker_id) => {
                if let Some(slot) = self.slots.get(event_id) {
                    lock_slot(slot).remove_worker(*worker_id);
                }
            }
        }
    }

    fn merge_into(
        &mut self,
        event: &Event,
        worker: Worker,
        merge: fn(&mut GroupedSchedule, Worker) -> WorkerMerge,
    ) {
        match self.slots.get(&event.id) {
            Some(slot) => {
                merge(&mut lock_slot(slot), worker);
            }
            None => {
                let mut group = GroupedSchedule::new(event.clone());
                group.insert_worker(worker);
                self.order.push(event.id);
                self.slots.insert(event.id, Arc::new(Mutex::new(group)));
            }
        }
    }
}

/// Shared grouped schedule collection.
#[derive(Debug, Default)]
pub struct ScheduleBoard {
    index: RwLock<BoardIndex>,
    journal: Mutex<Journal>,
}

impl ScheduleBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `worker` to the event's group unless already present.
    pub fn insert(&self, event: &Event, worker: Worker) -> BoardMerge {
        self.merge(event, worker, GroupedSchedule::insert_worker, JournalEntry::Insert)
    }

    /// Replaces the worker entry in place, or adds it when absent.
    pub fn upsert(&self, event: &Event, worker: Worker) -> BoardMerge {
        self.merge(event, worker, GroupedSchedule::upsert_worker, JournalEntry::Upsert)
    }

    /// Refreshes the worker's details in every group that holds it.
    pub fn refresh_worker(&self, worker: &Worker) -> usize {
        let index = self.read_index();
        let mut refreshed = 0;
        for slot in index.slots.values() {
            if lock_slot(slot).refresh_worker(worker) {
                refreshed += 1;
            }
        }
        self.lock_journal()
            .record(JournalEntry::RefreshWorker(worker.clone()));
        refreshed
    }

    /// Refreshes the event carried by an existing group.
    pub fn refresh_event(&self, event: &Event) -> bool {
        let index = self.read_index();
        let refreshed = match index.slots.get(&event.id) {
            Some(slot) => {
                lock_slot(slot).event = event.clone();
                true
            }
            None => false,
        };
        self.lock_journal()
            .record(JournalEntry::RefreshEvent(event.clone()));
        refreshed
    }

    /// Drops one worker from an event's group. Groups themselves are kept.
    pub fn remove_worker(&self, event_id: EventId, worker_id: WorkerId) -> bool {
        let index = self.read_index();
        let removed = index
            .slots
            .get(&event_id)
            .is_some_and(|slot| lock_slot(slot).remove_worker(worker_id));
        self.lock_journal()
            .record(JournalEntry::Remove(event_id, worker_id));
        removed
    }

    pub fn group(&self, event_id: EventId) -> Option<GroupedSchedule> {
        self.read_index()
            .slots
            .get(&event_id)
            .map(|slot| lock_slot(slot).clone())
    }

    pub fn contains_event(&self, event_id: EventId) -> bool {
        self.read_index().slots.contains_key(&event_id)
    }

    /// Copies every group in first-seen order.
    pub fn snapshot(&self) -> Vec<GroupedSchedule> {
        let index = self.read_index();
        index
            .order
            .iter()
            .filter_map(|event_id| index.slots.get(event_id))
            .map(|slot| lock_slot(slot).clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read_index().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts journaling merges so a reload fetched from now on keeps them.
    pub fn begin_rebuild(&self) -> RebuildTicket {
        let mut journal = self.lock_journal();
        let seq = journal.next_seq;
        *journal.open.entry(seq).or_insert(0) += 1;
        RebuildTicket { seq }
    }

    /// Replaces the board with `groups`, then replays merges journaled since
    /// the ticket was issued.
    pub fn finish_rebuild(&self, ticket: RebuildTicket, groups: Vec<GroupedSchedule>) {
        let mut index = self.write_index();
        let mut journal = self.lock_journal();

        let mut rebuilt = BoardIndex::from_groups(groups);
        for (_, entry) in journal
            .entries
            .iter()
            .filter(|(entry_seq, _)| *entry_seq > ticket.seq)
        {
            rebuilt.apply(entry);
        }
        *index = rebuilt;
        journal.close(ticket.seq);
    }

    /// Drops a rebuild whose fetch failed or was superseded.
    pub fn abandon_rebuild(&self, ticket: RebuildTicket) {
        self.lock_journal().close(ticket.seq);
    }

    fn merge(
        &self,
        event: &Event,
        worker: Worker,
        merge: fn(&mut GroupedSchedule, Worker) -> WorkerMerge,
        journal_entry: fn(Event, Worker) -> JournalEntry,
    ) -> BoardMerge {
        {
            let index = self.read_index();
            if let Some(slot) = index.slots.get(&event.id) {
                let outcome = merge(&mut lock_slot(slot), worker.clone());
                self.lock_journal()
                    .record(journal_entry(event.clone(), worker));
                return outcome.into();
            }
        }

        let mut index = self.write_index();
        let outcome = match index.slots.get(&event.id) {
            Some(slot) => merge(&mut lock_slot(slot), worker.clone()).into(),
            None => {
                let mut group = GroupedSchedule::new(event.clone());
                group.insert_worker(worker.clone());
                index.order.push(event.id);
                index.slots.insert(event.id, Arc::new(Mutex::new(group)));
                BoardMerge::CreatedGroup
            }
        };
        self.lock_journal()
            .record(journal_entry(event.clone(), worker));
        outcome
    }

    fn read_index(&self) -> RwLockReadGuard<'_, BoardIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, BoardIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_journal(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock_slot(slot: &Slot) -> MutexGuard<'_, GroupedSchedule> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{BoardMerge, ScheduleBoard};
    use crate::model::event::{Event, EventStatus};
    use crate::model::schedule::GroupedSchedule;
    use crate::model::worker::Worker;
    use std::sync::Arc;
    use std::thread;

    fn event(venue: &str) -> Event {
        Event::new(EventStatus::Confirmed, 0, venue, "Downtown")
    }

    #[test]
    fn first_insert_creates_group_and_repeat_is_duplicate() {
        let board = ScheduleBoard::new();
        let hall = event("Hall");
        let ana = Worker::new("Ana", "server");

        assert_eq!(board.insert(&hall, ana.clone()), BoardMerge::CreatedGroup);
        assert_eq!(board.insert(&hall, ana.clone()), BoardMerge::Duplicate);
        assert_eq!(board.group(hall.id).unwrap().worker_ids(), vec![ana.id]);
    }

    #[test]
    fn concurrent_inserts_of_same_worker_leave_one_entry() {
        let board = Arc::new(ScheduleBoard::new());
        let hall = event("Hall");
        let ana = Worker::new("Ana", "server");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let board = Arc::clone(&board);
                let hall = hall.clone();
                let ana = ana.clone();
                thread::spawn(move || {
                    board.insert(&hall, ana.clone());
                    board.upsert(&hall, ana);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(board.len(), 1);
        assert_eq!(board.group(hall.id).unwrap().workers.len(), 1);
    }

    #[test]
    fn rebuild_replays_merges_that_raced_the_fetch() {
        let board = ScheduleBoard::new();
        let hall = event("Hall");
        let garden = event("Garden");
        let ana = Worker::new("Ana", "server");
        let ben = Worker::new("Ben", "cook");

        let ticket = board.begin_rebuild();
        // Arrives from the feed while the reload is still fetching.
        board.insert(&garden, ben.clone());

        let mut fetched = GroupedSchedule::new(hall.clone());
        fetched.insert_worker(ana.clone());
        board.finish_rebuild(ticket, vec![fetched]);

        let groups = board.snapshot();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].event_id(), hall.id);
        assert_eq!(groups[1].worker_ids(), vec![ben.id]);
    }

    #[test]
    fn rebuild_does_not_replay_merges_from_before_the_ticket() {
        let board = ScheduleBoard::new();
        let hall = event("Hall");
        let ana = Worker::new("Ana", "server");
        board.insert(&hall, ana);

        let ticket = board.begin_rebuild();
        board.finish_rebuild(ticket, Vec::new());

        assert!(board.is_empty());
    }
}
