//! Applies live change events to the shared `ScheduleBoard`.
//!
//! # Responsibility
//! - Consume the live feed and route changes to per-event merge shards.
//! - Resolve referenced events/workers through the store, retrying once.
//! - Keep synchronous store work and listener callbacks off the async workers.
//! - Invalidate caches touched by remote writes and signal count refreshes.
//!
//! # Invariants
//! - Changes for one event id always land on the same shard, so they are
//!   applied one at a time in feed-arrival order.
//! - Inserts never duplicate a worker; updates replace in place and fall back
//!   to insert when the worker is not present yet.
//! - Malformed or unresolvable changes are logged and dropped; they never
//!   stop the loop or touch unrelated groups.
//! - An assignment reaches the board only while its row is live, so a queued
//!   insert for a removed row never brings the worker back.

use crate::config::EngineConfig;
use crate::error::ScheduleResult;
use crate::feed::{FeedItem, FeedSubscription};
use crate::model::assignment::Assignment;
use crate::model::change::{ChangeEvent, ChangeKind, ChangeRecord};
use crate::model::event::{Event, EventId};
use crate::model::worker::Worker;
use crate::service::assignment_store::{
    AssignmentStore, ASSIGNMENTS_GROUP, EVENTS_GROUP, WORKERS_GROUP,
};
use crate::view::board::{BoardMerge, ScheduleBoard};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Callbacks for effects the merger cannot compute locally.
pub trait MergeListener: Send + Sync {
    /// Totals may have changed (e.g. first assignment to an event).
    fn totals_changed(&self, event_id: EventId);
    /// The feed dropped changes; the board must be reloaded from the store.
    fn resync_required(&self, missed: u64);
}

/// Listener that ignores every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMergeListener;

impl MergeListener for NoopMergeListener {
    fn totals_changed(&self, _event_id: EventId) {}
    fn resync_required(&self, _missed: u64) {}
}

/// What applying one change did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Board(BoardMerge),
    /// Event/worker details refreshed in this many groups.
    Refreshed(usize),
    /// The change carries nothing the board tracks.
    Ignored,
    /// Malformed or unresolvable; logged and dropped.
    Dropped,
}

/// Counters for the lifetime of one merger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub applied: u64,
    pub duplicates: u64,
    pub dropped: u64,
    pub lagged: u64,
}

#[derive(Debug, Default)]
struct MergeCounters {
    applied: AtomicU64,
    duplicates: AtomicU64,
    dropped: AtomicU64,
    lagged: AtomicU64,
}

impl MergeCounters {
    fn record(&self, outcome: MergeOutcome) {
        let counter = match outcome {
            MergeOutcome::Board(BoardMerge::Duplicate) => &self.duplicates,
            MergeOutcome::Dropped => &self.dropped,
            _ => &self.applied,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MergeStats {
        MergeStats {
            applied: self.applied.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            lagged: self.lagged.load(Ordering::Relaxed),
        }
    }
}

/// Reconciles feed changes into the grouped board.
pub struct ChangeMerger {
    store: Arc<AssignmentStore>,
    board: Arc<ScheduleBoard>,
    listener: Arc<dyn MergeListener>,
    retry_delay: Duration,
    shards: usize,
    queue_capacity: usize,
    counters: MergeCounters,
}

/// Running merge loop.
pub struct MergeHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    merger: Arc<ChangeMerger>,
}

impl MergeHandle {
    /// Stops reading the feed, drains queued changes, and returns final stats.
    pub async fn shutdown(self) -> MergeStats {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            warn!("event=merge_shutdown module=merge status=error error={err}");
        }
        let stats = self.merger.stats();
        info!(
            "event=merge_shutdown module=merge status=ok applied={} duplicates={} dropped={} lagged={}",
            stats.applied, stats.duplicates, stats.dropped, stats.lagged
        );
        stats
    }

    pub fn stats(&self) -> MergeStats {
        self.merger.stats()
    }
}

impl ChangeMerger {
    pub fn new(
        store: Arc<AssignmentStore>,
        board: Arc<ScheduleBoard>,
        listener: Arc<dyn MergeListener>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            board,
            listener,
            retry_delay: config.resolve_retry_delay(),
            shards: config.merge_shards.max(1),
            queue_capacity: config.merge_queue_capacity.max(1),
            counters: MergeCounters::default(),
        }
    }

    pub fn stats(&self) -> MergeStats {
        self.counters.snapshot()
    }

    /// Spawns the feed loop plus one task per merge shard.
    pub fn spawn(self: Arc<Self>, subscription: FeedSubscription) -> MergeHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let merger = Arc::clone(&self);
        let join = tokio::spawn(async move { merger.run(subscription, shutdown_rx).await });
        MergeHandle {
            shutdown,
            join,
            merger: self,
        }
    }

    async fn run(self: Arc<Self>, mut subscription: FeedSubscription, mut shutdown: watch::Receiver<bool>) {
        let mut senders = Vec::with_capacity(self.shards);
        let mut workers = Vec::with_capacity(self.shards);
        for shard in 0..self.shards {
            let (tx, mut rx) = mpsc::channel::<(ChangeKind, ChangeRecord)>(self.queue_capacity);
            let merger = Arc::clone(&self);
            workers.push(tokio::spawn(async move {
                while let Some((kind, record)) = rx.recv().await {
                    merger.apply_record(kind, record).await;
                }
                debug!("event=merge_shard module=merge status=stopped shard={shard}");
            }));
            senders.push(tx);
        }
        info!("event=merge_start module=merge status=ok shards={}", self.shards);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                item = subscription.next() => match item {
                    None => {
                        info!("event=merge_feed module=merge status=closed");
                        break;
                    }
                    Some(FeedItem::Lagged(missed)) => {
                        self.counters.lagged.fetch_add(missed, Ordering::Relaxed);
                        warn!("event=merge_feed module=merge status=lagged missed={missed}");
                        // Missed changes may touch any table.
                        self.store
                            .invalidate_groups(&[EVENTS_GROUP, ASSIGNMENTS_GROUP, WORKERS_GROUP]);
                        self.signal(move |listener| listener.resync_required(missed))
                            .await;
                    }
                    Some(FeedItem::Change(change)) => {
                        let Some((kind, record)) = self.decode(&change) else {
                            continue;
                        };
                        let shard = self.shard_for(&record);
                        if senders[shard].send((kind, record)).await.is_err() {
                            warn!("event=merge_route module=merge status=error shard={shard} error_code=shard_closed");
                        }
                    }
                },
            }
        }

        drop(senders);
        for worker in workers {
            if let Err(err) = worker.await {
                warn!("event=merge_shard module=merge status=error error={err}");
            }
        }
    }

    /// Applies one change immediately, bypassing shard routing.
    ///
    /// Callers must serialize calls per event id themselves.
    pub async fn apply(&self, change: &ChangeEvent) -> MergeOutcome {
        match self.decode(change) {
            Some((kind, record)) => self.apply_record(kind, record).await,
            None => MergeOutcome::Dropped,
        }
    }

    fn decode(&self, change: &ChangeEvent) -> Option<(ChangeKind, ChangeRecord)> {
        match change.decode() {
            Ok(record) => Some((change.kind, record)),
            Err(err) => {
                self.counters.record(MergeOutcome::Dropped);
                warn!(
                    "event=merge_apply module=merge status=error error_code=malformed_change table={} error={err}",
                    change.table.as_str()
                );
                None
            }
        }
    }

    fn shard_for(&self, record: &ChangeRecord) -> usize {
        let key: Uuid = match record {
            ChangeRecord::Assignment(row) => row.event_id,
            ChangeRecord::Event(row) => row.id,
            ChangeRecord::Worker(row) => row.id,
        };
        (key.as_u128() % self.shards as u128) as usize
    }

    async fn apply_record(&self, kind: ChangeKind, record: ChangeRecord) -> MergeOutcome {
        let outcome = match record {
            ChangeRecord::Assignment(row) => self.merge_assignment(kind, row).await,
            ChangeRecord::Event(event) => self.merge_event(kind, &event).await,
            ChangeRecord::Worker(worker) => self.merge_worker(kind, &worker),
        };
        self.counters.record(outcome);
        outcome
    }

    async fn merge_assignment(&self, kind: ChangeKind, row: Assignment) -> MergeOutcome {
        self.store.invalidate_groups(&[ASSIGNMENTS_GROUP]);

        let (event, worker) = match self.resolve(&row).await {
            Resolution::Ready(event, worker) => (event, worker),
            Resolution::Stale => {
                info!(
                    "event=merge_apply module=merge status=skip error_code=stale_assignment assignment_id={} event_id={} worker_id={}",
                    row.id, row.event_id, row.worker_id
                );
                return MergeOutcome::Dropped;
            }
            Resolution::Unresolved => {
                warn!(
                    "event=merge_apply module=merge status=error error_code=unresolved_reference assignment_id={} event_id={} worker_id={}",
                    row.id, row.event_id, row.worker_id
                );
                return MergeOutcome::Dropped;
            }
        };

        let merged = match kind {
            ChangeKind::Insert => self.board.insert(&event, worker.clone()),
            ChangeKind::Update => self.board.upsert(&event, worker.clone()),
        };
        debug!(
            "event=merge_apply module=merge status=ok kind={kind:?} event_id={} worker_id={} outcome={merged:?}",
            row.event_id, row.worker_id
        );
        if merged == BoardMerge::Duplicate {
            return MergeOutcome::Board(merged);
        }

        if !self.settle(&event, &worker).await {
            return MergeOutcome::Dropped;
        }
        if merged == BoardMerge::CreatedGroup {
            let event_id = row.event_id;
            self.signal(move |listener| listener.totals_changed(event_id))
                .await;
        }
        MergeOutcome::Board(merged)
    }

    /// Re-reads the pair after a board write.
    ///
    /// A removal that committed while the change was being resolved takes the
    /// worker back off the board, and a worker update that landed in the same
    /// window replaces the snapshot just written. Returns `false` when the
    /// pair was removed.
    async fn settle(&self, event: &Event, worker: &Worker) -> bool {
        let (event_id, worker_id) = (event.id, worker.id);
        let Some((live, fresh)) = self
            .blocking(move |store| {
                (
                    store.fetch_live_assignment(event_id, worker_id),
                    store.fetch_worker_uncached(worker_id),
                )
            })
            .await
        else {
            return true;
        };

        match live {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.board.remove_worker(event_id, worker_id);
                info!(
                    "event=merge_apply module=merge status=skip error_code=stale_assignment stage=settle event_id={event_id} worker_id={worker_id}"
                );
                return false;
            }
            Err(err) => warn!(
                "event=merge_settle module=merge status=error event_id={event_id} worker_id={worker_id} transient={} error={err}",
                err.is_transient()
            ),
        }

        match fresh {
            Ok(Some(fresh)) if fresh != *worker => {
                debug!(
                    "event=merge_settle module=merge status=ok event_id={event_id} worker_id={worker_id} refreshed=true"
                );
                self.board.upsert(event, fresh);
            }
            Ok(_) => {}
            Err(err) => warn!(
                "event=merge_settle module=merge status=error event_id={event_id} worker_id={worker_id} transient={} error={err}",
                err.is_transient()
            ),
        }
        true
    }

    async fn merge_event(&self, kind: ChangeKind, event: &Event) -> MergeOutcome {
        self.store
            .invalidate_groups(&[EVENTS_GROUP, ASSIGNMENTS_GROUP]);
        let event_id = event.id;
        self.signal(move |listener| listener.totals_changed(event_id))
            .await;
        match kind {
            ChangeKind::Insert => MergeOutcome::Ignored,
            ChangeKind::Update => {
                MergeOutcome::Refreshed(usize::from(self.board.refresh_event(event)))
            }
        }
    }

    fn merge_worker(&self, kind: ChangeKind, worker: &Worker) -> MergeOutcome {
        self.store
            .invalidate_groups(&[WORKERS_GROUP, ASSIGNMENTS_GROUP]);
        match kind {
            ChangeKind::Insert => MergeOutcome::Ignored,
            ChangeKind::Update => MergeOutcome::Refreshed(self.board.refresh_worker(worker)),
        }
    }

    /// Looks up the event, the worker and the live row, retrying once.
    ///
    /// Only misses and transient store failures are retried.
    async fn resolve(&self, row: &Assignment) -> Resolution {
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }
            let target = row.clone();
            let Some(found) = self.blocking(move |store| lookup(store, &target)).await else {
                return Resolution::Unresolved;
            };
            match found {
                Ok(Lookup::Ready(event, worker)) => return Resolution::Ready(event, worker),
                Ok(Lookup::NotLive) => return Resolution::Stale,
                Ok(Lookup::Missing) => debug!(
                    "event=merge_resolve module=merge status=miss attempt={attempt} assignment_id={}",
                    row.id
                ),
                Err(err) if err.is_transient() => debug!(
                    "event=merge_resolve module=merge status=error attempt={attempt} assignment_id={} transient=true error={err}",
                    row.id
                ),
                Err(err) => {
                    debug!(
                        "event=merge_resolve module=merge status=error attempt={attempt} assignment_id={} transient=false error={err}",
                        row.id
                    );
                    return Resolution::Unresolved;
                }
            }
        }
        Resolution::Unresolved
    }

    /// Runs synchronous store work on the blocking pool.
    async fn blocking<T, F>(&self, work: F) -> Option<T>
    where
        F: FnOnce(&AssignmentStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || work(&store)).await {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("event=merge_blocking module=merge status=error error={err}");
                None
            }
        }
    }

    /// Delivers a listener callback on the blocking pool; listeners may hit the store.
    async fn signal<F>(&self, callback: F)
    where
        F: FnOnce(&dyn MergeListener) + Send + 'static,
    {
        let listener = Arc::clone(&self.listener);
        if let Err(err) = tokio::task::spawn_blocking(move || callback(listener.as_ref())).await {
            warn!("event=merge_signal module=merge status=error error={err}");
        }
    }
}

enum Resolution {
    Ready(Event, Worker),
    /// The row was removed, or the pair now has a different live row.
    Stale,
    Unresolved,
}

enum Lookup {
    Ready(Event, Worker),
    Missing,
    NotLive,
}

fn lookup(store: &AssignmentStore, row: &Assignment) -> ScheduleResult<Lookup> {
    let (Some(event), Some(worker)) = (
        store.fetch_event(row.event_id)?,
        store.fetch_worker(row.worker_id)?,
    ) else {
        return Ok(Lookup::Missing);
    };
    match store.fetch_live_assignment(row.event_id, row.worker_id)? {
        Some(live) if live.id == row.id => Ok(Lookup::Ready(event, worker)),
        _ => Ok(Lookup::NotLive),
    }
}
