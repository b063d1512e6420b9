//! Scheduling engine facade.
//!
//! # Responsibility
//! - Construct and own the cache-backed store, board, view, merger and batch
//!   assigner as explicit instances.
//! - Expose reload/refetch/batch entry points for outer UI or CLI layers.
//! - Start and stop the live merge loop.
//!
//! # Invariants
//! - At most one merge loop runs per engine.
//! - After `shutdown`, no reload publishes into the view.

use crate::batch::{BatchAssigner, BatchResult};
use crate::config::{ConfigError, EngineConfig};
use crate::error::ScheduleResult;
use crate::feed::{ChangeFeed, FeedSubscription};
use crate::merge::{ChangeMerger, MergeHandle, MergeListener, MergeStats};
use crate::model::change::FeedTable;
use crate::model::event::{EventId, EventStatus};
use crate::model::schedule::GroupedSchedule;
use crate::model::worker::WorkerId;
use crate::notify::NotificationDispatcher;
use crate::repo::schedule_repo::{RepoResult, ScheduleRepository, SqliteScheduleRepository};
use crate::service::assignment_store::{AssignmentStore, EventsPage};
use crate::view::{ReloadOutcome, ScheduleBoard, ScheduleView};
use log::{info, warn};
use rusqlite::Connection;
use std::sync::Arc;

/// Tables the merge loop listens to.
pub const MERGE_TABLES: &[FeedTable] = &[
    FeedTable::Assignments,
    FeedTable::Events,
    FeedTable::Workers,
];

pub struct SchedulingEngine {
    config: EngineConfig,
    store: Arc<AssignmentStore>,
    board: Arc<ScheduleBoard>,
    view: Arc<ScheduleView>,
    merger: Arc<ChangeMerger>,
    batch: BatchAssigner,
    merge_handle: Option<MergeHandle>,
}

impl SchedulingEngine {
    /// Builds an engine over `repo`; `status` filters the paged event list.
    pub fn new(
        config: EngineConfig,
        repo: Arc<dyn ScheduleRepository>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        status: Option<EventStatus>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let store = Arc::new(AssignmentStore::new(
            repo,
            config.page_size,
            config.cache_ttl(),
        ));
        let board = Arc::new(ScheduleBoard::new());
        let view = Arc::new(ScheduleView::new(
            Arc::clone(&store),
            Arc::clone(&board),
            status,
        ));
        let listener: Arc<dyn MergeListener> = view.clone();
        let merger = Arc::new(ChangeMerger::new(
            Arc::clone(&store),
            Arc::clone(&board),
            listener,
            &config,
        ));
        let batch = BatchAssigner::new(Arc::clone(&store), dispatcher, config.notify_concurrency);

        info!(
            "event=engine_init module=engine status=ok page_size={} cache_ttl_secs={} notify_concurrency={} merge_shards={}",
            config.page_size, config.cache_ttl_secs, config.notify_concurrency, config.merge_shards
        );

        Ok(Self {
            config,
            store,
            board,
            view,
            merger,
            batch,
            merge_handle: None,
        })
    }

    /// Starts the merge loop on `subscription`. Must run inside a Tokio runtime.
    ///
    /// Returns `false` when a loop is already running.
    pub fn start(&mut self, subscription: FeedSubscription) -> bool {
        if self.merge_handle.is_some() {
            warn!("event=engine_start module=engine status=skip reason=already_running");
            return false;
        }
        self.merge_handle = Some(Arc::clone(&self.merger).spawn(subscription));
        info!("event=engine_start module=engine status=ok");
        true
    }

    pub fn is_running(&self) -> bool {
        self.merge_handle.is_some()
    }

    /// Detaches the view and stops the merge loop, draining queued changes.
    pub async fn shutdown(&mut self) -> Option<MergeStats> {
        self.view.detach();
        let handle = self.merge_handle.take()?;
        let stats = handle.shutdown().await;
        info!("event=engine_shutdown module=engine status=ok");
        Some(stats)
    }

    pub fn reload_page(&self, page_number: u32) -> ScheduleResult<ReloadOutcome> {
        self.view.reload_page(page_number)
    }

    pub fn refetch(&self) -> ScheduleResult<ReloadOutcome> {
        self.view.refetch()
    }

    /// Runs a batch, then refetches so the view reflects every local write
    /// even before the feed delivers it.
    ///
    /// A failed refetch is logged; the batch report is still returned.
    pub async fn assign_batch(
        &self,
        event_id: EventId,
        worker_ids: &[WorkerId],
    ) -> ScheduleResult<BatchResult> {
        let result = self.batch.assign_batch(event_id, worker_ids).await?;
        if let Err(err) = self.refetch() {
            warn!("event=engine_batch module=engine status=error stage=refetch event_id={event_id} error={err}");
        }
        Ok(result)
    }

    /// Removes one assignment, then refetches. The feed carries no deletions.
    pub fn remove_assignment(&self, event_id: EventId, worker_id: WorkerId) -> ScheduleResult<bool> {
        let removed = self.store.remove_assignment(event_id, worker_id)?;
        if removed {
            self.board.remove_worker(event_id, worker_id);
        }
        self.refetch()?;
        Ok(removed)
    }

    pub fn grouped(&self) -> Vec<GroupedSchedule> {
        self.view.grouped()
    }

    pub fn current_page(&self) -> Option<EventsPage> {
        self.view.current_page()
    }

    pub fn merge_stats(&self) -> MergeStats {
        self.merger.stats()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<AssignmentStore> {
        &self.store
    }

    pub fn view(&self) -> &Arc<ScheduleView> {
        &self.view
    }

    pub fn merger(&self) -> &Arc<ChangeMerger> {
        &self.merger
    }
}

/// Wires a migrated SQLite connection to a fresh live feed.
pub fn sqlite_backend(
    conn: Connection,
    feed_capacity: usize,
) -> RepoResult<(Arc<SqliteScheduleRepository>, ChangeFeed)> {
    let feed = ChangeFeed::new(feed_capacity);
    let repo = SqliteScheduleRepository::try_new(conn)?.with_feed(feed.clone());
    Ok((Arc::new(repo), feed))
}
