//! Core scheduling engine for event staffing rosters.
//! This crate owns the consistency rules between the backing store,
//! the read caches, and the grouped schedule view.

pub mod batch;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod feed;
pub mod logging;
pub mod merge;
pub mod model;
pub mod notify;
pub mod pagination;
pub mod repo;
pub mod service;
pub mod view;

pub use batch::{AssignOutcome, AttemptState, BatchAssigner, BatchResult, WorkerReport};
pub use cache::KeyedCache;
pub use config::{ConfigError, EngineConfig};
pub use engine::{sqlite_backend, SchedulingEngine, MERGE_TABLES};
pub use error::{ScheduleError, ScheduleErrorKind, ScheduleResult};
pub use feed::{ChangeFeed, FeedItem, FeedSubscription};
pub use logging::{default_log_level, init_logging, init_stderr_logging, logging_status};
pub use merge::{ChangeMerger, MergeHandle, MergeListener, MergeOutcome, MergeStats};
pub use model::assignment::{Assignment, AssignmentId, AssignmentWithJoins};
pub use model::change::{ChangeEvent, ChangeKind, ChangeRecord, FeedTable};
pub use model::event::{Event, EventId, EventStatus};
pub use model::schedule::GroupedSchedule;
pub use model::worker::{Worker, WorkerId};
pub use notify::{LogDispatcher, NotificationDispatcher};
pub use pagination::{PageWindow, Paginator};
pub use repo::schedule_repo::{
    EntityKind, EventListQuery, RepoError, RepoResult, ScheduleRepository,
    SqliteScheduleRepository,
};
pub use service::assignment_store::{AssignmentStore, EventsPage};
pub use view::{BoardMerge, ReloadOutcome, ScheduleBoard, ScheduleView};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
