//! Paginated, grouped schedule view state.

pub mod board;
pub mod schedule_view;

pub use board::{BoardMerge, ScheduleBoard};
pub use schedule_view::{ReloadOutcome, ScheduleView};
