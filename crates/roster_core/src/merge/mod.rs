//! Live feed reconciliation into the grouped schedule.

pub mod change_merger;

pub use change_merger::{
    ChangeMerger, MergeHandle, MergeListener, MergeOutcome, MergeStats, NoopMergeListener,
};
