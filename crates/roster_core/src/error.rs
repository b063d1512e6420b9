//! Scheduling error taxonomy.
//!
//! # Invariants
//! - `NotFound`, `InvalidRequest` and `DuplicateAssignment` are per-item
//!   outcomes inside a batch and never abort the remaining items.
//! - `StoreUnavailable` wraps the repository failure that caused it.

use crate::repo::schedule_repo::{EntityKind, RepoError};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type ScheduleResult<T> = Result<T, ScheduleError>;

#[derive(Debug)]
pub enum ScheduleError {
    NotFound(EntityKind, Uuid),
    DuplicateAssignment { event_id: Uuid, worker_id: Uuid },
    InvalidRequest(String),
    StoreUnavailable(RepoError),
    NotificationFailed(String),
}

/// Fieldless discriminant of `ScheduleError`, used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleErrorKind {
    NotFound,
    DuplicateAssignment,
    InvalidRequest,
    StoreUnavailable,
    NotificationFailed,
}

impl ScheduleError {
    pub fn kind(&self) -> ScheduleErrorKind {
        match self {
            Self::NotFound(..) => ScheduleErrorKind::NotFound,
            Self::DuplicateAssignment { .. } => ScheduleErrorKind::DuplicateAssignment,
            Self::InvalidRequest(_) => ScheduleErrorKind::InvalidRequest,
            Self::StoreUnavailable(_) => ScheduleErrorKind::StoreUnavailable,
            Self::NotificationFailed(_) => ScheduleErrorKind::NotificationFailed,
        }
    }

    /// Store failure that may clear on retry (busy or locked database).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(err) if err.is_transient())
    }
}

impl Display for ScheduleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(kind, id) => write!(f, "{} not found: {id}", kind.as_str()),
            Self::DuplicateAssignment {
                event_id,
                worker_id,
            } => write!(
                f,
                "worker {worker_id} is already assigned to event {event_id}"
            ),
            Self::InvalidRequest(message) => write!(f, "invalid request: {message}"),
            Self::StoreUnavailable(err) => write!(f, "store unavailable: {err}"),
            Self::NotificationFailed(message) => write!(f, "notification failed: {message}"),
        }
    }
}

impl Error for ScheduleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StoreUnavailable(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ScheduleError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(kind, id) => Self::NotFound(kind, id),
            RepoError::DuplicateAssignment {
                event_id,
                worker_id,
            } => Self::DuplicateAssignment {
                event_id,
                worker_id,
            },
            RepoError::Validation(err) => Self::InvalidRequest(err.to_string()),
            other => Self::StoreUnavailable(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ScheduleError, ScheduleErrorKind};
    use crate::db::DbError;
    use crate::model::ValidationError;
    use crate::repo::schedule_repo::{EntityKind, RepoError};
    use uuid::Uuid;

    #[test]
    fn repo_errors_map_onto_schedule_taxonomy() {
        let id = Uuid::new_v4();
        assert_eq!(
            ScheduleError::from(RepoError::NotFound(EntityKind::Worker, id)).kind(),
            ScheduleErrorKind::NotFound
        );
        assert_eq!(
            ScheduleError::from(RepoError::Validation(ValidationError::EmptyField("name"))).kind(),
            ScheduleErrorKind::InvalidRequest
        );
        assert_eq!(
            ScheduleError::from(RepoError::InvalidData("bad row".to_string())).kind(),
            ScheduleErrorKind::StoreUnavailable
        );
    }

    #[test]
    fn only_busy_store_failures_are_transient() {
        let busy = RepoError::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        )));
        assert!(busy.is_transient());
        assert!(ScheduleError::from(busy).is_transient());

        let corrupt = ScheduleError::from(RepoError::InvalidData("bad row".to_string()));
        assert_eq!(corrupt.kind(), ScheduleErrorKind::StoreUnavailable);
        assert!(!corrupt.is_transient());
        assert!(!ScheduleError::NotFound(EntityKind::Event, Uuid::new_v4()).is_transient());
    }
}
