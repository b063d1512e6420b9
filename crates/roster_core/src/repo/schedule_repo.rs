//! Schedule repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide filter/order/range reads over events plus exact counts.
//! - Provide assignment writes that enforce the live-pair uniqueness rule.
//! - Publish committed writes to an attached live change feed.
//!
//! # Invariants
//! - At most one live assignment row exists per `(event_id, worker_id)`.
//! - Assignment removal is a soft delete; removed rows never reappear in reads.
//! - Feed publication happens only after the write committed.

use crate::db::migrations;
use crate::db::DbError;
use crate::feed::ChangeFeed;
use crate::model::assignment::{Assignment, AssignmentWithJoins};
use crate::model::change::{ChangeKind, ChangeRecord};
use crate::model::event::{Event, EventId, EventStatus};
use crate::model::worker::{Worker, WorkerId};
use crate::model::{now_epoch_ms, ValidationError};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

const EVENT_COLUMNS_SQL: &str = "
    e.id AS e_id,
    e.status AS e_status,
    e.event_date AS e_event_date,
    e.venue AS e_venue,
    e.location AS e_location,
    e.profile_id AS e_profile_id,
    e.package_id AS e_package_id,
    e.theme_id AS e_theme_id,
    e.grazing_id AS e_grazing_id";

const WORKER_COLUMNS_SQL: &str = "
    w.id AS w_id,
    w.name AS w_name,
    w.role AS w_role,
    w.email AS w_email,
    w.contact AS w_contact,
    w.status AS w_status";

const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

pub type RepoResult<T> = Result<T, RepoError>;

/// Entity a lookup failed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Event,
    Worker,
    Assignment,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Worker => "worker",
            Self::Assignment => "assignment",
        }
    }
}

/// Repository error for schedule persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Db(DbError),
    NotFound(EntityKind, Uuid),
    DuplicateAssignment {
        event_id: EventId,
        worker_id: WorkerId,
    },
    InvalidData(String),
}

impl RepoError {
    /// Returns whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_transient())
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(kind, id) => write!(f, "{} not found: {id}", kind.as_str()),
            Self::DuplicateAssignment {
                event_id,
                worker_id,
            } => write!(
                f,
                "worker {worker_id} is already assigned to event {event_id}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted schedule data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventSortColumn {
    #[default]
    EventDate,
    Venue,
}

/// Query options for listing events. One order column at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventListQuery {
    pub status: Option<EventStatus>,
    pub order_by: EventSortColumn,
    pub direction: SortDirection,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Backing store contract consumed by the scheduling core.
pub trait ScheduleRepository: Send + Sync {
    fn create_event(&self, event: &Event) -> RepoResult<EventId>;
    fn update_event(&self, event: &Event) -> RepoResult<()>;
    fn get_event(&self, id: EventId) -> RepoResult<Option<Event>>;
    fn list_events(&self, query: &EventListQuery) -> RepoResult<Vec<Event>>;
    fn count_events(&self, status: Option<EventStatus>) -> RepoResult<u64>;

    fn create_worker(&self, worker: &Worker) -> RepoResult<WorkerId>;
    fn update_worker(&self, worker: &Worker) -> RepoResult<()>;
    fn get_worker(&self, id: WorkerId) -> RepoResult<Option<Worker>>;

    /// Inserts a live assignment.
    ///
    /// Fails with `NotFound` when either reference is missing and with
    /// `DuplicateAssignment` when the pair already has a live row.
    fn insert_assignment(&self, assignment: &Assignment) -> RepoResult<()>;
    fn find_assignment(
        &self,
        event_id: EventId,
        worker_id: WorkerId,
    ) -> RepoResult<Option<Assignment>>;
    /// Marks the live pair as updated and republishes it.
    fn touch_assignment(&self, event_id: EventId, worker_id: WorkerId) -> RepoResult<bool>;
    /// Soft-deletes the live pair. Returns `false` when no live row existed.
    fn soft_delete_assignment(&self, event_id: EventId, worker_id: WorkerId) -> RepoResult<bool>;
    /// Lists all live assignments with their event and worker joined.
    fn list_assignments_with_joins(&self) -> RepoResult<Vec<AssignmentWithJoins>>;
}

/// SQLite-backed schedule repository.
///
/// Owns its connection behind a mutex so one instance can be shared across
/// tasks.
pub struct SqliteScheduleRepository {
    conn: Mutex<Connection>,
    feed: Option<ChangeFeed>,
}

impl SqliteScheduleRepository {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: Connection) -> RepoResult<Self> {
        migrations::ensure_current(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            feed: None,
        })
    }

    /// Attaches a live feed that receives every committed insert/update.
    pub fn with_feed(mut self, feed: ChangeFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, kind: ChangeKind, record: ChangeRecord) {
        if let Some(feed) = &self.feed {
            feed.publish_record(kind, &record);
        }
    }
}

impl ScheduleRepository for SqliteScheduleRepository {
    fn create_event(&self, event: &Event) -> RepoResult<EventId> {
        event.validate()?;
        self.conn().execute(
            "INSERT INTO events (
                id, status, event_date, venue, location,
                profile_id, package_id, theme_id, grazing_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                event.id.to_string(),
                event.status.as_str(),
                event.event_date,
                event.venue.as_str(),
                event.location.as_str(),
                event.profile_id.as_deref(),
                event.package_id.as_deref(),
                event.theme_id.as_deref(),
                event.grazing_id.as_deref(),
            ],
        )?;
        self.publish(ChangeKind::Insert, ChangeRecord::Event(event.clone()));
        Ok(event.id)
    }

    fn update_event(&self, event: &Event) -> RepoResult<()> {
        event.validate()?;
        let changed = self.conn().execute(
            "UPDATE events
             SET
                status = ?2,
                event_date = ?3,
                venue = ?4,
                location = ?5,
                profile_id = ?6,
                package_id = ?7,
                theme_id = ?8,
                grazing_id = ?9,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                event.id.to_string(),
                event.status.as_str(),
                event.event_date,
                event.venue.as_str(),
                event.location.as_str(),
                event.profile_id.as_deref(),
                event.package_id.as_deref(),
                event.theme_id.as_deref(),
                event.grazing_id.as_deref(),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityKind::Event, event.id));
        }
        self.publish(ChangeKind::Update, ChangeRecord::Event(event.clone()));
        Ok(())
    }

    fn get_event(&self, id: EventId) -> RepoResult<Option<Event>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS_SQL} FROM events e WHERE e.id = ?1;"
        ))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return parse_event(row);
        }
        Ok(None)
    }

    fn list_events(&self, query: &EventListQuery) -> RepoResult<Vec<Event>> {
        let mut sql = format!("SELECT {EVENT_COLUMNS_SQL} FROM events e WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(status) = query.status {
            sql.push_str(" AND e.status = ?");
            bind_values.push(Value::Text(status.as_str().to_string()));
        }

        let column = match query.order_by {
            EventSortColumn::EventDate => "e.event_date",
            EventSortColumn::Venue => "e.venue",
        };
        let direction = match query.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {column} {direction}, e.id ASC"));

        match query.limit {
            Some(limit) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                bind_values.push(Value::Integer(i64::from(limit)));
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
            None if query.offset > 0 => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
            None => {}
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            if let Some(event) = parse_event(row)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn count_events(&self, status: Option<EventStatus>) -> RepoResult<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM events WHERE (?1 IS NULL OR status = ?1);",
            [status.map(EventStatus::as_str)],
            |row| row.get(0),
        )?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative event count `{count}`")))
    }

    fn create_worker(&self, worker: &Worker) -> RepoResult<WorkerId> {
        worker.validate()?;
        self.conn().execute(
            "INSERT INTO workers (id, name, role, email, contact, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                worker.id.to_string(),
                worker.name.as_str(),
                worker.role.as_str(),
                worker.email.as_str(),
                worker.contact.as_str(),
                worker.status.as_str(),
            ],
        )?;
        self.publish(ChangeKind::Insert, ChangeRecord::Worker(worker.clone()));
        Ok(worker.id)
    }

    fn update_worker(&self, worker: &Worker) -> RepoResult<()> {
        worker.validate()?;
        let changed = self.conn().execute(
            "UPDATE workers
             SET name = ?2, role = ?3, email = ?4, contact = ?5, status = ?6
             WHERE id = ?1;",
            params![
                worker.id.to_string(),
                worker.name.as_str(),
                worker.role.as_str(),
                worker.email.as_str(),
                worker.contact.as_str(),
                worker.status.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityKind::Worker, worker.id));
        }
        self.publish(ChangeKind::Update, ChangeRecord::Worker(worker.clone()));
        Ok(())
    }

    fn get_worker(&self, id: WorkerId) -> RepoResult<Option<Worker>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {WORKER_COLUMNS_SQL} FROM workers w WHERE w.id = ?1;"
        ))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return parse_worker(row);
        }
        Ok(None)
    }

    fn insert_assignment(&self, assignment: &Assignment) -> RepoResult<()> {
        {
            let conn = self.conn();
            ensure_exists(&conn, "events", EntityKind::Event, assignment.event_id)?;
            ensure_exists(&conn, "workers", EntityKind::Worker, assignment.worker_id)?;

            let inserted = conn.execute(
                "INSERT INTO assignments (id, event_id, worker_id, created_at)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    assignment.id.to_string(),
                    assignment.event_id.to_string(),
                    assignment.worker_id.to_string(),
                    assignment.created_at,
                ],
            );

            if let Err(err) = inserted {
                if is_unique_violation(&err) {
                    return Err(RepoError::DuplicateAssignment {
                        event_id: assignment.event_id,
                        worker_id: assignment.worker_id,
                    });
                }
                return Err(err.into());
            }
        }

        self.publish(
            ChangeKind::Insert,
            ChangeRecord::Assignment(assignment.clone()),
        );
        Ok(())
    }

    fn find_assignment(
        &self,
        event_id: EventId,
        worker_id: WorkerId,
    ) -> RepoResult<Option<Assignment>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, event_id, worker_id, created_at
                 FROM assignments
                 WHERE event_id = ?1 AND worker_id = ?2 AND is_deleted = 0;",
                params![event_id.to_string(), worker_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>("id")?,
                        row.get::<_, String>("event_id")?,
                        row.get::<_, String>("worker_id")?,
                        row.get::<_, i64>("created_at")?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, event_id, worker_id, created_at)| {
            Ok(Assignment {
                id: parse_uuid(&id, "assignments.id")?,
                event_id: parse_uuid(&event_id, "assignments.event_id")?,
                worker_id: parse_uuid(&worker_id, "assignments.worker_id")?,
                created_at,
            })
        })
        .transpose()
    }

    fn touch_assignment(&self, event_id: EventId, worker_id: WorkerId) -> RepoResult<bool> {
        let changed = self.conn().execute(
            "UPDATE assignments
             SET updated_at = (strftime('%s', 'now') * 1000)
             WHERE event_id = ?1 AND worker_id = ?2 AND is_deleted = 0;",
            params![event_id.to_string(), worker_id.to_string()],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        if let Some(assignment) = self.find_assignment(event_id, worker_id)? {
            self.publish(ChangeKind::Update, ChangeRecord::Assignment(assignment));
        }
        Ok(true)
    }

    fn soft_delete_assignment(&self, event_id: EventId, worker_id: WorkerId) -> RepoResult<bool> {
        let changed = self.conn().execute(
            "UPDATE assignments
             SET is_deleted = 1, updated_at = (strftime('%s', 'now') * 1000)
             WHERE event_id = ?1 AND worker_id = ?2 AND is_deleted = 0;",
            params![event_id.to_string(), worker_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn list_assignments_with_joins(&self) -> RepoResult<Vec<AssignmentWithJoins>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT
                a.id AS a_id,
                a.event_id AS a_event_id,
                a.worker_id AS a_worker_id,
                a.created_at AS a_created_at,
                {EVENT_COLUMNS_SQL},
                {WORKER_COLUMNS_SQL}
             FROM assignments a
             LEFT JOIN events e ON e.id = a.event_id
             LEFT JOIN workers w ON w.id = a.worker_id
             WHERE a.is_deleted = 0
             ORDER BY a.created_at ASC, a.rowid ASC;"
        ))?;

        let mut rows = stmt.query([])?;
        let mut joined = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get("a_id")?;
            let event_id: String = row.get("a_event_id")?;
            let worker_id: String = row.get("a_worker_id")?;
            joined.push(AssignmentWithJoins {
                assignment: Assignment {
                    id: parse_uuid(&id, "assignments.id")?,
                    event_id: parse_uuid(&event_id, "assignments.event_id")?,
                    worker_id: parse_uuid(&worker_id, "assignments.worker_id")?,
                    created_at: row.get("a_created_at")?,
                },
                event: parse_event(row)?,
                worker: parse_worker(row)?,
            });
        }
        Ok(joined)
    }
}

/// Creates an assignment row stamped with the current time.
pub fn new_assignment(event_id: EventId, worker_id: WorkerId) -> Assignment {
    Assignment::new(event_id, worker_id, now_epoch_ms())
}

fn ensure_exists(conn: &Connection, table: &str, kind: EntityKind, id: Uuid) -> RepoResult<()> {
    let exists: i64 = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1);"),
        [id.to_string()],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Err(RepoError::NotFound(kind, id));
    }
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && failure.extended_code == SQLITE_CONSTRAINT_UNIQUE
    )
}

fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn parse_event(row: &Row<'_>) -> RepoResult<Option<Event>> {
    let Some(id_text) = row.get::<_, Option<String>>("e_id")? else {
        return Ok(None);
    };
    let status_text: String = row.get("e_status")?;
    let status = EventStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid event status `{status_text}` in events.status"))
    })?;

    Ok(Some(Event {
        id: parse_uuid(&id_text, "events.id")?,
        status,
        event_date: row.get("e_event_date")?,
        venue: row.get("e_venue")?,
        location: row.get("e_location")?,
        profile_id: row.get("e_profile_id")?,
        package_id: row.get("e_package_id")?,
        theme_id: row.get("e_theme_id")?,
        grazing_id: row.get("e_grazing_id")?,
    }))
}

fn parse_worker(row: &Row<'_>) -> RepoResult<Option<Worker>> {
    let Some(id_text) = row.get::<_, Option<String>>("w_id")? else {
        return Ok(None);
    };

    Ok(Some(Worker {
        id: parse_uuid(&id_text, "workers.id")?,
        name: row.get("w_name")?,
        role: row.get("w_role")?,
        email: row.get("w_email")?,
        contact: row.get("w_contact")?,
        status: row.get("w_status")?,
    }))
}
