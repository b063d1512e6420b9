//! Live change feed envelope.
//!
//! # Responsibility
//! - Carry raw insert/update notifications from the backing store.
//! - Decode raw payloads into typed records at the consumer side.
//!
//! # Invariants
//! - Payload decoding never panics; malformed payloads surface as errors.

use super::assignment::Assignment;
use super::event::Event;
use super::worker::Worker;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Change kind delivered by the feed. Deletions are never delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// Relation a change belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedTable {
    Assignments,
    Events,
    Workers,
}

impl FeedTable {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assignments => "assignments",
            Self::Events => "events",
            Self::Workers => "workers",
        }
    }
}

/// One notification from the live feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: FeedTable,
    pub payload: Value,
}

/// Typed view of a decoded change payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRecord {
    Assignment(Assignment),
    Event(Event),
    Worker(Worker),
}

/// Payload could not be decoded into the record type its table implies.
#[derive(Debug)]
pub struct MalformedChange {
    pub table: FeedTable,
    pub source: serde_json::Error,
}

impl Display for MalformedChange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "malformed `{}` change payload: {}",
            self.table.as_str(),
            self.source
        )
    }
}

impl Error for MalformedChange {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

impl ChangeEvent {
    /// Builds a change from a typed record. Used by store-side publishers.
    pub fn from_record(kind: ChangeKind, record: &ChangeRecord) -> Result<Self, serde_json::Error> {
        let (table, payload) = match record {
            ChangeRecord::Assignment(row) => (FeedTable::Assignments, serde_json::to_value(row)?),
            ChangeRecord::Event(row) => (FeedTable::Events, serde_json::to_value(row)?),
            ChangeRecord::Worker(row) => (FeedTable::Workers, serde_json::to_value(row)?),
        };
        Ok(Self {
            kind,
            table,
            payload,
        })
    }

    pub fn decode(&self) -> Result<ChangeRecord, MalformedChange> {
        let wrap = |source| MalformedChange {
            table: self.table,
            source,
        };
        let payload = self.payload.clone();
        match self.table {
            FeedTable::Assignments => serde_json::from_value(payload)
                .map(ChangeRecord::Assignment)
                .map_err(wrap),
            FeedTable::Events => serde_json::from_value(payload)
                .map(ChangeRecord::Event)
                .map_err(wrap),
            FeedTable::Workers => serde_json::from_value(payload)
                .map(ChangeRecord::Worker)
                .map_err(wrap),
        }
    }
}
