//! Event (reservation) model.
//!
//! # Invariants
//! - `id` is stable and never reused for another event.
//! - Foreign references (`profile_id`, `package_id`, ...) are carried but not
//!   interpreted by the scheduling core.

use super::ValidationError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EventId = Uuid;

/// Lifecycle status of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Confirmed,
    Completed,
    Canceled,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "completed" => Some(Self::Completed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

/// A scheduled occasion that requires staffing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub status: EventStatus,
    /// Unix epoch milliseconds.
    pub event_date: i64,
    pub venue: String,
    pub location: String,
    pub profile_id: Option<String>,
    pub package_id: Option<String>,
    pub theme_id: Option<String>,
    pub grazing_id: Option<String>,
}

impl Event {
    /// Creates a new event with a generated stable ID and no foreign references.
    pub fn new(
        status: EventStatus,
        event_date: i64,
        venue: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            status,
            event_date,
            venue: venue.into(),
            location: location.into(),
            profile_id: None,
            package_id: None,
            theme_id: None,
            grazing_id: None,
        }
    }

    /// Validates fields required before persistence.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.venue.trim().is_empty() {
            return Err(ValidationError::EmptyField("venue"));
        }
        if self.event_date < 0 {
            return Err(ValidationError::NegativeTimestamp("event_date"));
        }
        Ok(())
    }
}
