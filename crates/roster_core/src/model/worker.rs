//! Worker model.

use super::ValidationError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorkerId = Uuid;

/// A staff member that can be assigned to events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub role: String,
    pub email: String,
    pub contact: String,
    pub status: String,
}

impl Worker {
    /// Creates an active worker with empty contact details.
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role: role.into(),
            email: String::new(),
            contact: String::new(),
            status: "active".to_string(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = contact.into();
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("name"));
        }
        Ok(())
    }
}
