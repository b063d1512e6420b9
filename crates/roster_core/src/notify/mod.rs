//! Notification dispatch contract and assignment notice composition.
//!
//! # Responsibility
//! - Define the black-box `(recipient, subject, body) -> pass/fail` sender.
//! - Pick a recipient address for a worker and compose the notice text.
//!
//! # Invariants
//! - Dispatchers report failure through the return value and never panic.

use crate::model::event::Event;
use crate::model::worker::Worker;
use async_trait::async_trait;
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

const ASSIGNMENT_SUBJECT: &str = "New event assignment";

/// External sender for worker notifications.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Sends one message; returns `true` when the dispatch succeeded.
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> bool;
}

/// Fully composed message for one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Returns the worker's email when it looks like an address, else the
/// contact number, else `None`.
pub fn recipient_for(worker: &Worker) -> Option<String> {
    let email = worker.email.trim();
    if EMAIL_RE.is_match(email) {
        return Some(email.to_string());
    }
    let contact = worker.contact.trim();
    if contact.is_empty() {
        None
    } else {
        Some(contact.to_string())
    }
}

/// Composes the assignment notice, or `None` when the worker is unreachable.
pub fn assignment_notice(event: &Event, worker: &Worker) -> Option<Notification> {
    let recipient = recipient_for(worker)?;
    let location = if event.location.trim().is_empty() {
        String::new()
    } else {
        format!(" ({})", event.location.trim())
    };
    let body = format!(
        "Hi {name},\n\nYou have been assigned to the event at {venue}{location} scheduled for epoch-ms {date}.\nStatus: {status}.",
        name = worker.name,
        venue = event.venue,
        date = event.event_date,
        status = event.status.as_str(),
    );
    Some(Notification {
        recipient,
        subject: ASSIGNMENT_SUBJECT.to_string(),
        body,
    })
}

/// Dispatcher that only writes a log line and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> bool {
        info!(
            "event=notification_send module=notify status=ok channel=log recipient_len={} subject_len={} body_len={}",
            recipient.len(),
            subject.len(),
            body.len()
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{assignment_notice, recipient_for};
    use crate::model::event::{Event, EventStatus};
    use crate::model::worker::Worker;

    #[test]
    fn recipient_prefers_valid_email_then_contact() {
        let both = Worker::new("Ana", "server")
            .with_email("ana@example.com")
            .with_contact("+15550100");
        assert_eq!(recipient_for(&both).as_deref(), Some("ana@example.com"));

        let bad_email = Worker::new("Ben", "cook")
            .with_email("not-an-address")
            .with_contact("+15550101");
        assert_eq!(recipient_for(&bad_email).as_deref(), Some("+15550101"));

        assert_eq!(recipient_for(&Worker::new("Cy", "runner")), None);
    }

    #[test]
    fn notice_mentions_worker_and_venue() {
        let event = Event::new(EventStatus::Confirmed, 1_700_000_000_000, "Hall", "Downtown");
        let worker = Worker::new("Ana", "server").with_email("ana@example.com");
        let notice = assignment_notice(&event, &worker).unwrap();
        assert_eq!(notice.recipient, "ana@example.com");
        assert!(notice.body.contains("Hi Ana"));
        assert!(notice.body.contains("Hall (Downtown)"));
    }
}
