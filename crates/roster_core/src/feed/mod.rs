//! In-process live change feed.
//!
//! # Responsibility
//! - Fan out store change notifications to any number of subscribers.
//! - Filter deliveries per subscribed table.
//!
//! # Invariants
//! - Publishing never blocks and never fails when nobody is subscribed.
//! - A subscriber that falls behind observes `FeedItem::Lagged` instead of
//!   silently skipping changes.

use crate::model::change::{ChangeEvent, ChangeKind, ChangeRecord, FeedTable};
use log::{debug, warn};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Publisher side of the live feed.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

/// Item yielded to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Change(ChangeEvent),
    /// The subscriber missed this many changes and must re-converge.
    Lagged(u64),
}

/// Receiver side bound to one or more tables.
#[derive(Debug)]
pub struct FeedSubscription {
    receiver: broadcast::Receiver<ChangeEvent>,
    tables: Vec<FeedTable>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes one change; returns how many subscribers received it.
    pub fn publish(&self, change: ChangeEvent) -> usize {
        let table = change.table;
        match self.sender.send(change) {
            Ok(receivers) => {
                debug!(
                    "event=feed_publish module=feed status=ok table={} receivers={receivers}",
                    table.as_str()
                );
                receivers
            }
            Err(_) => 0,
        }
    }

    /// Serializes and publishes a typed record.
    pub fn publish_record(&self, kind: ChangeKind, record: &ChangeRecord) -> usize {
        match ChangeEvent::from_record(kind, record) {
            Ok(change) => self.publish(change),
            Err(err) => {
                warn!("event=feed_publish module=feed status=error error_code=encode_failed error={err}");
                0
            }
        }
    }

    /// Subscribes to changes of a single table.
    pub fn subscribe(&self, table: FeedTable) -> FeedSubscription {
        self.subscribe_tables(&[table])
    }

    /// Subscribes to changes of several tables through one ordered receiver.
    pub fn subscribe_tables(&self, tables: &[FeedTable]) -> FeedSubscription {
        FeedSubscription {
            receiver: self.sender.subscribe(),
            tables: tables.to_vec(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl FeedSubscription {
    /// Waits for the next change on a subscribed table.
    ///
    /// Returns `None` once every publisher has been dropped.
    pub async fn next(&mut self) -> Option<FeedItem> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if self.tables.contains(&change.table) => {
                    return Some(FeedItem::Change(change));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => return Some(FeedItem::Lagged(missed)),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn tables(&self) -> &[FeedTable] {
        &self.tables
    }
}
