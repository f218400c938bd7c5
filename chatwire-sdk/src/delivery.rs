//! Per-message delivery status, fed by `message_delivered` / `message_failed`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::frame::{DeliveryReport, EventKind, InboundEvent};
use crate::router::{EventRouter, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Sent by this client, no report yet.
    Pending,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEntry {
    pub status: DeliveryStatus,
    /// Only set for `Failed`, and only when the server gave a reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryEntry {
    fn pending() -> Self {
        Self {
            status: DeliveryStatus::Pending,
            error: None,
        }
    }

    fn from_report(status: DeliveryStatus, report: &DeliveryReport) -> Self {
        let error = match status {
            DeliveryStatus::Failed => report.error.clone(),
            _ => None,
        };
        Self { status, error }
    }
}

type Table = HashMap<String, DeliveryEntry>;

/// Maps message id to its latest delivery report.
///
/// A later report for the same id overwrites the earlier one. Entries are
/// never evicted on their own; call [`remove`](Self::remove) or
/// [`clear`](Self::clear) when a conversation goes out of view.
pub struct DeliveryTracker {
    table: Arc<watch::Sender<Table>>,
    _sub: Subscription,
}

impl DeliveryTracker {
    pub fn new(router: &EventRouter) -> Self {
        let (tx, _) = watch::channel(Table::new());
        let table = Arc::new(tx);

        let handler = Arc::clone(&table);
        let sub = router.on_many(EventKind::DELIVERY, move |event| {
            let (status, report) = match event {
                InboundEvent::MessageDelivered(r) => (DeliveryStatus::Delivered, r),
                InboundEvent::MessageFailed(r) => (DeliveryStatus::Failed, r),
                _ => return,
            };
            tracing::debug!(message_id = %report.message_id, ?status, "delivery report");
            let entry = DeliveryEntry::from_report(status, report);
            upsert(&handler, report.message_id.clone(), entry);
        });

        Self { table, _sub: sub }
    }

    /// Record a message this client just sent so the UI can show it as pending.
    /// Does nothing if a report for it already arrived.
    pub fn mark_pending(&self, message_id: impl Into<String>) {
        let message_id = message_id.into();
        self.table.send_if_modified(|table| {
            if table.contains_key(&message_id) {
                return false;
            }
            table.insert(message_id, DeliveryEntry::pending());
            true
        });
    }

    pub fn get(&self, message_id: &str) -> Option<DeliveryEntry> {
        self.table.borrow().get(message_id).cloned()
    }

    pub fn status(&self, message_id: &str) -> Option<DeliveryStatus> {
        self.table.borrow().get(message_id).map(|e| e.status)
    }

    pub fn snapshot(&self) -> Table {
        self.table.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.borrow().is_empty()
    }

    pub fn remove(&self, message_id: &str) -> Option<DeliveryEntry> {
        let mut removed = None;
        self.table.send_if_modified(|table| {
            removed = table.remove(message_id);
            removed.is_some()
        });
        removed
    }

    pub fn clear(&self) {
        self.table.send_if_modified(|table| {
            let changed = !table.is_empty();
            table.clear();
            changed
        });
    }

    /// Change feed. The receiver starts at the current table.
    pub fn subscribe(&self) -> watch::Receiver<Table> {
        self.table.subscribe()
    }
}

fn upsert(table: &watch::Sender<Table>, message_id: String, entry: DeliveryEntry) {
    table.send_if_modified(|table| {
        if table.get(&message_id) == Some(&entry) {
            return false;
        }
        table.insert(message_id, entry);
        true
    });
}

impl std::fmt::Debug for DeliveryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTracker")
            .field("entries", &self.table.borrow().len())
            .finish()
    }
}
